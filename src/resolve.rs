//! Conflict resolver — the receive side of the sync protocol.
//!
//! DESIGN
//! ======
//! Every inbound graph patch lands here. A locked target entity means one
//! of our own mutations is in flight: the patch is queued, silently, to be
//! replayed after confirmation. An unlocked target is a straight timestamp
//! race: newer applies and adopts the sender's timestamp, older is
//! discarded with a warning naming the sender, because their change would
//! otherwise vanish without anyone noticing.
//!
//! The settle half runs on our own confirmations: queued patches older
//! than the confirmed timestamp are replayed under it (the local edit
//! keeps the entity's timestamp and the loss is attributed to the local
//! user), queued patches newer than it stay queued until the lock count
//! reaches zero, at which point they merge value and timestamp.

use serde_json::Value;
use tracing::{debug, warn};

use crate::lock::QueuedPatch;
use crate::model::{EntityKind, Timestamp};
use crate::patch::Operation;
use crate::session::FloorSession;
use crate::sync::message::GraphPatch;

// =============================================================================
// ROOT OPERATIONS
// =============================================================================

/// A patch is either entity-level (create/delete) or field-level.
enum PatchShape<'a> {
    Create(&'a Value),
    Delete,
    Update(&'a [Operation]),
}

fn classify(ops: &[Operation]) -> PatchShape<'_> {
    match ops {
        [Operation::Add { path, value }] if path.is_empty() => PatchShape::Create(value),
        [Operation::Remove { path }] if path.is_empty() => PatchShape::Delete,
        _ => PatchShape::Update(ops),
    }
}

// =============================================================================
// INBOUND PATH
// =============================================================================

/// Decide what to do with one inbound remote patch: queue, apply, or
/// discard with a warning.
pub fn handle_remote_patch(session: &mut FloorSession, patch: GraphPatch) {
    let id = patch.entity_id.clone();

    if session.locks.is_locked(&id) {
        // Our own mutation is awaiting confirmation; replay later. No
        // warning here — the settle pass decides who won.
        debug!(entity_id = %id, from = %patch.sender_id, "entity locked; queueing remote patch");
        session.overwrites.enqueue(
            &id,
            QueuedPatch {
                kind: patch.entity,
                ops: patch.diff,
                timestamp: patch.timestamp,
                sender_id: patch.sender_id,
            },
        );
        return;
    }

    let stored = session.store.timestamp(patch.entity, &id).cloned();
    match stored {
        Some(stored_ts) if stored_ts >= patch.timestamp => {
            // Same or newer local state: applying would silently destroy
            // it, so the sender's change is dropped and the user told.
            let name = session.peer_name(&patch.sender_id);
            warn!(entity_id = %id, %stored_ts, incoming = %patch.timestamp, "discarding stale remote patch");
            session
                .alerts
                .warn(format!("{name}'s change to {id} was overwritten by a newer edit"));
        }
        _ => {
            apply_patch_value(session, patch.entity, &id, &patch.diff, &patch.timestamp);
        }
    }
}

// =============================================================================
// SETTLE AFTER CONFIRMATION
// =============================================================================

/// Replay queued patches older than a just-confirmed local mutation.
/// Their values land, but the entity keeps the confirmed timestamp — the
/// local edit is the newest — and each replay warns that the local user's
/// save overwrote the sender's earlier change.
pub fn settle_confirmation(session: &mut FloorSession, kind: EntityKind, id: &str, confirmed: &Timestamp) {
    let older = session.overwrites.drain_older(id, confirmed);
    for queued in older {
        let name = session.peer_name(&queued.sender_id);
        debug!(entity_id = %id, from = %queued.sender_id, queued_ts = %queued.timestamp, "replaying queued patch under local confirmation");
        if apply_patch_value(session, kind, id, &queued.ops, confirmed) {
            session
                .alerts
                .warn(format!("Your saved change to {id} overwrote {name}'s earlier edit"));
        }
    }
}

/// Merge everything still queued for an entity once its lock count hits
/// zero. These arrived with timestamps newer than any local confirmation,
/// so they apply silently and their timestamps are adopted.
pub fn merge_remaining(session: &mut FloorSession, kind: EntityKind, id: &str) {
    let remaining = session.overwrites.drain_all(id);
    for queued in remaining {
        debug!(entity_id = %id, from = %queued.sender_id, ts = %queued.timestamp, "merging queued patch after unlock");
        let ts = queued.timestamp.clone();
        apply_patch_value(session, kind, id, &queued.ops, &ts);
    }
}

// =============================================================================
// APPLICATION
// =============================================================================

/// Apply a patch to the store, honoring entity-level create/delete shapes,
/// then stamp the entity with `timestamp` — which is the incoming patch's
/// timestamp on the normal path and the local confirmation when a queued
/// older patch is replayed under it. Returns whether anything was applied.
fn apply_patch_value(
    session: &mut FloorSession,
    kind: EntityKind,
    id: &str,
    ops: &[Operation],
    timestamp: &Timestamp,
) -> bool {
    let applied = match classify(ops) {
        PatchShape::Create(value) => insert_entity(session, kind, id, value),
        PatchShape::Delete => {
            match kind {
                EntityKind::Node => session.store.remove_node(id).is_some(),
                EntityKind::Room => session.store.remove_room(id).is_some(),
            }
        }
        PatchShape::Update(ops) => match session.store.apply_ops(kind, id, ops) {
            Ok(()) => true,
            Err(e) => {
                // No partial application happened; the store is as it was.
                warn!(entity_id = %id, error = %e, "patch application failed");
                session.alerts.error("Failed to apply a change from another user");
                false
            }
        },
    };

    // A deleted entity has no timestamp slot; set_timestamp no-ops.
    if applied {
        session.store.set_timestamp(kind, id, timestamp.clone());
    }
    applied
}

fn insert_entity(session: &mut FloorSession, kind: EntityKind, id: &str, value: &Value) -> bool {
    match kind {
        EntityKind::Node => match serde_json::from_value(value.clone()) {
            Ok(node) => {
                session.store.insert_node(id.to_owned(), node);
                true
            }
            Err(e) => {
                warn!(entity_id = %id, error = %e, "malformed node in remote patch");
                session.alerts.error("Failed to apply a change from another user");
                false
            }
        },
        EntityKind::Room => match serde_json::from_value(value.clone()) {
            Ok(room) => {
                session.store.insert_room(id.to_owned(), room);
                true
            }
            Err(e) => {
                warn!(entity_id = %id, error = %e, "malformed room in remote patch");
                session.alerts.error("Failed to apply a change from another user");
                false
            }
        },
    }
}

#[cfg(test)]
#[path = "resolve_test.rs"]
mod tests;
