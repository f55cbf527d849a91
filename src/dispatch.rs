//! Mutation dispatcher — optimistic apply, persist, reconcile, broadcast.
//!
//! DESIGN
//! ======
//! One call orchestrates a whole logical edit:
//! 1. snapshot the affected entities and build the reverse descriptor
//! 2. apply the edit to the store immediately (optimistic)
//! 3. record the (forward, reverse) pair unless this is an undo/redo replay
//! 4. lock every locally mutated entity and await the persistence call
//! 5. on confirmation, reconcile each entity against its overwrite queue
//! 6. broadcast the confirmed per-entity diffs to peers
//!
//! A failed persistence call surfaces an error alert and marks the floor's
//! cache stale so the embedder refetches; the optimistic state is
//! superseded rather than rolled back. Queued remote patches for the
//! failed entities are discarded with the cache, keeping the invariant
//! that queue entries exist only while a lock is held.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::edit::{Edit, EditPair};
use crate::model::{Edge, EntityId, EntityKind, FloorCode, dist};
use crate::patch::{self, Operation};
use crate::persist::{PersistError, Persistence};
use crate::resolve;
use crate::session::FloorSession;
use crate::store::StoreError;
use crate::sync::message::{GraphPatch, SyncMessage};

// =============================================================================
// TYPES
// =============================================================================

/// Whether a dispatched edit enters history. Undo/redo replays must not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    Record,
    Replay,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),
    #[error("edge not found between {0} and {1}")]
    UnknownEdge(EntityId, EntityId),
    #[error("cannot replay {0}")]
    NotReplayable(&'static str),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One entity touched by the optimistic apply.
struct Target {
    kind: EntityKind,
    id: EntityId,
    /// Serialized value before the edit; `None` when the edit created it.
    before: Option<Value>,
}

/// Everything the optimistic phase produces for the later phases.
struct Applied {
    history_pair: EditPair,
    targets: Vec<Target>,
    /// Cross-floor neighbors whose reverse edge must be deleted before the
    /// node itself (delete-node only): (neighbor id, neighbor's floor).
    cross_floor_cleanups: Vec<(EntityId, FloorCode)>,
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Run one logical edit through the full optimistic/confirm cycle.
///
/// # Errors
///
/// Every error is surfaced to the user as an alert before being returned;
/// the returned value exists so undo/redo can hold its cursor on failure.
pub async fn dispatch(
    session: &mut FloorSession,
    persist: &dyn Persistence,
    edit: Edit,
    mode: RecordMode,
) -> Result<(), DispatchError> {
    if !edit.is_replayable() {
        // Room creation markers exist only as history entries; replaying
        // one means the user undid/redid past a creation.
        return Err(DispatchError::NotReplayable(edit.name()));
    }

    info!(op = edit.name(), floor = %session.floor_code, "dispatching edit");

    let applied = apply_optimistic(session, &edit)?;

    if mode == RecordMode::Record {
        session.history.record(applied.history_pair.clone());
    }

    for target in &applied.targets {
        session.locks.lock(&target.id);
    }

    let confirmation = persist_edit(session, persist, &edit, &applied.cross_floor_cleanups).await;

    let confirmed = match confirmation {
        Ok(ts) => ts,
        Err(e) => {
            fail(session, &edit, &applied, &e);
            return Err(e.into());
        }
    };
    debug!(op = edit.name(), %confirmed, "persistence confirmed");

    // Reconcile, unlock, and broadcast each touched entity.
    for target in &applied.targets {
        session.store.set_timestamp(target.kind, &target.id, confirmed.clone());
        let after = session.store.entity_value(target.kind, &target.id);

        resolve::settle_confirmation(session, target.kind, &target.id, &confirmed);
        if session.locks.unlock(&target.id) == 0 {
            resolve::merge_remaining(session, target.kind, &target.id);
        }

        broadcast(session, target, after, &confirmed);
    }

    Ok(())
}

// =============================================================================
// OPTIMISTIC APPLY
// =============================================================================

#[allow(clippy::too_many_lines)]
fn apply_optimistic(session: &mut FloorSession, edit: &Edit) -> Result<Applied, DispatchError> {
    let store = &mut session.store;
    match edit {
        Edit::MoveNode { node_id, node } => {
            let old = store
                .node(node_id)
                .cloned()
                .ok_or_else(|| DispatchError::UnknownEntity(node_id.clone()))?;
            let before = store.entity_value(EntityKind::Node, node_id);
            store.insert_node(node_id.clone(), node.clone());

            Ok(Applied {
                history_pair: EditPair {
                    edit: edit.clone(),
                    reverse: Edit::MoveNode { node_id: node_id.clone(), node: old },
                },
                targets: vec![Target { kind: EntityKind::Node, id: node_id.clone(), before }],
                cross_floor_cleanups: Vec::new(),
            })
        }

        Edit::AddNode { node_id, node } => {
            let mut targets = vec![Target { kind: EntityKind::Node, id: node_id.clone(), before: None }];

            store.insert_node(node_id.clone(), node.clone());
            // Mirror the new node's same-floor edges onto its neighbors.
            for (neighbor_id, edge) in &node.neighbors {
                if edge.to_floor_info.is_some() {
                    continue;
                }
                let before = store.entity_value(EntityKind::Node, neighbor_id);
                if let Some(neighbor) = store.node_mut(neighbor_id) {
                    neighbor
                        .neighbors
                        .insert(node_id.clone(), Edge { dist: edge.dist, to_floor_info: None });
                    targets.push(Target { kind: EntityKind::Node, id: neighbor_id.clone(), before });
                }
            }

            Ok(Applied {
                history_pair: EditPair {
                    edit: edit.clone(),
                    reverse: Edit::DeleteNode { node_id: node_id.clone() },
                },
                targets,
                cross_floor_cleanups: Vec::new(),
            })
        }

        Edit::DeleteNode { node_id } => {
            let snapshot = store
                .node(node_id)
                .cloned()
                .ok_or_else(|| DispatchError::UnknownEntity(node_id.clone()))?;

            let mut targets = vec![Target {
                kind: EntityKind::Node,
                id: node_id.clone(),
                before: store.entity_value(EntityKind::Node, node_id),
            }];

            // Reconnect the two neighbors of a pass-through node so the
            // path survives, with a freshly computed edge length.
            if snapshot.neighbors.len() == 2 {
                let ids: Vec<EntityId> = snapshot.neighbors.keys().cloned().collect();
                let positions = (store.node(&ids[0]).map(|n| n.pos), store.node(&ids[1]).map(|n| n.pos));
                if let (Some(p0), Some(p1)) = positions {
                    let length = dist(p0, p1);
                    for (this, other) in [(&ids[0], &ids[1]), (&ids[1], &ids[0])] {
                        targets.push(Target {
                            kind: EntityKind::Node,
                            id: this.clone(),
                            before: store.entity_value(EntityKind::Node, this),
                        });
                        if let Some(node) = store.node_mut(this) {
                            node.neighbors.insert(other.clone(), Edge::with_dist(length));
                        }
                    }
                }
            }

            let cross_floor_cleanups: Vec<(EntityId, FloorCode)> = snapshot
                .neighbors
                .iter()
                .filter_map(|(id, edge)| {
                    edge.to_floor_info
                        .as_ref()
                        .map(|info| (id.clone(), info.to_floor.clone()))
                })
                .collect();

            store.remove_node(node_id);

            // Strip dangling references from every remaining node.
            let referencing: Vec<EntityId> = store
                .nodes()
                .iter()
                .filter(|(_, node)| node.neighbors.contains_key(node_id))
                .map(|(id, _)| id.clone())
                .collect();
            for id in referencing {
                if !targets.iter().any(|t| t.id == id) {
                    targets.push(Target {
                        kind: EntityKind::Node,
                        id: id.clone(),
                        before: store.entity_value(EntityKind::Node, &id),
                    });
                }
                if let Some(node) = store.node_mut(&id) {
                    node.neighbors.remove(node_id);
                }
            }

            Ok(Applied {
                history_pair: EditPair {
                    edit: edit.clone(),
                    reverse: Edit::AddNode { node_id: node_id.clone(), node: snapshot },
                },
                targets,
                cross_floor_cleanups,
            })
        }

        Edit::AddEdge { in_node_id, out_node_id, in_edge, out_edge } => {
            if store.node(out_node_id).is_none() {
                return Err(DispatchError::UnknownEntity(out_node_id.clone()));
            }
            let before_in = store.entity_value(EntityKind::Node, in_node_id);
            let before_out = store.entity_value(EntityKind::Node, out_node_id);

            store
                .node_mut(in_node_id)
                .ok_or_else(|| DispatchError::UnknownEntity(in_node_id.clone()))?
                .neighbors
                .insert(out_node_id.clone(), out_edge.clone());
            if let Some(out_node) = store.node_mut(out_node_id) {
                out_node.neighbors.insert(in_node_id.clone(), in_edge.clone());
            }

            Ok(Applied {
                history_pair: EditPair {
                    edit: edit.clone(),
                    reverse: Edit::DeleteEdge {
                        in_node_id: in_node_id.clone(),
                        out_node_id: out_node_id.clone(),
                    },
                },
                targets: vec![
                    Target { kind: EntityKind::Node, id: in_node_id.clone(), before: before_in },
                    Target { kind: EntityKind::Node, id: out_node_id.clone(), before: before_out },
                ],
                cross_floor_cleanups: Vec::new(),
            })
        }

        Edit::DeleteEdge { in_node_id, out_node_id } => {
            let out_edge = store
                .node(in_node_id)
                .and_then(|n| n.neighbors.get(out_node_id))
                .cloned()
                .ok_or_else(|| DispatchError::UnknownEdge(in_node_id.clone(), out_node_id.clone()))?;
            let in_edge = store
                .node(out_node_id)
                .and_then(|n| n.neighbors.get(in_node_id))
                .cloned()
                .ok_or_else(|| DispatchError::UnknownEdge(out_node_id.clone(), in_node_id.clone()))?;

            let before_in = store.entity_value(EntityKind::Node, in_node_id);
            let before_out = store.entity_value(EntityKind::Node, out_node_id);

            if let Some(node) = store.node_mut(in_node_id) {
                node.neighbors.remove(out_node_id);
            }
            if let Some(node) = store.node_mut(out_node_id) {
                node.neighbors.remove(in_node_id);
            }

            Ok(Applied {
                history_pair: EditPair {
                    edit: edit.clone(),
                    reverse: Edit::AddEdge {
                        in_node_id: in_node_id.clone(),
                        out_node_id: out_node_id.clone(),
                        in_edge,
                        out_edge,
                    },
                },
                targets: vec![
                    Target { kind: EntityKind::Node, id: in_node_id.clone(), before: before_in },
                    Target { kind: EntityKind::Node, id: out_node_id.clone(), before: before_out },
                ],
                cross_floor_cleanups: Vec::new(),
            })
        }

        Edit::AddEdgeAcrossFloors { in_floor, in_node_id, out_floor, out_node_id, in_edge, out_edge } => {
            // Only the near endpoint lives in this session's store; the far
            // floor's viewers receive the confirmed patch through their own
            // channel.
            let before = store.entity_value(EntityKind::Node, in_node_id);
            store
                .node_mut(in_node_id)
                .ok_or_else(|| DispatchError::UnknownEntity(in_node_id.clone()))?
                .neighbors
                .insert(out_node_id.clone(), out_edge.clone());

            Ok(Applied {
                history_pair: EditPair {
                    edit: edit.clone(),
                    reverse: Edit::DeleteEdgeAcrossFloors {
                        in_floor: in_floor.clone(),
                        in_node_id: in_node_id.clone(),
                        out_floor: out_floor.clone(),
                        out_node_id: out_node_id.clone(),
                    },
                },
                targets: vec![Target { kind: EntityKind::Node, id: in_node_id.clone(), before }],
                cross_floor_cleanups: Vec::new(),
            })
        }

        Edit::DeleteEdgeAcrossFloors { in_floor, in_node_id, out_floor, out_node_id } => {
            let out_edge = store
                .node(in_node_id)
                .and_then(|n| n.neighbors.get(out_node_id))
                .cloned()
                .ok_or_else(|| DispatchError::UnknownEdge(in_node_id.clone(), out_node_id.clone()))?;
            let edge_type = out_edge
                .to_floor_info
                .as_ref()
                .map(|info| info.edge_type)
                .unwrap_or_default();

            let before = store.entity_value(EntityKind::Node, in_node_id);
            if let Some(node) = store.node_mut(in_node_id) {
                node.neighbors.remove(out_node_id);
            }

            Ok(Applied {
                history_pair: EditPair {
                    edit: edit.clone(),
                    reverse: Edit::AddEdgeAcrossFloors {
                        in_floor: in_floor.clone(),
                        in_node_id: in_node_id.clone(),
                        out_floor: out_floor.clone(),
                        out_node_id: out_node_id.clone(),
                        in_edge: Edge::across_floors(in_floor.clone(), edge_type),
                        out_edge,
                    },
                },
                targets: vec![Target { kind: EntityKind::Node, id: in_node_id.clone(), before }],
                cross_floor_cleanups: Vec::new(),
            })
        }

        Edit::UpsertRoom { room_id, room } => {
            let old = store.room(room_id).cloned();
            let before = store.entity_value(EntityKind::Room, room_id);
            store.insert_room(room_id.clone(), room.clone());

            let history_pair = match old {
                Some(old_room) => EditPair {
                    edit: edit.clone(),
                    reverse: Edit::UpsertRoom { room_id: room_id.clone(), room: old_room },
                },
                // Creating a room is not reversible: the markers make undo
                // report it instead of orphaning node memberships.
                None => EditPair {
                    edit: Edit::CreateRoom { room_id: room_id.clone() },
                    reverse: Edit::DeleteRoom { room_id: room_id.clone() },
                },
            };

            Ok(Applied {
                history_pair,
                targets: vec![Target { kind: EntityKind::Room, id: room_id.clone(), before }],
                cross_floor_cleanups: Vec::new(),
            })
        }

        Edit::CreateRoom { .. } | Edit::DeleteRoom { .. } => {
            Err(DispatchError::NotReplayable(edit.name()))
        }
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

async fn persist_edit(
    session: &FloorSession,
    persist: &dyn Persistence,
    edit: &Edit,
    cross_floor_cleanups: &[(EntityId, FloorCode)],
) -> Result<crate::model::Timestamp, PersistError> {
    match edit {
        Edit::MoveNode { node_id, .. } => {
            let node = session
                .store
                .node(node_id)
                .ok_or_else(|| PersistError::Decode(format!("node vanished before save: {node_id}")))?;
            persist.update_node(node_id, node).await
        }
        Edit::AddNode { node_id, .. } => {
            let node = session
                .store
                .node(node_id)
                .ok_or_else(|| PersistError::Decode(format!("node vanished before save: {node_id}")))?;
            persist.add_node(node_id, node).await
        }
        Edit::DeleteNode { node_id } => {
            // Remove the reverse half of every cross-floor edge first so no
            // other floor keeps a dangling reference.
            for (neighbor_id, to_floor) in cross_floor_cleanups {
                debug!(%neighbor_id, %to_floor, "removing cross-floor edge before node delete");
                persist.delete_edge(neighbor_id, node_id).await?;
            }
            persist.delete_node(node_id).await
        }
        Edit::AddEdge { in_node_id, out_node_id, .. }
        | Edit::AddEdgeAcrossFloors { in_node_id, out_node_id, .. } => {
            persist.add_edge(in_node_id, out_node_id).await
        }
        Edit::DeleteEdge { in_node_id, out_node_id }
        | Edit::DeleteEdgeAcrossFloors { in_node_id, out_node_id, .. } => {
            persist.delete_edge(in_node_id, out_node_id).await
        }
        Edit::UpsertRoom { room_id, .. } => {
            let room = session
                .store
                .room(room_id)
                .ok_or_else(|| PersistError::Decode(format!("room vanished before save: {room_id}")))?;
            persist.upsert_room(room_id, room).await
        }
        Edit::CreateRoom { .. } | Edit::DeleteRoom { .. } => {
            Err(PersistError::Decode("room markers are never persisted".into()))
        }
    }
}

// =============================================================================
// FAILURE PATH
// =============================================================================

fn fail(session: &mut FloorSession, edit: &Edit, applied: &Applied, error: &PersistError) {
    warn!(op = edit.name(), error = %error, "persistence call failed");

    match error {
        PersistError::Rejected(message) => session.alerts.error(message.clone()),
        _ => session.alerts.error("Failed to save! Check the logs for the detailed error."),
    }

    let kind = match edit {
        Edit::UpsertRoom { .. } => EntityKind::Room,
        _ => EntityKind::Node,
    };
    match kind {
        EntityKind::Node => {
            session.store.invalidate_nodes();
            session.alerts.info("Refetching the graph...");
        }
        EntityKind::Room => {
            session.store.invalidate_rooms();
            session.alerts.info("Refetching rooms...");
        }
    }

    // The refetch supersedes both the optimistic state and anything queued
    // behind these locks; drop the queue as the locks release so queue
    // entries never outlive a positive lock count.
    for target in &applied.targets {
        if session.locks.unlock(&target.id) == 0 {
            let dropped = session.overwrites.drain_all(&target.id);
            if !dropped.is_empty() {
                debug!(entity_id = %target.id, count = dropped.len(), "discarding queued patches with stale cache");
            }
        }
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

fn broadcast(session: &FloorSession, target: &Target, after: Option<Value>, confirmed: &crate::model::Timestamp) {
    let diff = match (&target.before, after) {
        (Some(before), Some(after)) => patch::diff(before, &after),
        (None, Some(after)) => vec![Operation::Add { path: String::new(), value: after }],
        (Some(_), None) => vec![Operation::Remove { path: String::new() }],
        (None, None) => Vec::new(),
    };
    if diff.is_empty() {
        return;
    }

    let message = SyncMessage::GraphPatch(GraphPatch {
        entity_id: target.id.clone(),
        entity: target.kind,
        diff,
        timestamp: confirmed.clone(),
        sender_id: session.user_id.clone(),
    });

    match &session.channel {
        Some(channel) => {
            channel.send(message);
        }
        None => debug!(entity_id = %target.id, "no sync channel; confirmed patch not broadcast"),
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
