//! Per-entity mutation locks and the overwrite queue.
//!
//! DESIGN
//! ======
//! A lock is a counter of this client's in-flight mutations for one entity
//! id: incremented when a persistence call is issued, decremented when it
//! settles. While the count is positive, inbound remote patches for that
//! entity are buffered in the overwrite queue instead of applied, and are
//! replayed in timestamp order once the lock drains.
//!
//! INVARIANT
//! =========
//! Queue entries exist only while the entity's lock count is positive.
//! `LockRegistry::unlock` never takes a count below zero.

use std::collections::HashMap;

use crate::model::{EntityId, EntityKind, Timestamp};
use crate::patch::Operation;

// =============================================================================
// LOCK REGISTRY
// =============================================================================

/// Entity id → count of in-flight local mutations.
#[derive(Debug, Default)]
pub struct LockRegistry {
    counts: HashMap<EntityId, u32>,
}

impl LockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the lock count for `id`.
    pub fn lock(&mut self, id: &str) {
        *self.counts.entry(id.to_owned()).or_insert(0) += 1;
    }

    /// Decrement the lock count for `id`, saturating at zero, and return
    /// the new count. The entry is dropped when it reaches zero.
    pub fn unlock(&mut self, id: &str) -> u32 {
        let Some(count) = self.counts.get_mut(id) else {
            tracing::warn!(entity_id = %id, "unlock without matching lock");
            return 0;
        };
        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(id);
        }
        remaining
    }

    /// Current count for `id` (zero when absent).
    #[must_use]
    pub fn count(&self, id: &str) -> u32 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    /// True while any local mutation to `id` awaits confirmation.
    #[must_use]
    pub fn is_locked(&self, id: &str) -> bool {
        self.count(id) > 0
    }
}

// =============================================================================
// OVERWRITE QUEUE
// =============================================================================

/// A remote patch buffered while its target entity was locked.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedPatch {
    pub kind: EntityKind,
    pub ops: Vec<Operation>,
    pub timestamp: Timestamp,
    pub sender_id: String,
}

/// Entity id → remote patches awaiting lock release, kept in ascending
/// timestamp order.
#[derive(Debug, Default)]
pub struct OverwriteQueue {
    pending: HashMap<EntityId, Vec<QueuedPatch>>,
}

impl OverwriteQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a remote patch for a locked entity. Insertion keeps the
    /// per-entity list sorted by timestamp; equal timestamps keep arrival
    /// order.
    pub fn enqueue(&mut self, id: &str, patch: QueuedPatch) {
        let queue = self.pending.entry(id.to_owned()).or_default();
        let at = queue.partition_point(|p| p.timestamp <= patch.timestamp);
        queue.insert(at, patch);
    }

    /// Remove and return every queued patch for `id` strictly older than
    /// `than`, in ascending timestamp order.
    pub fn drain_older(&mut self, id: &str, than: &Timestamp) -> Vec<QueuedPatch> {
        let Some(queue) = self.pending.get_mut(id) else {
            return Vec::new();
        };
        let split = queue.partition_point(|p| p.timestamp < *than);
        let older: Vec<QueuedPatch> = queue.drain(..split).collect();
        if queue.is_empty() {
            self.pending.remove(id);
        }
        older
    }

    /// Remove and return everything queued for `id`, in ascending
    /// timestamp order. Called when the lock count reaches zero.
    pub fn drain_all(&mut self, id: &str) -> Vec<QueuedPatch> {
        self.pending.remove(id).unwrap_or_default()
    }

    /// Number of patches queued for `id`.
    #[must_use]
    pub fn len(&self, id: &str) -> usize {
        self.pending.get(id).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self, id: &str) -> bool {
        self.len(id) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(ts: &str, sender: &str) -> QueuedPatch {
        QueuedPatch {
            kind: EntityKind::Node,
            ops: Vec::new(),
            timestamp: Timestamp::from(ts),
            sender_id: sender.to_owned(),
        }
    }

    #[test]
    fn lock_count_tracks_nesting() {
        let mut locks = LockRegistry::new();
        assert!(!locks.is_locked("n1"));

        locks.lock("n1");
        locks.lock("n1");
        assert_eq!(locks.count("n1"), 2);

        assert_eq!(locks.unlock("n1"), 1);
        assert_eq!(locks.unlock("n1"), 0);
        assert!(!locks.is_locked("n1"));
    }

    #[test]
    fn unlock_never_goes_negative() {
        let mut locks = LockRegistry::new();
        assert_eq!(locks.unlock("n1"), 0);
        locks.lock("n1");
        locks.unlock("n1");
        assert_eq!(locks.unlock("n1"), 0);
        assert_eq!(locks.count("n1"), 0);
    }

    #[test]
    fn enqueue_keeps_timestamp_order() {
        let mut queue = OverwriteQueue::new();
        queue.enqueue("n1", patch("2024-01-01T00:00:03Z", "u1"));
        queue.enqueue("n1", patch("2024-01-01T00:00:01Z", "u2"));
        queue.enqueue("n1", patch("2024-01-01T00:00:02Z", "u3"));

        let all = queue.drain_all("n1");
        let senders: Vec<&str> = all.iter().map(|p| p.sender_id.as_str()).collect();
        assert_eq!(senders, ["u2", "u3", "u1"]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut queue = OverwriteQueue::new();
        queue.enqueue("n1", patch("2024-01-01T00:00:01Z", "first"));
        queue.enqueue("n1", patch("2024-01-01T00:00:01Z", "second"));

        let all = queue.drain_all("n1");
        assert_eq!(all[0].sender_id, "first");
        assert_eq!(all[1].sender_id, "second");
    }

    #[test]
    fn drain_older_splits_at_confirmation() {
        let mut queue = OverwriteQueue::new();
        queue.enqueue("n1", patch("2024-01-01T00:00:01Z", "old"));
        queue.enqueue("n1", patch("2024-01-01T00:00:03Z", "new"));

        let older = queue.drain_older("n1", &Timestamp::from("2024-01-01T00:00:02Z"));
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].sender_id, "old");
        assert_eq!(queue.len("n1"), 1);
    }

    #[test]
    fn drain_older_is_strict() {
        let mut queue = OverwriteQueue::new();
        queue.enqueue("n1", patch("2024-01-01T00:00:02Z", "same"));

        let older = queue.drain_older("n1", &Timestamp::from("2024-01-01T00:00:02Z"));
        assert!(older.is_empty());
        assert_eq!(queue.len("n1"), 1);
    }

    #[test]
    fn drain_all_empties_entity() {
        let mut queue = OverwriteQueue::new();
        queue.enqueue("n1", patch("2024-01-01T00:00:01Z", "u1"));
        assert!(!queue.is_empty("n1"));
        queue.drain_all("n1");
        assert!(queue.is_empty("n1"));
    }
}
