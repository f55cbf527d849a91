//! Cursor smoothing — queued replay of remote cursors, throttled sends.
//!
//! DESIGN
//! ======
//! Remote cursor batches are not rendered as they arrive: each sender has
//! a queue, and one position is dequeued per tick so motion replays
//! smoothly at the tick rate instead of jumping to the latest sample.
//! Outbound positions are batched and released at the same fixed interval.
//! Both sides take explicit `Instant`s so tests control time.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::sync::message::CursorInfo;

// =============================================================================
// INBOUND REPLAY
// =============================================================================

/// Per-sender queues of remote cursor positions.
#[derive(Debug, Default)]
pub struct CursorFeeds {
    queues: HashMap<String, VecDeque<CursorInfo>>,
    current: HashMap<String, CursorInfo>,
}

impl CursorFeeds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sender's batch to their queue.
    pub fn push(&mut self, sender_id: &str, batch: Vec<CursorInfo>) {
        self.queues
            .entry(sender_id.to_owned())
            .or_default()
            .extend(batch);
    }

    /// Advance every sender's displayed position by one queued sample.
    /// Senders with an empty queue keep their last position.
    pub fn tick(&mut self) {
        let current = &mut self.current;
        self.queues.retain(|sender, queue| {
            if let Some(info) = queue.pop_front() {
                current.insert(sender.clone(), info);
            }
            !queue.is_empty()
        });
    }

    /// The position currently displayed for a sender.
    #[must_use]
    pub fn current(&self, sender_id: &str) -> Option<&CursorInfo> {
        self.current.get(sender_id)
    }

    #[must_use]
    pub fn displayed(&self) -> &HashMap<String, CursorInfo> {
        &self.current
    }

    /// Forget a departed peer entirely.
    pub fn remove(&mut self, sender_id: &str) {
        self.queues.remove(sender_id);
        self.current.remove(sender_id);
    }
}

// =============================================================================
// OUTBOUND THROTTLE
// =============================================================================

/// Accumulates local cursor samples and releases them as one batch per
/// interval.
#[derive(Debug)]
pub struct CursorThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    pending: Vec<CursorInfo>,
}

impl CursorThrottle {
    #[must_use]
    pub fn new(interval_ms: u64) -> Self {
        Self { interval: Duration::from_millis(interval_ms), last_sent: None, pending: Vec::new() }
    }

    /// Record a local cursor sample.
    pub fn push(&mut self, info: CursorInfo) {
        self.pending.push(info);
    }

    /// Take the pending batch if the interval has elapsed.
    pub fn take_ready(&mut self) -> Option<Vec<CursorInfo>> {
        self.take_ready_at(Instant::now())
    }

    fn take_ready_at(&mut self, now: Instant) -> Option<Vec<CursorInfo>> {
        if self.pending.is_empty() {
            return None;
        }
        if let Some(last) = self.last_sent {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_sent = Some(now);
        Some(std::mem::take(&mut self.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Point;

    fn at(x: f64) -> CursorInfo {
        CursorInfo::at(Point { x, y: 0.0 })
    }

    #[test]
    fn feeds_dequeue_one_per_tick() {
        let mut feeds = CursorFeeds::new();
        feeds.push("u1", vec![at(1.0), at(2.0), at(3.0)]);

        feeds.tick();
        assert!((feeds.current("u1").unwrap().cursor_pos.x - 1.0).abs() < f64::EPSILON);
        feeds.tick();
        assert!((feeds.current("u1").unwrap().cursor_pos.x - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exhausted_feed_keeps_last_position() {
        let mut feeds = CursorFeeds::new();
        feeds.push("u1", vec![at(1.0)]);
        feeds.tick();
        feeds.tick();
        feeds.tick();
        assert!((feeds.current("u1").unwrap().cursor_pos.x - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn remove_clears_queue_and_display() {
        let mut feeds = CursorFeeds::new();
        feeds.push("u1", vec![at(1.0)]);
        feeds.tick();
        feeds.remove("u1");
        assert!(feeds.current("u1").is_none());
    }

    #[test]
    fn throttle_batches_within_interval() {
        let mut throttle = CursorThrottle::new(20);
        let start = Instant::now();

        throttle.push(at(1.0));
        let first = throttle.take_ready_at(start).unwrap();
        assert_eq!(first.len(), 1);

        // Within the interval: samples accumulate, nothing released.
        throttle.push(at(2.0));
        throttle.push(at(3.0));
        assert!(throttle.take_ready_at(start + Duration::from_millis(5)).is_none());

        let batch = throttle
            .take_ready_at(start + Duration::from_millis(25))
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn throttle_with_nothing_pending_releases_nothing() {
        let mut throttle = CursorThrottle::new(20);
        assert!(throttle.take_ready_at(Instant::now()).is_none());
    }
}
