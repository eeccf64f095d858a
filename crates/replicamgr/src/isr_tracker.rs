//! `IsrChangeTracker` (§4.6): buffers changed topic-partitions and decides
//! when to flush them to the metadata store. The actual 2.5s periodic
//! driver lives with the caller (`ReplicaManager` owns the background
//! thread); this type only holds the buffer and the propagate-now decision,
//! so it can be exercised with a `ManualClock` in tests.

use parking_lot::Mutex;
use replicamgr_storage::TopicPartition;
use std::collections::HashSet;

pub struct IsrChangeTracker {
    buffer: Mutex<HashSet<TopicPartition>>,
    last_change_ms: Mutex<i64>,
    last_propagation_ms: Mutex<i64>,
    min_interval_ms: i64,
    max_interval_ms: i64,
}

impl IsrChangeTracker {
    pub fn new(min_interval_ms: i64, max_interval_ms: i64, now_ms: i64) -> Self {
        Self {
            buffer: Mutex::new(HashSet::new()),
            last_change_ms: Mutex::new(now_ms),
            last_propagation_ms: Mutex::new(now_ms),
            min_interval_ms,
            max_interval_ms,
        }
    }

    pub fn mark_changed(&self, tp: TopicPartition, now_ms: i64) {
        self.buffer.lock().insert(tp);
        *self.last_change_ms.lock() = now_ms;
    }

    /// True when either no change occurred in the last `min_interval_ms`, or
    /// it has been at least `max_interval_ms` since the last propagation.
    pub fn should_propagate(&self, now_ms: i64) -> bool {
        if self.buffer.lock().is_empty() {
            return false;
        }
        let quiet = now_ms - *self.last_change_ms.lock() >= self.min_interval_ms;
        let overdue = now_ms - *self.last_propagation_ms.lock() >= self.max_interval_ms;
        quiet || overdue
    }

    /// Drains the buffer atomically and records the propagation time.
    /// Returns `None` if there was nothing to propagate.
    pub fn drain_if_due(&self, now_ms: i64) -> Option<Vec<TopicPartition>> {
        if !self.should_propagate(now_ms) {
            return None;
        }
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return None;
        }
        let drained: Vec<TopicPartition> = buffer.drain().collect();
        *self.last_propagation_ms.lock() = now_ms;
        Some(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicamgr_storage::PartitionId;

    fn tp(p: u32) -> TopicPartition {
        TopicPartition::new("orders", PartitionId::new(p))
    }

    #[test]
    fn propagates_after_quiet_period() {
        let tracker = IsrChangeTracker::new(5_000, 60_000, 0);
        tracker.mark_changed(tp(0), 1_000);
        assert!(!tracker.should_propagate(2_000));
        assert!(tracker.should_propagate(6_001));
        let drained = tracker.drain_if_due(6_001).unwrap();
        assert_eq!(drained, vec![tp(0)]);
        assert!(tracker.drain_if_due(6_001).is_none());
    }

    #[test]
    fn propagates_when_overdue_despite_recent_changes() {
        let tracker = IsrChangeTracker::new(5_000, 60_000, 0);
        tracker.mark_changed(tp(0), 0);
        tracker.mark_changed(tp(1), 59_000);
        assert!(tracker.should_propagate(60_001));
        let drained = tracker.drain_if_due(60_001).unwrap();
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn empty_buffer_never_propagates() {
        let tracker = IsrChangeTracker::new(5_000, 60_000, 0);
        assert!(!tracker.should_propagate(100_000));
    }
}
