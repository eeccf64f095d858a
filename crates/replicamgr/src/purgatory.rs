//! Generic delayed-operation engine (§4.4, §9). Implemented as a watch map
//! keyed by `(topic,partition)` plus a deadline-ordered list, rather than a
//! true hierarchical timing wheel — the completion/expiry race is resolved
//! by a single atomic flag on each op, matching the "at most once" guarantee
//! (§8 P5) without coupling to any async runtime.

use parking_lot::Mutex;
use replicamgr_storage::TopicPartition;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::Clock;

/// One delayed operation. `T` carries whatever per-op state the caller
/// needs (e.g. the produce request's per-partition required offsets).
pub struct DelayedOp<T> {
    pub payload: T,
    deadline_ms: i64,
    completed: AtomicBool,
    try_complete: Box<dyn Fn(&T) -> bool + Send + Sync>,
    on_complete: Box<dyn Fn(&T) + Send + Sync>,
    on_expire: Box<dyn Fn(&T) + Send + Sync>,
}

impl<T> DelayedOp<T> {
    pub fn new(
        payload: T,
        deadline_ms: i64,
        try_complete: impl Fn(&T) -> bool + Send + Sync + 'static,
        on_complete: impl Fn(&T) + Send + Sync + 'static,
        on_expire: impl Fn(&T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            payload,
            deadline_ms,
            completed: AtomicBool::new(false),
            try_complete: Box::new(try_complete),
            on_complete: Box::new(on_complete),
            on_expire: Box::new(on_expire),
        }
    }

    fn try_complete(&self) -> bool {
        (self.try_complete)(&self.payload)
    }

    /// Wins the completion/expiry race at most once (§8 P5).
    fn force_complete(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

struct State<T> {
    watchers: HashMap<TopicPartition, Vec<Arc<DelayedOp<T>>>>,
    all: Vec<Arc<DelayedOp<T>>>,
    requests_since_purge: usize,
}

/// One instance per operation kind (Produce, Fetch, DeleteRecords,
/// ElectLeader — §2.5).
pub struct Purgatory<T> {
    state: Mutex<State<T>>,
    purge_interval_requests: usize,
}

impl<T> Purgatory<T> {
    pub fn new(purge_interval_requests: usize) -> Self {
        Self {
            state: Mutex::new(State {
                watchers: HashMap::new(),
                all: Vec::new(),
                requests_since_purge: 0,
            }),
            purge_interval_requests,
        }
    }

    /// `tryCompleteElseWatch`: evaluates `tryComplete` atomically; if false,
    /// registers the op under every key. Returns true if it completed
    /// immediately.
    pub fn try_complete_else_watch(&self, op: Arc<DelayedOp<T>>, keys: &[TopicPartition]) -> bool {
        if op.try_complete() && op.force_complete() {
            (op.on_complete)(&op.payload);
            return true;
        }

        let mut state = self.state.lock();
        for key in keys {
            state
                .watchers
                .entry(key.clone())
                .or_default()
                .push(op.clone());
        }
        state.all.push(op);
        state.requests_since_purge += 1;
        if state.requests_since_purge >= self.purge_interval_requests {
            self.purge_locked(&mut state);
        }
        false
    }

    /// `checkAndComplete`: re-evaluates every op watched under `key` and
    /// completes those whose `tryComplete` now returns true.
    pub fn check_and_complete(&self, key: &TopicPartition) -> usize {
        let candidates = {
            let state = self.state.lock();
            state.watchers.get(key).cloned().unwrap_or_default()
        };
        let mut completed = 0;
        for op in candidates {
            if op.is_completed() {
                continue;
            }
            if op.try_complete() && op.force_complete() {
                (op.on_complete)(&op.payload);
                completed += 1;
            }
        }
        completed
    }

    /// Expires ops whose deadline has passed; `onExpire` wins the race
    /// against a concurrent completion.
    pub fn expire_overdue(&self, clock: &dyn Clock) -> usize {
        let now = clock.now_ms();
        let overdue: Vec<Arc<DelayedOp<T>>> = {
            let state = self.state.lock();
            state
                .all
                .iter()
                .filter(|op| !op.is_completed() && op.deadline_ms <= now)
                .cloned()
                .collect()
        };
        let mut expired = 0;
        for op in overdue {
            if op.force_complete() {
                (op.on_expire)(&op.payload);
                expired += 1;
            }
        }
        expired
    }

    /// Periodic purge of completed/expired entries, bounded by
    /// `purgeIntervalRequests` (§4.4).
    pub fn purge(&self) {
        let mut state = self.state.lock();
        self.purge_locked(&mut state);
    }

    fn purge_locked(&self, state: &mut State<T>) {
        state.all.retain(|op| !op.is_completed());
        for watchers in state.watchers.values_mut() {
            watchers.retain(|op| !op.is_completed());
        }
        state.watchers.retain(|_, v| !v.is_empty());
        state.requests_since_purge = 0;
    }

    pub fn watched_count(&self) -> usize {
        self.state.lock().all.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use parking_lot::Mutex as PMutex;
    use replicamgr_storage::PartitionId;
    use std::sync::atomic::AtomicUsize;

    fn tp() -> TopicPartition {
        TopicPartition::new("orders", PartitionId::new(0))
    }

    #[test]
    fn completes_immediately_when_predicate_already_true() {
        let purgatory: Purgatory<()> = Purgatory::new(1_000);
        let completions = Arc::new(AtomicUsize::new(0));
        let c = completions.clone();
        let op = Arc::new(DelayedOp::new(
            (),
            10_000,
            |_| true,
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        ));
        let completed = purgatory.try_complete_else_watch(op, &[tp()]);
        assert!(completed);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(purgatory.watched_count(), 0);
    }

    #[test]
    fn watches_then_completes_on_check() {
        let purgatory: Purgatory<Arc<PMutex<bool>>> = Purgatory::new(1_000);
        let ready = Arc::new(PMutex::new(false));
        let completions = Arc::new(AtomicUsize::new(0));
        let c = completions.clone();
        let op = Arc::new(DelayedOp::new(
            ready.clone(),
            10_000,
            |ready| *ready.lock(),
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        ));

        let completed = purgatory.try_complete_else_watch(op, &[tp()]);
        assert!(!completed);
        assert_eq!(purgatory.watched_count(), 1);

        *ready.lock() = true;
        let n = purgatory.check_and_complete(&tp());
        assert_eq!(n, 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expires_overdue_ops_exactly_once() {
        let purgatory: Purgatory<()> = Purgatory::new(1_000);
        let expirations = Arc::new(AtomicUsize::new(0));
        let e = expirations.clone();
        let op = Arc::new(DelayedOp::new(
            (),
            5_000,
            |_| false,
            |_| {},
            move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            },
        ));
        purgatory.try_complete_else_watch(op, &[tp()]);

        let clock = ManualClock::new(0);
        assert_eq!(purgatory.expire_overdue(&clock), 0);
        clock.set_ms(5_001);
        assert_eq!(purgatory.expire_overdue(&clock), 1);
        assert_eq!(expirations.load(Ordering::SeqCst), 1);
        // Second pass must not double-expire.
        assert_eq!(purgatory.expire_overdue(&clock), 0);
    }

    #[test]
    fn purge_drops_completed_entries() {
        let purgatory: Purgatory<()> = Purgatory::new(1);
        let op = Arc::new(DelayedOp::new((), 10_000, |_| false, |_| {}, |_| {}));
        purgatory.try_complete_else_watch(op.clone(), &[tp()]);
        op.force_complete();
        purgatory.purge();
        assert_eq!(purgatory.watched_count(), 0);
    }
}
