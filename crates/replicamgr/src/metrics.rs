//! "metrics counters are monotonic and atomic" (§5). No external sink —
//! metrics sinks are an explicit Non-goal (§1) — these are the counters
//! themselves, for a caller to scrape however it likes.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ReplicaManagerMetrics {
    pub records_appended: AtomicU64,
    pub fetch_requests_served: AtomicU64,
    pub isr_expansions: AtomicU64,
    pub isr_shrinks: AtomicU64,
    pub purgatory_expirations: AtomicU64,
    pub purgatory_completions: AtomicU64,
}

impl ReplicaManagerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_append(&self, count: u64) {
        self.records_appended.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fetch(&self) {
        self.fetch_requests_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_isr_expansion(&self) {
        self.isr_expansions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_isr_shrink(&self) {
        self.isr_shrinks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purgatory_expiration(&self, count: u64) {
        self.purgatory_expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_purgatory_completion(&self, count: u64) {
        self.purgatory_completions.fetch_add(count, Ordering::Relaxed);
    }
}
