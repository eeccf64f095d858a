//! Tunables named throughout §4/§5. Loading these from a file or CLI is an
//! explicit Non-goal (§1); this is a plain value struct with Kafka-like
//! defaults.

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaManagerConfig {
    /// Minimum ISR size required to accept an `acks=-1` produce (§4.2).
    pub min_in_sync_replicas: usize,
    /// A follower falling behind by more than this is evicted from ISR
    /// (§4.2 `maybeShrinkIsr`, §8 P6).
    pub replica_lag_time_max_ms: i64,
    /// HW checkpoint flush interval (§4.8).
    pub replica_high_watermark_checkpoint_interval_ms: i64,
    /// Bound on purgatory memory growth (§4.4).
    pub purge_interval_requests: usize,
    /// ISR propagation coalescing timer, lower bound (§4.6: "no change in
    /// the last 5s").
    pub isr_propagation_min_interval_ms: i64,
    /// ISR propagation coalescing timer, upper bound (§4.6: "at least every
    /// 60s").
    pub isr_propagation_max_interval_ms: i64,
    /// §4.7: halt the process on log-dir failure instead of marking the
    /// partition Offline.
    pub halt_broker_on_dir_failure: bool,
    /// Interval the ISR-shrink sweep and idle-fetcher-worker sweeper run at.
    pub replica_lag_check_interval_ms: i64,
}

impl Default for ReplicaManagerConfig {
    fn default() -> Self {
        Self {
            min_in_sync_replicas: 1,
            replica_lag_time_max_ms: 30_000,
            replica_high_watermark_checkpoint_interval_ms: 5_000,
            purge_interval_requests: 1_000,
            isr_propagation_min_interval_ms: 5_000,
            isr_propagation_max_interval_ms: 60_000,
            halt_broker_on_dir_failure: false,
            replica_lag_check_interval_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_defaults() {
        let config = ReplicaManagerConfig::default();
        assert_eq!(config.min_in_sync_replicas, 1);
        assert_eq!(config.isr_propagation_max_interval_ms, 60_000);
    }
}
