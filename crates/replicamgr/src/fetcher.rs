//! `FetcherManager` (§4.5). Network framing of RPCs and the thread pool
//! that runs worker loops are both out of scope (§1); this module owns the
//! per-leader partition assignment and the per-tick fetch/apply logic, and
//! expects its caller to drive `worker_tick` from whatever executor it
//! likes (one thread per source broker, per §5's "bounded background
//! workers").

use parking_lot::Mutex;
use replicamgr_storage::{LogRecord, TopicPartition};
use std::collections::HashMap;

use crate::types::{BrokerId, LeaderEpoch};

#[derive(Debug, Clone, Copy)]
pub struct InitialFetchState {
    pub leader: BrokerId,
    pub leader_epoch: LeaderEpoch,
    pub fetch_offset: u64,
}

/// Per-partition response from a `LeaderFetchClient::fetch` call (§4.5
/// step 2).
pub enum FetchOutcome {
    Appended {
        records: Vec<LogRecord>,
        next_fetch_offset: u64,
        leader_high_watermark: u64,
    },
    /// Re-initialise the fetch offset via epoch reconciliation.
    OffsetOutOfRange { reinitialize_to: u64 },
    /// Fenced or unknown epoch: pause until the next LeaderAndIsr directive.
    EpochMismatch,
    /// Leadership moved away: drop the partition from this worker.
    NotLeader,
}

/// The out-of-scope collaborator that actually issues the fetch RPC (§1
/// "network framing of RPCs").
pub trait LeaderFetchClient: Send + Sync {
    fn fetch(
        &self,
        leader: BrokerId,
        requests: &[(TopicPartition, u64, LeaderEpoch)],
    ) -> Vec<(TopicPartition, FetchOutcome)>;
}

struct PartitionFetchState {
    leader_epoch: LeaderEpoch,
    fetch_offset: u64,
    paused: bool,
}

#[derive(Default)]
pub struct FetcherManager {
    assignments: Mutex<HashMap<BrokerId, HashMap<TopicPartition, PartitionFetchState>>>,
}

impl FetcherManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fetcher_for_partitions(&self, partitions: HashMap<TopicPartition, InitialFetchState>) {
        let mut assignments = self.assignments.lock();
        for (tp, state) in partitions {
            assignments
                .entry(state.leader)
                .or_default()
                .insert(
                    tp,
                    PartitionFetchState {
                        leader_epoch: state.leader_epoch,
                        fetch_offset: state.fetch_offset,
                        paused: false,
                    },
                );
        }
    }

    pub fn remove_fetcher_for_partitions(&self, partitions: &[TopicPartition]) {
        let mut assignments = self.assignments.lock();
        for worker in assignments.values_mut() {
            for tp in partitions {
                worker.remove(tp);
            }
        }
        assignments.retain(|_, worker| !worker.is_empty());
    }

    pub fn active_leaders(&self) -> Vec<BrokerId> {
        self.assignments.lock().keys().copied().collect()
    }

    /// Idle workers (zero partitions) are shut down by a periodic sweeper
    /// (§4.5 step 3).
    pub fn sweep_idle(&self) -> Vec<BrokerId> {
        let mut assignments = self.assignments.lock();
        let idle: Vec<BrokerId> = assignments
            .iter()
            .filter(|(_, worker)| worker.is_empty())
            .map(|(leader, _)| *leader)
            .collect();
        for leader in &idle {
            assignments.remove(leader);
        }
        idle
    }

    pub fn partition_count(&self, leader: BrokerId) -> usize {
        self.assignments
            .lock()
            .get(&leader)
            .map_or(0, |w| w.len())
    }

    /// Runs one round for `leader`'s worker: build the request, send it,
    /// apply each per-partition outcome. `on_append` lets the caller write
    /// fetched records into the local log without this module depending on
    /// `PartitionState` directly.
    pub fn worker_tick(
        &self,
        leader: BrokerId,
        client: &dyn LeaderFetchClient,
        mut on_append: impl FnMut(&TopicPartition, &[LogRecord], u64, u64),
    ) {
        let requests: Vec<(TopicPartition, u64, LeaderEpoch)> = {
            let assignments = self.assignments.lock();
            let Some(worker) = assignments.get(&leader) else {
                return;
            };
            worker
                .iter()
                .filter(|(_, state)| !state.paused)
                .map(|(tp, state)| (tp.clone(), state.fetch_offset, state.leader_epoch))
                .collect()
        };
        if requests.is_empty() {
            return;
        }

        let responses = client.fetch(leader, &requests);
        let mut assignments = self.assignments.lock();
        let Some(worker) = assignments.get_mut(&leader) else {
            return;
        };

        for (tp, outcome) in responses {
            match outcome {
                FetchOutcome::Appended {
                    records,
                    next_fetch_offset,
                    leader_high_watermark,
                } => {
                    on_append(&tp, &records, next_fetch_offset, leader_high_watermark);
                    if let Some(state) = worker.get_mut(&tp) {
                        state.fetch_offset = next_fetch_offset;
                    }
                }
                FetchOutcome::OffsetOutOfRange { reinitialize_to } => {
                    if let Some(state) = worker.get_mut(&tp) {
                        state.fetch_offset = reinitialize_to;
                    }
                }
                FetchOutcome::EpochMismatch => {
                    if let Some(state) = worker.get_mut(&tp) {
                        state.paused = true;
                    }
                }
                FetchOutcome::NotLeader => {
                    worker.remove(&tp);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicamgr_storage::PartitionId;

    fn tp(p: u32) -> TopicPartition {
        TopicPartition::new("orders", PartitionId::new(p))
    }

    struct StubClient;
    impl LeaderFetchClient for StubClient {
        fn fetch(
            &self,
            _leader: BrokerId,
            requests: &[(TopicPartition, u64, LeaderEpoch)],
        ) -> Vec<(TopicPartition, FetchOutcome)> {
            requests
                .iter()
                .map(|(tp, offset, _)| {
                    (
                        tp.clone(),
                        FetchOutcome::Appended {
                            records: vec![LogRecord::new(None, b"x".to_vec())],
                            next_fetch_offset: offset + 1,
                            leader_high_watermark: offset + 1,
                        },
                    )
                })
                .collect()
        }
    }

    #[test]
    fn worker_tick_advances_fetch_offset() {
        let manager = FetcherManager::new();
        let mut initial = HashMap::new();
        initial.insert(
            tp(0),
            InitialFetchState {
                leader: BrokerId(2),
                leader_epoch: LeaderEpoch(1),
                fetch_offset: 0,
            },
        );
        manager.add_fetcher_for_partitions(initial);

        let mut applied = 0;
        manager.worker_tick(BrokerId(2), &StubClient, |_, records, next_offset, _| {
            applied += records.len();
            assert_eq!(next_offset, 1);
        });
        assert_eq!(applied, 1);
    }

    #[test]
    fn not_leader_drops_partition() {
        struct DropClient;
        impl LeaderFetchClient for DropClient {
            fn fetch(
                &self,
                _leader: BrokerId,
                requests: &[(TopicPartition, u64, LeaderEpoch)],
            ) -> Vec<(TopicPartition, FetchOutcome)> {
                requests
                    .iter()
                    .map(|(tp, _, _)| (tp.clone(), FetchOutcome::NotLeader))
                    .collect()
            }
        }

        let manager = FetcherManager::new();
        let mut initial = HashMap::new();
        initial.insert(
            tp(0),
            InitialFetchState {
                leader: BrokerId(2),
                leader_epoch: LeaderEpoch(1),
                fetch_offset: 0,
            },
        );
        manager.add_fetcher_for_partitions(initial);
        manager.worker_tick(BrokerId(2), &DropClient, |_, _, _, _| {});
        assert_eq!(manager.partition_count(BrokerId(2)), 0);
    }

    #[test]
    fn sweep_idle_removes_empty_workers() {
        let manager = FetcherManager::new();
        let mut initial = HashMap::new();
        initial.insert(
            tp(0),
            InitialFetchState {
                leader: BrokerId(2),
                leader_epoch: LeaderEpoch(1),
                fetch_offset: 0,
            },
        );
        manager.add_fetcher_for_partitions(initial);
        manager.remove_fetcher_for_partitions(&[tp(0)]);
        assert!(manager.active_leaders().is_empty());
    }
}
