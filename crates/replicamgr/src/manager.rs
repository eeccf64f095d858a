//! `ReplicaManager` façade (§4.1). Orchestrates `HostedMap`, `PartitionState`,
//! the four purgatories, the fetcher manager, the ISR tracker and the
//! selector. Background drivers (checkpointer tick, ISR-propagation tick,
//! ISR-shrink sweep, purgatory expiry sweep, fetcher worker ticks) are
//! exposed as plain methods rather than spawned threads, since thread pools
//! are an explicit out-of-scope collaborator (§1); a caller wires them to
//! whatever executor it has (see `src/bin/demo.rs`).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use replicamgr_storage::{
    AppendResult, LogRecord, LogStore, MetadataCache, ReadResult, TopicPartition,
};

use crate::clock::Clock;
use crate::config::ReplicaManagerConfig;
use crate::error::ReplicaManagerError;
use crate::fetcher::FetcherManager;
use crate::hosted_map::{Hosted, HostedMap};
use crate::isr_tracker::IsrChangeTracker;
use crate::metrics::ReplicaManagerMetrics;
use crate::partition::{Isolation, PartitionState};
use crate::purgatory::{DelayedOp, Purgatory};
use crate::selector::{ClientMetadata, ReplicaSelector, ReplicaView};
use crate::types::{BrokerId, ControllerEpoch, LeaderEpoch};

/// Per-partition instruction inside a `LeaderAndIsr` directive (§4.1).
#[derive(Debug, Clone)]
pub struct PartitionDirective {
    pub topic_partition: TopicPartition,
    pub leader: BrokerId,
    pub leader_epoch: LeaderEpoch,
    pub isr: Vec<BrokerId>,
    pub replicas: Vec<BrokerId>,
    pub is_new: bool,
}

pub type PartitionResults = HashMap<TopicPartition, Result<(), ReplicaManagerError>>;

/// Factory for a partition's local log, supplied by the (out-of-scope)
/// LogManager (§1).
pub trait LogFactory: Send + Sync {
    fn create(&self, tp: &TopicPartition) -> Box<dyn LogStore>;
}

/// Looks up a previously checkpointed high watermark for a partition whose
/// local log does not exist yet on this node (§4.2 makeLeader: "record HW
/// from the checkpoint on first create"). Consulted only at local-log
/// creation time, never on a subsequent re-election of an already-hosted
/// partition.
pub trait HighWatermarkSource: Send + Sync {
    fn checkpointed_hw(&self, tp: &TopicPartition) -> Option<u64>;
}

/// Default source for callers with no checkpoint file to read (tests, the
/// demo binary's first run).
pub struct NoCheckpoints;
impl HighWatermarkSource for NoCheckpoints {
    fn checkpointed_hw(&self, _tp: &TopicPartition) -> Option<u64> {
        None
    }
}

struct ProducePayload {
    required_offsets: Vec<(TopicPartition, u64)>,
    partial_results: HashMap<TopicPartition, Result<AppendResult, ReplicaManagerError>>,
    on_response:
        Mutex<Option<Box<dyn FnOnce(HashMap<TopicPartition, Result<AppendResult, ReplicaManagerError>>) + Send>>>,
    hosted: Arc<HostedMap>,
}

/// A single partition's half of a `fetch` call (§4.1 fetchMessages). `max_bytes`
/// is the per-partition cap §3's `FetchMetadata` names alongside the
/// request-wide one.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub replica_id: i64,
    pub fetch_offset: u64,
    pub current_leader_epoch: Option<LeaderEpoch>,
    pub max_bytes: usize,
    pub isolation: Isolation,
    pub min_one_message: bool,
}

struct FetchPayload {
    requests: HashMap<TopicPartition, FetchRequest>,
    min_bytes: usize,
    max_bytes: usize,
    hard_max_bytes_limit: bool,
    hosted: Arc<HostedMap>,
    on_response:
        Mutex<Option<Box<dyn FnOnce(HashMap<TopicPartition, Result<ReadResult, ReplicaManagerError>>) + Send>>>,
}

/// §4.1 "Cap bytes": partitions are read against a shared request-wide byte
/// budget (`payload.max_bytes`), each also bounded by its own per-partition
/// cap. Once the budget is exhausted, further partitions read nothing more
/// — except the first partition to return a non-empty read, which is let
/// through even over budget so a request always makes progress, unless
/// `hard_max_bytes_limit` disables that exemption. Partitions are visited in
/// a fixed (sorted) order so which partition gets the exemption is
/// deterministic across retries of the same payload.
fn fetch_read_all(payload: &FetchPayload) -> (usize, HashMap<TopicPartition, Result<ReadResult, ReplicaManagerError>>) {
    let mut readable = 0usize;
    let mut out = HashMap::new();
    let mut remaining = payload.max_bytes;
    let mut exempted_a_partition = false;

    let mut tps: Vec<&TopicPartition> = payload.requests.keys().collect();
    tps.sort();

    for tp in tps {
        let req = &payload.requests[tp];
        let (budget, using_exemption) = if remaining > 0 {
            (remaining.min(req.max_bytes), false)
        } else if !payload.hard_max_bytes_limit && !exempted_a_partition {
            (req.max_bytes, true)
        } else {
            (0, false)
        };

        let result = match payload.hosted.get(tp) {
            Hosted::Online(state) => state.read_records(
                req.fetch_offset,
                req.current_leader_epoch,
                budget,
                req.isolation,
                true,
                req.min_one_message,
            ),
            Hosted::Offline => Err(ReplicaManagerError::KafkaStorageError {
                topic: tp.topic.clone(),
                partition: tp.partition.as_u32(),
                reason: "partition offline".to_string(),
            }),
            Hosted::None => Err(ReplicaManagerError::UnknownTopicOrPartition {
                topic: tp.topic.clone(),
                partition: tp.partition.as_u32(),
            }),
        };
        if let Ok(read) = &result {
            let bytes = read.records.iter().map(|r| r.record.value.len()).sum::<usize>();
            readable += bytes;
            if using_exemption {
                if bytes > 0 {
                    exempted_a_partition = true;
                }
            } else {
                remaining = remaining.saturating_sub(bytes);
            }
        }
        out.insert(tp.clone(), result);
    }
    (readable, out)
}

fn fetch_has_error(payload: &FetchPayload) -> bool {
    payload
        .requests
        .keys()
        .any(|tp| matches!(payload.hosted.get(tp), Hosted::Offline | Hosted::None))
}

struct DeleteRecordsPayload {
    target: HashMap<TopicPartition, u64>,
    hosted: Arc<HostedMap>,
    on_response: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// §4.1 electLeaders election strategy (wire-visible, passed through to the
/// out-of-scope controller — §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionType {
    Preferred,
    Unclean,
}

/// A `DelayedOp` watching for the controller's response to an election
/// request to land locally as a leader-epoch bump (§4.1 electLeaders is a
/// "thin dispatcher... to controller"; this node only observes the outcome).
struct ElectLeaderPayload {
    initial_epochs: HashMap<TopicPartition, LeaderEpoch>,
    hosted: Arc<HostedMap>,
    on_response:
        Mutex<Option<Box<dyn FnOnce(HashMap<TopicPartition, Result<LeaderEpoch, ReplicaManagerError>>) + Send>>>,
}

fn elect_leader_results(
    payload: &ElectLeaderPayload,
) -> HashMap<TopicPartition, Result<LeaderEpoch, ReplicaManagerError>> {
    payload
        .initial_epochs
        .keys()
        .map(|tp| {
            let result = match payload.hosted.get(tp) {
                Hosted::Online(state) if state.is_local_leader() => Ok(state.leader_epoch()),
                Hosted::Online(_) => Err(ReplicaManagerError::NotLeaderForPartition {
                    topic: tp.topic.clone(),
                    partition: tp.partition.as_u32(),
                }),
                Hosted::Offline => Err(ReplicaManagerError::KafkaStorageError {
                    topic: tp.topic.clone(),
                    partition: tp.partition.as_u32(),
                    reason: "partition offline".to_string(),
                }),
                Hosted::None => Err(ReplicaManagerError::UnknownTopicOrPartition {
                    topic: tp.topic.clone(),
                    partition: tp.partition.as_u32(),
                }),
            };
            (tp.clone(), result)
        })
        .collect()
}

pub struct ReplicaManager {
    local_broker_id: BrokerId,
    config: ReplicaManagerConfig,
    controller_epoch: AtomicU64,
    is_shutting_down: AtomicBool,
    hosted: Arc<HostedMap>,
    metadata_cache: Arc<dyn MetadataCache>,
    selector: Box<dyn ReplicaSelector>,
    clock: Arc<dyn Clock>,
    metrics: ReplicaManagerMetrics,
    fetcher_manager: FetcherManager,
    /// Alter-log-dir fetcher (§2 item 6, §4.5): assignments keyed by the
    /// local broker id, since the "source" of a dir move is this node's own
    /// current log, not a remote leader.
    dir_move_fetcher_manager: FetcherManager,
    isr_tracker: IsrChangeTracker,
    produce_purgatory: Purgatory<ProducePayload>,
    fetch_purgatory: Purgatory<FetchPayload>,
    delete_records_purgatory: Purgatory<DeleteRecordsPayload>,
    elect_leader_purgatory: Purgatory<ElectLeaderPayload>,
    checkpointer_started: AtomicBool,
}

impl ReplicaManager {
    pub fn new(
        local_broker_id: BrokerId,
        config: ReplicaManagerConfig,
        metadata_cache: Arc<dyn MetadataCache>,
        selector: Box<dyn ReplicaSelector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            local_broker_id,
            isr_tracker: IsrChangeTracker::new(
                config.isr_propagation_min_interval_ms,
                config.isr_propagation_max_interval_ms,
                now,
            ),
            produce_purgatory: Purgatory::new(config.purge_interval_requests),
            fetch_purgatory: Purgatory::new(config.purge_interval_requests),
            delete_records_purgatory: Purgatory::new(config.purge_interval_requests),
            elect_leader_purgatory: Purgatory::new(config.purge_interval_requests),
            config,
            controller_epoch: AtomicU64::new(0),
            is_shutting_down: AtomicBool::new(false),
            hosted: Arc::new(HostedMap::new()),
            metadata_cache,
            selector,
            clock,
            metrics: ReplicaManagerMetrics::new(),
            fetcher_manager: FetcherManager::new(),
            dir_move_fetcher_manager: FetcherManager::new(),
            checkpointer_started: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> &ReplicaManagerMetrics {
        &self.metrics
    }

    pub fn hosted(&self) -> &HostedMap {
        &self.hosted
    }

    pub fn fetcher_manager(&self) -> &FetcherManager {
        &self.fetcher_manager
    }

    pub fn dir_move_fetcher_manager(&self) -> &FetcherManager {
        &self.dir_move_fetcher_manager
    }

    pub fn isr_tracker(&self) -> &IsrChangeTracker {
        &self.isr_tracker
    }

    pub fn controller_epoch(&self) -> ControllerEpoch {
        ControllerEpoch(self.controller_epoch.load(Ordering::SeqCst))
    }

    pub fn checkpointer_started(&self) -> bool {
        self.checkpointer_started.load(Ordering::SeqCst)
    }

    fn topic(tp: &TopicPartition) -> &str {
        &tp.topic
    }

    fn partition(tp: &TopicPartition) -> u32 {
        tp.partition.as_u32()
    }

    /// §4.1 becomeLeaderOrFollower.
    pub fn become_leader_or_follower(
        &self,
        _controller_id: BrokerId,
        controller_epoch: ControllerEpoch,
        directives: Vec<PartitionDirective>,
        log_factory: &dyn LogFactory,
        hw_source: &dyn HighWatermarkSource,
        on_leadership_change: impl FnOnce(&[TopicPartition], &[TopicPartition]),
    ) -> Result<PartitionResults, ReplicaManagerError> {
        let current = self.controller_epoch();
        if controller_epoch < current {
            return Err(ReplicaManagerError::StaleControllerEpoch {
                current,
                attempted: controller_epoch,
            });
        }
        self.controller_epoch.store(controller_epoch.0, Ordering::SeqCst);

        let mut results = PartitionResults::new();
        let mut become_leader: Vec<(TopicPartition, Arc<PartitionState>, PartitionDirective)> =
            Vec::new();
        let mut become_follower: Vec<(TopicPartition, Arc<PartitionState>, PartitionDirective)> =
            Vec::new();

        for directive in directives {
            let tp = directive.topic_partition.clone();
            let state = match self.hosted.get(&tp) {
                Hosted::Online(state) => state,
                _ => Arc::new(PartitionState::new(
                    tp.clone(),
                    self.local_broker_id,
                    self.config.clone(),
                )),
            };

            if directive.leader_epoch <= state.leader_epoch() && state.has_log() {
                results.insert(
                    tp.clone(),
                    Err(ReplicaManagerError::UnknownLeaderEpoch {
                        topic: Self::topic(&tp).to_string(),
                        partition: Self::partition(&tp),
                        requested: directive.leader_epoch,
                        current: state.leader_epoch(),
                    }),
                );
                continue;
            }
            if !directive.replicas.contains(&self.local_broker_id) {
                results.insert(
                    tp.clone(),
                    Err(ReplicaManagerError::UnknownTopicOrPartition {
                        topic: Self::topic(&tp).to_string(),
                        partition: Self::partition(&tp),
                    }),
                );
                continue;
            }

            if directive.leader == self.local_broker_id {
                become_leader.push((tp, state, directive));
            } else {
                become_follower.push((tp, state, directive));
            }
        }

        let leader_tps: Vec<TopicPartition> = become_leader.iter().map(|(tp, ..)| tp.clone()).collect();
        let follower_tps: Vec<TopicPartition> =
            become_follower.iter().map(|(tp, ..)| tp.clone()).collect();

        self.fetcher_manager
            .remove_fetcher_for_partitions(&leader_tps);

        for (tp, state, directive) in become_leader {
            let checkpointed_hw = hw_source.checkpointed_hw(&tp);
            state.make_leader(
                directive.leader_epoch,
                controller_epoch,
                directive.replicas,
                directive.isr,
                log_factory.create(&tp),
                self.clock.as_ref(),
                checkpointed_hw,
            );
            self.hosted.insert(tp.clone(), Hosted::Online(state));
            results.insert(tp, Ok(()));
        }

        let mut new_fetchers = HashMap::new();
        for (tp, state, directive) in become_follower {
            let checkpointed_hw = hw_source.checkpointed_hw(&tp);
            state.make_follower(
                directive.leader_epoch,
                controller_epoch,
                directive.leader,
                directive.replicas,
                directive.isr,
                log_factory.create(&tp),
                checkpointed_hw,
            );
            self.hosted.insert(tp.clone(), Hosted::Online(state.clone()));
            if self.metadata_cache.is_alive(directive.leader) {
                new_fetchers.insert(
                    tp.clone(),
                    crate::fetcher::InitialFetchState {
                        leader: directive.leader,
                        leader_epoch: directive.leader_epoch,
                        fetch_offset: state.snapshot().high_watermark,
                    },
                );
            }
            results.insert(tp, Ok(()));
        }
        if !new_fetchers.is_empty() {
            self.fetcher_manager.add_fetcher_for_partitions(new_fetchers);
        }

        if !results.is_empty() {
            self.checkpointer_started.store(true, Ordering::SeqCst);
        }

        for tp in leader_tps.iter().chain(follower_tps.iter()) {
            let completed = self.elect_leader_purgatory.check_and_complete(tp);
            self.metrics.record_purgatory_completion(completed as u64);
        }

        on_leadership_change(&leader_tps, &follower_tps);
        Ok(results)
    }

    /// §4.1 stopReplicas.
    pub fn stop_replicas(
        &self,
        controller_epoch: ControllerEpoch,
        partitions: &[TopicPartition],
        delete_partition: bool,
    ) -> Result<PartitionResults, ReplicaManagerError> {
        let current = self.controller_epoch();
        if controller_epoch < current {
            return Err(ReplicaManagerError::StaleControllerEpoch {
                current,
                attempted: controller_epoch,
            });
        }

        self.fetcher_manager.remove_fetcher_for_partitions(partitions);
        let mut results = PartitionResults::new();
        for tp in partitions {
            match self.hosted.get(tp) {
                Hosted::Online(_) => {
                    if delete_partition {
                        self.hosted.remove(tp);
                    }
                    results.insert(tp.clone(), Ok(()));
                }
                Hosted::Offline => {
                    results.insert(
                        tp.clone(),
                        Err(ReplicaManagerError::KafkaStorageError {
                            topic: Self::topic(tp).to_string(),
                            partition: Self::partition(tp),
                            reason: "partition offline".to_string(),
                        }),
                    );
                }
                Hosted::None => {}
            }
        }
        Ok(results)
    }

    /// §4.1 appendRecords.
    pub fn append_records(
        &self,
        timeout_ms: i64,
        required_acks: i16,
        internal_topics_allowed: bool,
        entries_per_partition: HashMap<TopicPartition, Vec<LogRecord>>,
        on_response: impl FnOnce(HashMap<TopicPartition, Result<AppendResult, ReplicaManagerError>>)
            + Send
            + 'static,
    ) -> Result<(), ReplicaManagerError> {
        if !matches!(required_acks, -1 | 0 | 1) {
            return Err(ReplicaManagerError::InvalidRequiredAcks { acks: required_acks });
        }

        let mut results: HashMap<TopicPartition, Result<AppendResult, ReplicaManagerError>> =
            HashMap::new();
        let mut required_offsets = Vec::new();
        let is_empty_request = entries_per_partition.is_empty();

        for (tp, records) in entries_per_partition {
            let is_internal = tp.topic.starts_with("__");
            if is_internal && !internal_topics_allowed {
                results.insert(
                    tp.clone(),
                    Err(ReplicaManagerError::InvalidTopic {
                        topic: tp.topic.clone(),
                    }),
                );
                continue;
            }

            let outcome = match self.hosted.get(&tp) {
                Hosted::Online(state) if state.is_local_leader() => {
                    state.append_records_to_leader(records, required_acks)
                }
                Hosted::Online(_) => Err(ReplicaManagerError::NotLeaderForPartition {
                    topic: Self::topic(&tp).to_string(),
                    partition: Self::partition(&tp),
                }),
                Hosted::Offline => Err(ReplicaManagerError::KafkaStorageError {
                    topic: Self::topic(&tp).to_string(),
                    partition: Self::partition(&tp),
                    reason: "partition offline".to_string(),
                }),
                Hosted::None => Err(ReplicaManagerError::UnknownTopicOrPartition {
                    topic: Self::topic(&tp).to_string(),
                    partition: Self::partition(&tp),
                }),
            };

            if let Ok(ref appended) = outcome {
                self.metrics.record_append(appended.num_messages as u64);
                required_offsets.push((tp.clone(), appended.last_offset + 1));
                let completed = self.fetch_purgatory.check_and_complete(&tp);
                self.metrics.record_purgatory_completion(completed as u64);
            }
            results.insert(tp, outcome);
        }

        let any_appended = !required_offsets.is_empty();
        if required_acks == -1 && any_appended && !is_empty_request && timeout_ms > 0 {
            let payload = ProducePayload {
                required_offsets,
                partial_results: results,
                on_response: Mutex::new(Some(Box::new(on_response))),
                hosted: self.hosted.clone(),
            };
            let deadline = self.clock.now_ms() + timeout_ms;
            let op = Arc::new(DelayedOp::new(
                payload,
                deadline,
                |payload: &ProducePayload| {
                    payload.required_offsets.iter().all(|(tp, required)| {
                        match payload.hosted.get(tp) {
                            Hosted::Online(state) => state.snapshot().high_watermark >= *required,
                            _ => true,
                        }
                    })
                },
                |payload: &ProducePayload| {
                    if let Some(cb) = payload.on_response.lock().take() {
                        cb(payload.partial_results.clone());
                    }
                },
                |payload: &ProducePayload| {
                    if let Some(cb) = payload.on_response.lock().take() {
                        cb(payload.partial_results.clone());
                    }
                },
            ));
            let keys: Vec<TopicPartition> =
                op.payload.required_offsets.iter().map(|(tp, _)| tp.clone()).collect();
            if self.produce_purgatory.try_complete_else_watch(op, &keys) {
                self.metrics.record_purgatory_completion(1);
            }
        } else {
            on_response(results);
        }

        Ok(())
    }

    /// §4.1 fetchMessages, single-partition read path. The caller drives the
    /// per-partition loop and the delayed-fetch registration, since the full
    /// multi-partition byte-budget accounting is request-shape-specific.
    #[allow(clippy::too_many_arguments)]
    pub fn fetch_one_partition(
        &self,
        tp: &TopicPartition,
        replica_id: i64,
        fetch_offset: u64,
        current_leader_epoch: Option<LeaderEpoch>,
        max_bytes: usize,
        isolation: Isolation,
        min_one_message: bool,
    ) -> Result<ReadResult, ReplicaManagerError> {
        let is_follower = replica_id >= 0;
        let state = match self.hosted.get(tp) {
            Hosted::Online(state) => state,
            Hosted::Offline => {
                return Err(ReplicaManagerError::KafkaStorageError {
                    topic: Self::topic(tp).to_string(),
                    partition: Self::partition(tp),
                    reason: "partition offline".to_string(),
                });
            }
            Hosted::None => {
                return Err(ReplicaManagerError::UnknownTopicOrPartition {
                    topic: Self::topic(tp).to_string(),
                    partition: Self::partition(tp),
                });
            }
        };

        let result = state.read_records(
            fetch_offset,
            current_leader_epoch,
            max_bytes,
            isolation,
            true,
            min_one_message,
        )?;
        self.metrics.record_fetch();

        if is_follower {
            let leader_leo = state.snapshot().log_end_offset;
            let (recognised, isr_changed) = state.update_follower_fetch_state(
                BrokerId(replica_id as u32),
                fetch_offset,
                0,
                self.clock.now_ms(),
                leader_leo,
            );
            if recognised {
                if isr_changed {
                    self.metrics.record_isr_expansion();
                    self.isr_tracker.mark_changed(tp.clone(), self.clock.now_ms());
                }
                let completed = self.produce_purgatory.check_and_complete(tp)
                    + self.fetch_purgatory.check_and_complete(tp);
                self.metrics.record_purgatory_completion(completed as u64);
            }
        }

        Ok(result)
    }

    /// §4.1 fetchMessages, multi-partition path with delayed-fetch support.
    /// Applies follower fetch-state bookkeeping eagerly (once per call, not
    /// on every completion-check retry), then completes immediately when
    /// `timeoutMs <= 0`, enough bytes are already readable, or any partition
    /// errored; otherwise parks the request in the fetch purgatory until one
    /// of those becomes true or the timeout expires.
    #[allow(clippy::too_many_arguments)]
    pub fn fetch(
        &self,
        timeout_ms: i64,
        min_bytes: usize,
        max_bytes: usize,
        hard_max_bytes_limit: bool,
        requests: HashMap<TopicPartition, FetchRequest>,
        on_response: impl FnOnce(HashMap<TopicPartition, Result<ReadResult, ReplicaManagerError>>)
            + Send
            + 'static,
    ) {
        for (tp, req) in &requests {
            if req.replica_id < 0 {
                continue;
            }
            if let Hosted::Online(state) = self.hosted.get(tp) {
                let leader_leo = state.snapshot().log_end_offset;
                let (recognised, isr_changed) = state.update_follower_fetch_state(
                    BrokerId(req.replica_id as u32),
                    req.fetch_offset,
                    0,
                    self.clock.now_ms(),
                    leader_leo,
                );
                if recognised {
                    if isr_changed {
                        self.metrics.record_isr_expansion();
                        self.isr_tracker.mark_changed(tp.clone(), self.clock.now_ms());
                    }
                    let completed = self.produce_purgatory.check_and_complete(tp);
                    self.metrics.record_purgatory_completion(completed as u64);
                }
            }
        }
        self.metrics.record_fetch();

        let payload = FetchPayload {
            requests,
            min_bytes,
            max_bytes,
            hard_max_bytes_limit,
            hosted: self.hosted.clone(),
            on_response: Mutex::new(Some(Box::new(on_response))),
        };
        let (readable, results) = fetch_read_all(&payload);
        if timeout_ms <= 0 || readable >= payload.min_bytes || fetch_has_error(&payload) {
            if let Some(cb) = payload.on_response.lock().take() {
                cb(results);
            }
            return;
        }

        let deadline = self.clock.now_ms() + timeout_ms;
        let keys: Vec<TopicPartition> = payload.requests.keys().cloned().collect();
        let op = Arc::new(DelayedOp::new(
            payload,
            deadline,
            |payload: &FetchPayload| {
                let (readable, _) = fetch_read_all(payload);
                readable >= payload.min_bytes || fetch_has_error(payload)
            },
            |payload: &FetchPayload| {
                let (_, results) = fetch_read_all(payload);
                if let Some(cb) = payload.on_response.lock().take() {
                    cb(results);
                }
            },
            |payload: &FetchPayload| {
                let (_, results) = fetch_read_all(payload);
                if let Some(cb) = payload.on_response.lock().take() {
                    cb(results);
                }
            },
        ));
        if self.fetch_purgatory.try_complete_else_watch(op, &keys) {
            self.metrics.record_purgatory_completion(1);
        }
    }

    /// Select a preferred read replica for a consumer fetch (§4.3). Returns
    /// `None` when the leader itself should serve the read.
    pub fn choose_preferred_replica(
        &self,
        tp: &TopicPartition,
        client_metadata: &ClientMetadata,
        fetch_offset: u64,
    ) -> Option<BrokerId> {
        let state = self.hosted.get(tp);
        let Hosted::Online(state) = state else {
            return None;
        };
        if !state.is_local_leader() {
            return None;
        }
        let snapshot = state.snapshot();
        let views: Vec<ReplicaView> = snapshot
            .isr
            .iter()
            .map(|id| ReplicaView {
                broker_id: *id,
                log_start_offset: snapshot.log_start_offset,
                log_end_offset: snapshot.log_end_offset,
            })
            .collect();
        self.selector.select(&views, client_metadata, fetch_offset)
    }

    /// §4.1 deleteRecords: advance logStartOffset immediately, register a
    /// delayed completion that waits for the low watermark to catch up.
    pub fn delete_records(
        &self,
        timeout_ms: i64,
        offset_per_partition: HashMap<TopicPartition, u64>,
        on_response: impl FnOnce() + Send + 'static,
    ) {
        let mut target = HashMap::new();
        for (tp, requested) in &offset_per_partition {
            if let Hosted::Online(state) = self.hosted.get(tp) {
                if let Ok(new_start) = state.delete_records_on_leader(*requested) {
                    target.insert(tp.clone(), new_start);
                }
            }
        }

        let payload = DeleteRecordsPayload {
            target,
            hosted: self.hosted.clone(),
            on_response: Mutex::new(Some(Box::new(on_response))),
        };
        let deadline = self.clock.now_ms() + timeout_ms;
        let op = Arc::new(DelayedOp::new(
            payload,
            deadline,
            |payload: &DeleteRecordsPayload| {
                payload.target.iter().all(|(tp, target_offset)| {
                    match payload.hosted.get(tp) {
                        Hosted::Online(state) => state.low_watermark() >= *target_offset,
                        _ => true,
                    }
                })
            },
            |payload: &DeleteRecordsPayload| {
                if let Some(cb) = payload.on_response.lock().take() {
                    cb();
                }
            },
            |payload: &DeleteRecordsPayload| {
                if let Some(cb) = payload.on_response.lock().take() {
                    cb();
                }
            },
        ));
        let keys: Vec<TopicPartition> = op.payload.target.keys().cloned().collect();
        if self.delete_records_purgatory.try_complete_else_watch(op, &keys) {
            self.metrics.record_purgatory_completion(1);
        }
    }

    /// §4.1 electLeaders: thin dispatch to the out-of-scope controller (§1).
    /// This node's role is to park the request until the controller's
    /// decision lands locally as a leader-epoch bump — exactly the directive
    /// `becomeLeaderOrFollower` already applies — and then report whether
    /// it ended up as leader.
    pub fn elect_leaders(
        &self,
        _election_type: ElectionType,
        partitions: Vec<TopicPartition>,
        timeout_ms: i64,
        on_response: impl FnOnce(HashMap<TopicPartition, Result<LeaderEpoch, ReplicaManagerError>>)
            + Send
            + 'static,
    ) {
        let initial_epochs: HashMap<TopicPartition, LeaderEpoch> = partitions
            .iter()
            .map(|tp| {
                let epoch = match self.hosted.get(tp) {
                    Hosted::Online(state) => state.leader_epoch(),
                    _ => LeaderEpoch::INITIAL,
                };
                (tp.clone(), epoch)
            })
            .collect();

        let payload = ElectLeaderPayload {
            initial_epochs,
            hosted: self.hosted.clone(),
            on_response: Mutex::new(Some(Box::new(on_response))),
        };

        let already_leader = payload.initial_epochs.keys().all(|tp| {
            matches!(self.hosted.get(tp), Hosted::Online(state) if state.is_local_leader())
        });
        if timeout_ms <= 0 || already_leader {
            let results = elect_leader_results(&payload);
            if let Some(cb) = payload.on_response.lock().take() {
                cb(results);
            }
            return;
        }

        let deadline = self.clock.now_ms() + timeout_ms;
        let op = Arc::new(DelayedOp::new(
            payload,
            deadline,
            |payload: &ElectLeaderPayload| {
                payload.initial_epochs.iter().all(|(tp, initial)| match payload.hosted.get(tp) {
                    Hosted::Online(state) => state.is_local_leader() || state.leader_epoch() > *initial,
                    _ => true,
                })
            },
            |payload: &ElectLeaderPayload| {
                if let Some(cb) = payload.on_response.lock().take() {
                    cb(elect_leader_results(payload));
                }
            },
            |payload: &ElectLeaderPayload| {
                if let Some(cb) = payload.on_response.lock().take() {
                    cb(elect_leader_results(payload));
                }
            },
        ));
        let keys: Vec<TopicPartition> = op.payload.initial_epochs.keys().cloned().collect();
        if self.elect_leader_purgatory.try_complete_else_watch(op, &keys) {
            self.metrics.record_purgatory_completion(1);
        }
    }

    /// §4.1 alterReplicaLogDirs: thin dispatch that starts a future log per
    /// partition and hands it to the alter-log-dir fetcher (§4.5). The
    /// fetcher's worker tick (`dir_move_worker_tick`) drains the current log
    /// into the future log; `promote_caught_up_future_logs` swaps it in once
    /// it has caught up to the current log's LEO.
    pub fn alter_replica_log_dirs(
        &self,
        assignments: HashMap<TopicPartition, String>,
        log_factory: &dyn LogFactory,
    ) -> PartitionResults {
        let mut results = PartitionResults::new();
        let mut new_moves = HashMap::new();
        for (tp, _target_dir) in assignments {
            match self.hosted.get(&tp) {
                Hosted::Online(state) => {
                    state.start_future_log(log_factory.create(&tp));
                    new_moves.insert(
                        tp.clone(),
                        crate::fetcher::InitialFetchState {
                            leader: self.local_broker_id,
                            leader_epoch: state.leader_epoch(),
                            fetch_offset: 0,
                        },
                    );
                    results.insert(tp, Ok(()));
                }
                Hosted::Offline => {
                    results.insert(
                        tp.clone(),
                        Err(ReplicaManagerError::KafkaStorageError {
                            topic: Self::topic(&tp).to_string(),
                            partition: Self::partition(&tp),
                            reason: "partition offline".to_string(),
                        }),
                    );
                }
                Hosted::None => {
                    results.insert(
                        tp.clone(),
                        Err(ReplicaManagerError::UnknownTopicOrPartition {
                            topic: Self::topic(&tp).to_string(),
                            partition: Self::partition(&tp),
                        }),
                    );
                }
            }
        }
        if !new_moves.is_empty() {
            self.dir_move_fetcher_manager.add_fetcher_for_partitions(new_moves);
        }
        results
    }

    /// One round of the alter-log-dir worker (§4.5 "two FetcherManagers"):
    /// copy records the future log hasn't seen yet from the current log.
    pub fn dir_move_worker_tick(&self) {
        for (_, state) in self.hosted.online_partitions() {
            let Some(from_offset) = state.future_log_end_offset() else {
                continue;
            };
            if let Ok(read) = state.read_for_dir_move(from_offset, usize::MAX) {
                let records: Vec<LogRecord> = read.records.into_iter().map(|r| r.record).collect();
                if !records.is_empty() {
                    let _ = state.append_to_future_log(records);
                }
            }
        }
    }

    /// Periodic sweep promoting future logs that have caught up, detaching
    /// them from the alter-log-dir fetcher (§4.5 step 3 analog).
    pub fn promote_caught_up_future_logs(&self) {
        let mut promoted = Vec::new();
        for (tp, state) in self.hosted.online_partitions() {
            if state.future_log_caught_up() && state.promote_future_log() {
                promoted.push(tp);
            }
        }
        if !promoted.is_empty() {
            self.dir_move_fetcher_manager.remove_fetcher_for_partitions(&promoted);
        }
    }

    /// §4.1 updateMetadata: thin dispatch to `MetadataCache`.
    pub fn update_metadata(
        &self,
        correlation_id: u64,
        request: replicamgr_storage::MetadataUpdateRequest,
    ) -> Vec<TopicPartition> {
        self.metadata_cache.update_metadata(correlation_id, request)
    }

    /// §4.1 fetchOffsetForTimestamp. Linear scan is acceptable: offset
    /// indexing by timestamp is the Log's concern (§1); this only needs the
    /// contract the log already exposes through `read`.
    pub fn fetch_offset_for_timestamp(
        &self,
        tp: &TopicPartition,
        target_timestamp_ms: i64,
    ) -> Result<Option<u64>, ReplicaManagerError> {
        let state = match self.hosted.get(tp) {
            Hosted::Online(state) => state,
            Hosted::Offline => {
                return Err(ReplicaManagerError::KafkaStorageError {
                    topic: Self::topic(tp).to_string(),
                    partition: Self::partition(tp),
                    reason: "partition offline".to_string(),
                });
            }
            Hosted::None => {
                return Err(ReplicaManagerError::UnknownTopicOrPartition {
                    topic: Self::topic(tp).to_string(),
                    partition: Self::partition(tp),
                });
            }
        };
        let snapshot = state.snapshot();
        let result = state.read_records(
            snapshot.log_start_offset,
            None,
            usize::MAX,
            Isolation::LogEnd,
            false,
            false,
        )?;
        Ok(result
            .records
            .iter()
            .find(|r| r.timestamp_ms >= target_timestamp_ms)
            .map(|r| r.offset))
    }

    /// §4.1 lastOffsetForLeaderEpoch.
    pub fn last_offset_for_leader_epoch(
        &self,
        tp: &TopicPartition,
        leader_epoch: u32,
    ) -> Result<Option<(u32, u64)>, ReplicaManagerError> {
        match self.hosted.get(tp) {
            Hosted::Online(state) => Ok(state.end_offset_for_epoch(leader_epoch)),
            Hosted::Offline => Err(ReplicaManagerError::KafkaStorageError {
                topic: Self::topic(tp).to_string(),
                partition: Self::partition(tp),
                reason: "partition offline".to_string(),
            }),
            Hosted::None => Err(ReplicaManagerError::UnknownTopicOrPartition {
                topic: Self::topic(tp).to_string(),
                partition: Self::partition(tp),
            }),
        }
    }

    /// §4.1 describeLogDirs: per-partition snapshot, keyed by topic-partition
    /// since log-directory assignment itself belongs to the out-of-scope
    /// LogManager.
    pub fn describe_log_dirs(&self) -> HashMap<TopicPartition, crate::partition::PartitionSnapshot> {
        self.hosted
            .online_partitions()
            .into_iter()
            .map(|(tp, state)| (tp, state.snapshot()))
            .collect()
    }

    /// §4.6 periodic ISR-shrink sweep.
    pub fn maybe_shrink_isrs(&self) {
        let now = self.clock.now_ms();
        for (tp, state) in self.hosted.online_partitions() {
            if state.maybe_shrink_isr(now) {
                self.metrics.record_isr_shrink();
                self.isr_tracker.mark_changed(tp.clone(), now);
                let completed = self.produce_purgatory.check_and_complete(&tp);
                self.metrics.record_purgatory_completion(completed as u64);
            }
        }
    }

    /// §4.4 periodic purgatory expiry sweep, run by whatever timer wheel the
    /// caller drives.
    pub fn expire_delayed_operations(&self) {
        let expired = self.produce_purgatory.expire_overdue(self.clock.as_ref())
            + self.fetch_purgatory.expire_overdue(self.clock.as_ref())
            + self.delete_records_purgatory.expire_overdue(self.clock.as_ref())
            + self.elect_leader_purgatory.expire_overdue(self.clock.as_ref());
        self.metrics.record_purgatory_expiration(expired as u64);
    }

    pub fn begin_shutdown(&self) {
        self.is_shutting_down.store(true, Ordering::SeqCst);
        self.expire_delayed_operations();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }
}
