//! `PartitionState` (§4.2, §3). One instance per hosted topic-partition,
//! shared behind an `Arc` and mutated under its own read-write lock — never
//! the state-change lock, which only guards `HostedMap` insertion/removal
//! (§5 lock order: state-change lock → partition write-lock → log lock).

use parking_lot::RwLock;
use replicamgr_storage::{AppendResult, LogRecord, LogStore, ReadResult, TopicPartition};
use std::collections::HashMap;

use crate::clock::Clock;
use crate::config::ReplicaManagerConfig;
use crate::error::ReplicaManagerError;
use crate::types::{BrokerId, ControllerEpoch, LeaderEpoch};

/// Fetch isolation level (§6, wire-visible).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    LogEnd,
    HighWatermark,
    TxnCommitted,
}

/// Per-follower bookkeeping as seen from the leader (§3). Only meaningful
/// while local is leader; cleared on `makeFollower`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaState {
    pub log_start_offset: u64,
    /// `-1` means "never fetched" (§4.2 makeLeader).
    pub log_end_offset: i64,
    pub last_fetch_time_ms: i64,
    pub last_caught_up_time_ms: i64,
    pub last_sent_high_watermark: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Leader,
    Follower(BrokerId),
}

/// Read-only snapshot for fetch/selector paths that don't need to mutate
/// anything (§4.2 `fetchOffsetSnapshot`).
#[derive(Debug, Clone)]
pub struct PartitionSnapshot {
    pub leader_epoch: LeaderEpoch,
    pub is_local_leader: bool,
    pub isr: Vec<BrokerId>,
    pub assigned_replicas: Vec<BrokerId>,
    pub log_start_offset: u64,
    pub log_end_offset: u64,
    pub high_watermark: u64,
    pub last_stable_offset: u64,
    pub has_future_log: bool,
}

struct Inner {
    role: Role,
    leader_epoch: LeaderEpoch,
    controller_epoch: ControllerEpoch,
    assigned_replicas: Vec<BrokerId>,
    isr: Vec<BrokerId>,
    local_log: Option<Box<dyn LogStore>>,
    /// Cross-log-dir move target (§3 `futureLog`), driven by the alter-log-dir
    /// fetcher (§4.5) until it catches up to `local_log`'s LEO and is promoted.
    future_log: Option<Box<dyn LogStore>>,
    replica_states: HashMap<BrokerId, ReplicaState>,
}

pub struct PartitionState {
    pub topic_partition: TopicPartition,
    local_broker_id: BrokerId,
    config: ReplicaManagerConfig,
    inner: RwLock<Inner>,
}

impl PartitionState {
    pub fn new(
        topic_partition: TopicPartition,
        local_broker_id: BrokerId,
        config: ReplicaManagerConfig,
    ) -> Self {
        Self {
            topic_partition,
            local_broker_id,
            config,
            inner: RwLock::new(Inner {
                role: Role::Follower(local_broker_id),
                leader_epoch: LeaderEpoch::INITIAL,
                controller_epoch: ControllerEpoch(0),
                assigned_replicas: Vec::new(),
                isr: Vec::new(),
                local_log: None,
                future_log: None,
                replica_states: HashMap::new(),
            }),
        }
    }

    fn topic(&self) -> &str {
        &self.topic_partition.topic
    }

    fn partition(&self) -> u32 {
        self.topic_partition.partition.as_u32()
    }

    /// §4.2 makeLeader. Returns true iff this transitioned from non-leader.
    /// `checkpointed_hw` is consulted only the first time a local log is
    /// created for this partition ("record HW from the checkpoint on first
    /// create"); it is ignored on every subsequent re-election.
    #[allow(clippy::too_many_arguments)]
    pub fn make_leader(
        &self,
        leader_epoch: LeaderEpoch,
        controller_epoch: ControllerEpoch,
        assigned_replicas: Vec<BrokerId>,
        isr: Vec<BrokerId>,
        log_if_absent: Box<dyn LogStore>,
        clock: &dyn Clock,
        checkpointed_hw: Option<u64>,
    ) -> bool {
        let mut inner = self.inner.write();
        let was_leader = inner.role == Role::Leader;

        inner.role = Role::Leader;
        inner.leader_epoch = leader_epoch;
        inner.controller_epoch = controller_epoch;
        inner.assigned_replicas = assigned_replicas.clone();
        inner.isr = isr;

        if inner.local_log.is_none() {
            inner.local_log = Some(log_if_absent);
            if let Some(hw) = checkpointed_hw {
                if let Some(log) = inner.local_log.as_mut() {
                    log.set_high_watermark(hw);
                }
            }
        }
        if let Some(log) = inner.local_log.as_mut() {
            log.record_epoch_start(leader_epoch.0, log.log_end_offset());
        }

        let now = clock.now_ms();
        inner.replica_states.clear();
        for replica in assigned_replicas
            .into_iter()
            .filter(|r| *r != self.local_broker_id)
        {
            inner.replica_states.insert(
                replica,
                ReplicaState {
                    log_end_offset: -1,
                    last_caught_up_time_ms: now,
                    ..Default::default()
                },
            );
        }

        !was_leader
    }

    /// §4.2 makeFollower. Returns true iff the leader changed.
    #[allow(clippy::too_many_arguments)]
    pub fn make_follower(
        &self,
        leader_epoch: LeaderEpoch,
        controller_epoch: ControllerEpoch,
        leader_id: BrokerId,
        assigned_replicas: Vec<BrokerId>,
        isr: Vec<BrokerId>,
        log_if_absent: Box<dyn LogStore>,
        checkpointed_hw: Option<u64>,
    ) -> bool {
        let mut inner = self.inner.write();
        let leader_changed = inner.role != Role::Follower(leader_id);

        inner.role = Role::Follower(leader_id);
        inner.leader_epoch = leader_epoch;
        inner.controller_epoch = controller_epoch;
        inner.assigned_replicas = assigned_replicas;
        inner.isr = isr;
        inner.replica_states.clear();

        if inner.local_log.is_none() {
            inner.local_log = Some(log_if_absent);
            if let Some(hw) = checkpointed_hw {
                if let Some(log) = inner.local_log.as_mut() {
                    log.set_high_watermark(hw);
                }
            }
        }

        leader_changed
    }

    pub fn controller_epoch(&self) -> ControllerEpoch {
        self.inner.read().controller_epoch
    }

    pub fn leader_epoch(&self) -> LeaderEpoch {
        self.inner.read().leader_epoch
    }

    pub fn is_local_leader(&self) -> bool {
        self.inner.read().role == Role::Leader
    }

    pub fn has_log(&self) -> bool {
        self.inner.read().local_log.is_some()
    }

    pub fn snapshot(&self) -> PartitionSnapshot {
        let inner = self.inner.read();
        let log = inner.local_log.as_ref();
        PartitionSnapshot {
            leader_epoch: inner.leader_epoch,
            is_local_leader: inner.role == Role::Leader,
            isr: inner.isr.clone(),
            assigned_replicas: inner.assigned_replicas.clone(),
            log_start_offset: log.map_or(0, |l| l.log_start_offset()),
            log_end_offset: log.map_or(0, |l| l.log_end_offset()),
            high_watermark: log.map_or(0, |l| l.high_watermark()),
            last_stable_offset: log.map_or(0, |l| l.last_stable_offset()),
            has_future_log: inner.future_log.is_some(),
        }
    }

    /// §4.2 appendRecordsToLeader. Does not move HW — follower fetches do.
    pub fn append_records_to_leader(
        &self,
        records: Vec<LogRecord>,
        required_acks: i16,
    ) -> Result<AppendResult, ReplicaManagerError> {
        let mut inner = self.inner.write();
        if inner.role != Role::Leader {
            return Err(ReplicaManagerError::NotLeaderForPartition {
                topic: self.topic().to_string(),
                partition: self.partition(),
            });
        }
        if required_acks == -1 && inner.isr.len() < self.config.min_in_sync_replicas {
            return Err(ReplicaManagerError::NotEnoughReplicas {
                topic: self.topic().to_string(),
                partition: self.partition(),
                isr_size: inner.isr.len(),
                min_in_sync_replicas: self.config.min_in_sync_replicas,
            });
        }
        let topic = self.topic().to_string();
        let partition = self.partition();
        let log = inner
            .local_log
            .as_mut()
            .ok_or_else(|| ReplicaManagerError::KafkaStorageError {
                topic: topic.clone(),
                partition,
                reason: "local log missing".to_string(),
            })?;
        log.append(records, required_acks)
            .map_err(|e| ReplicaManagerError::storage(&topic, partition, e))
    }

    /// §4.2 updateFollowerFetchState. Returns true iff `follower_id` is an
    /// assigned replica. HW recompute happens strictly after the ISR mutation,
    /// under the same write-lock guard (§9 "follower ISR re-entry race").
    pub fn update_follower_fetch_state(
        &self,
        follower_id: BrokerId,
        fetch_offset: u64,
        follower_start_offset: u64,
        fetch_time_ms: i64,
        leader_log_end_offset: u64,
    ) -> (bool, bool) {
        let mut inner = self.inner.write();
        if !inner.assigned_replicas.contains(&follower_id) {
            return (false, false);
        }

        {
            let state = inner.replica_states.entry(follower_id).or_default();
            state.log_start_offset = follower_start_offset;
            state.log_end_offset = fetch_offset as i64;
            state.last_fetch_time_ms = fetch_time_ms;
            if fetch_offset >= leader_log_end_offset {
                state.last_caught_up_time_ms = fetch_time_ms;
            }
        }

        let mut isr_changed = false;
        let current_hw = inner
            .local_log
            .as_ref()
            .map_or(0, |l| l.high_watermark());
        let caught_up_time = inner
            .replica_states
            .get(&follower_id)
            .map_or(0, |s| s.last_caught_up_time_ms);
        let lag_floor = fetch_time_ms - self.config.replica_lag_time_max_ms;
        if !inner.isr.contains(&follower_id)
            && fetch_offset >= current_hw
            && caught_up_time >= lag_floor
        {
            inner.isr.push(follower_id);
            isr_changed = true;
        }

        self.recompute_high_watermark(&mut inner);

        (true, isr_changed)
    }

    /// §4.2 maybeShrinkIsr. Returns true iff the ISR shrank.
    pub fn maybe_shrink_isr(&self, now_ms: i64) -> bool {
        let max_lag_ms = self.config.replica_lag_time_max_ms;
        let mut inner = self.inner.write();
        if inner.role != Role::Leader {
            return false;
        }
        let leader_leo = inner
            .local_log
            .as_ref()
            .map_or(0, |l| l.log_end_offset());
        let local_broker_id = self.local_broker_id;

        let stale: Vec<BrokerId> = inner
            .isr
            .iter()
            .filter(|id| **id != local_broker_id)
            .filter_map(|id| {
                let state = inner.replica_states.get(id)?;
                let lagging_time = state.last_caught_up_time_ms < now_ms - max_lag_ms;
                let lagging_offset = state.log_end_offset < leader_leo as i64
                    && state.last_fetch_time_ms < now_ms - max_lag_ms;
                if lagging_time || lagging_offset {
                    Some(*id)
                } else {
                    None
                }
            })
            .collect();

        if stale.is_empty() {
            return false;
        }
        inner.isr.retain(|id| !stale.contains(id));
        self.recompute_high_watermark(&mut inner);
        true
    }

    /// Must be called with `inner` already write-locked; recomputes HW as
    /// `min(logEndOffset over isr)`, never lowering it (§3 I5).
    fn recompute_high_watermark(&self, inner: &mut Inner) {
        let local_broker_id = self.local_broker_id;
        let leos: Vec<i64> = inner
            .isr
            .iter()
            .map(|id| {
                if *id == local_broker_id {
                    inner
                        .local_log
                        .as_ref()
                        .map_or(0, |l| l.log_end_offset() as i64)
                } else {
                    inner
                        .replica_states
                        .get(id)
                        .map_or(0, |s| s.log_end_offset)
                }
            })
            .collect();
        let Some(new_hw) = leos.into_iter().min() else {
            return;
        };
        if new_hw < 0 {
            return;
        }
        if let Some(log) = inner.local_log.as_mut() {
            if new_hw as u64 > log.high_watermark() {
                log.set_high_watermark(new_hw as u64);
            }
        }
    }

    /// §4.2 readRecords.
    pub fn read_records(
        &self,
        fetch_offset: u64,
        current_leader_epoch: Option<LeaderEpoch>,
        max_bytes: usize,
        isolation: Isolation,
        fetch_only_from_leader: bool,
        min_one_message: bool,
    ) -> Result<ReadResult, ReplicaManagerError> {
        let inner = self.inner.read();
        let topic = self.topic().to_string();
        let partition = self.partition();

        if let Some(requested) = current_leader_epoch {
            if requested > inner.leader_epoch {
                return Err(ReplicaManagerError::FencedLeaderEpoch {
                    topic,
                    partition,
                    requested,
                    current: inner.leader_epoch,
                });
            }
            if requested < inner.leader_epoch {
                return Err(ReplicaManagerError::UnknownLeaderEpoch {
                    topic,
                    partition,
                    requested,
                    current: inner.leader_epoch,
                });
            }
        }

        if fetch_only_from_leader && inner.role != Role::Leader {
            return Err(ReplicaManagerError::NotLeaderForPartition { topic, partition });
        }

        let log = inner
            .local_log
            .as_ref()
            .ok_or_else(|| ReplicaManagerError::ReplicaNotAvailable {
                topic: topic.clone(),
                partition,
            })?;

        let log_start_offset = log.log_start_offset();
        let log_end_offset = log.log_end_offset();
        if fetch_offset < log_start_offset || fetch_offset > log_end_offset {
            return Err(ReplicaManagerError::OffsetOutOfRange {
                topic,
                partition,
                requested: fetch_offset,
                log_start_offset,
                log_end_offset,
            });
        }

        let upper_bound = match isolation {
            Isolation::LogEnd => log_end_offset,
            Isolation::HighWatermark => log.high_watermark(),
            Isolation::TxnCommitted => log.last_stable_offset(),
        };

        log.read(fetch_offset, max_bytes, upper_bound, min_one_message)
            .map_err(|e| ReplicaManagerError::storage(&topic, partition, e))
    }

    /// §4.1 deleteRecords: advance `logStartOffset` to `min(requested, HW)`.
    /// Returns the new log-start-offset.
    pub fn delete_records_on_leader(&self, requested_offset: u64) -> Result<u64, ReplicaManagerError> {
        let mut inner = self.inner.write();
        let topic = self.topic().to_string();
        let partition = self.partition();
        if inner.role != Role::Leader {
            return Err(ReplicaManagerError::NotLeaderForPartition { topic, partition });
        }
        let log = inner
            .local_log
            .as_mut()
            .ok_or_else(|| ReplicaManagerError::KafkaStorageError {
                topic: topic.clone(),
                partition,
                reason: "local log missing".to_string(),
            })?;
        let target = requested_offset.min(log.high_watermark());
        log.delete_records_before(target)
            .map_err(|e| ReplicaManagerError::storage(&topic, partition, e))?;
        Ok(log.log_start_offset())
    }

    /// Low watermark across ISR: min `logStartOffset` among current ISR
    /// members (leader's own log-start-offset stands in for remote members,
    /// since the replica manager does not track followers' start offsets
    /// beyond what's reported on fetch).
    pub fn low_watermark(&self) -> u64 {
        let inner = self.inner.read();
        let local_broker_id = self.local_broker_id;
        inner
            .isr
            .iter()
            .map(|id| {
                if *id == local_broker_id {
                    inner
                        .local_log
                        .as_ref()
                        .map_or(0, |l| l.log_start_offset())
                } else {
                    inner
                        .replica_states
                        .get(id)
                        .map_or(0, |s| s.log_start_offset)
                }
            })
            .min()
            .unwrap_or(0)
    }

    pub fn end_offset_for_epoch(&self, epoch: u32) -> Option<(u32, u64)> {
        self.inner.read().local_log.as_ref()?.end_offset_for_epoch(epoch)
    }

    /// §4.1 alterReplicaLogDirs: begin moving this partition's log to another
    /// directory. Returns false if a move is already in flight.
    pub fn start_future_log(&self, future_log: Box<dyn LogStore>) -> bool {
        let mut inner = self.inner.write();
        if inner.future_log.is_some() {
            return false;
        }
        inner.future_log = Some(future_log);
        true
    }

    pub fn has_future_log(&self) -> bool {
        self.inner.read().future_log.is_some()
    }

    pub fn future_log_end_offset(&self) -> Option<u64> {
        self.inner.read().future_log.as_ref().map(|l| l.log_end_offset())
    }

    /// The alter-log-dir fetcher's source read: current local log contents
    /// from `from_offset` up to its own LEO.
    pub fn read_for_dir_move(&self, from_offset: u64, max_bytes: usize) -> Result<ReadResult, ReplicaManagerError> {
        let inner = self.inner.read();
        let topic = self.topic().to_string();
        let partition = self.partition();
        let log = inner
            .local_log
            .as_ref()
            .ok_or_else(|| ReplicaManagerError::ReplicaNotAvailable { topic: topic.clone(), partition })?;
        let leo = log.log_end_offset();
        log.read(from_offset, max_bytes, leo, false)
            .map_err(|e| ReplicaManagerError::storage(&topic, partition, e))
    }

    /// Append fetched records into the future log (§4.5 alter-log-dir worker
    /// applying a fetch response), advancing its LEO.
    pub fn append_to_future_log(&self, records: Vec<LogRecord>) -> Result<AppendResult, ReplicaManagerError> {
        let mut inner = self.inner.write();
        let topic = self.topic().to_string();
        let partition = self.partition();
        let log = inner
            .future_log
            .as_mut()
            .ok_or_else(|| ReplicaManagerError::ReplicaNotAvailable { topic: topic.clone(), partition })?;
        log.append(records, 0)
            .map_err(|e| ReplicaManagerError::storage(&topic, partition, e))
    }

    /// True once the future log's LEO has caught up to the current log's LEO
    /// (Kafka's `ReplicaAlterLogDirsThread` promotion condition).
    pub fn future_log_caught_up(&self) -> bool {
        let inner = self.inner.read();
        let Some(future) = inner.future_log.as_ref() else {
            return false;
        };
        let Some(current) = inner.local_log.as_ref() else {
            return false;
        };
        future.log_end_offset() >= current.log_end_offset()
    }

    /// Swap the caught-up future log into place as the local log. Returns
    /// false if there was no future log or it had not caught up.
    pub fn promote_future_log(&self) -> bool {
        let mut inner = self.inner.write();
        let caught_up = match (inner.future_log.as_ref(), inner.local_log.as_ref()) {
            (Some(future), Some(current)) => future.log_end_offset() >= current.log_end_offset(),
            _ => false,
        };
        if !caught_up {
            return false;
        }
        inner.local_log = inner.future_log.take();
        true
    }
}
