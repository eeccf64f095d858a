//! Error taxonomy (§7). Per-partition errors are carried in per-partition
//! response maps; top-level errors collapse the whole request, matching the
//! propagation rules §7 lays out.

use crate::types::{ControllerEpoch, LeaderEpoch};
use replicamgr_storage::StorageError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaManagerError {
    StaleControllerEpoch {
        current: ControllerEpoch,
        attempted: ControllerEpoch,
    },
    UnknownTopicOrPartition {
        topic: String,
        partition: u32,
    },
    NotLeaderForPartition {
        topic: String,
        partition: u32,
    },
    ReplicaNotAvailable {
        topic: String,
        partition: u32,
    },
    KafkaStorageError {
        topic: String,
        partition: u32,
        reason: String,
    },
    FencedLeaderEpoch {
        topic: String,
        partition: u32,
        requested: LeaderEpoch,
        current: LeaderEpoch,
    },
    UnknownLeaderEpoch {
        topic: String,
        partition: u32,
        requested: LeaderEpoch,
        current: LeaderEpoch,
    },
    OffsetOutOfRange {
        topic: String,
        partition: u32,
        requested: u64,
        log_start_offset: u64,
        log_end_offset: u64,
    },
    InvalidRequiredAcks {
        acks: i16,
    },
    InvalidTopic {
        topic: String,
    },
    RecordTooLarge,
    RecordBatchTooLarge,
    CorruptRecord,
    InvalidTimestamp,
    NotEnoughReplicas {
        topic: String,
        partition: u32,
        isr_size: usize,
        min_in_sync_replicas: usize,
    },
    PolicyViolation {
        reason: String,
    },
    UnsupportedVersion,
    ControllerMoved,
}

impl fmt::Display for ReplicaManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ReplicaManagerError::*;
        match self {
            StaleControllerEpoch { current, attempted } => write!(
                f,
                "stale controller epoch: attempted {attempted}, current {current}"
            ),
            UnknownTopicOrPartition { topic, partition } => {
                write!(f, "unknown topic or partition {topic}-{partition}")
            }
            NotLeaderForPartition { topic, partition } => {
                write!(f, "not leader for partition {topic}-{partition}")
            }
            ReplicaNotAvailable { topic, partition } => {
                write!(f, "replica not available for {topic}-{partition}")
            }
            KafkaStorageError {
                topic,
                partition,
                reason,
            } => write!(f, "storage error on {topic}-{partition}: {reason}"),
            FencedLeaderEpoch {
                topic,
                partition,
                requested,
                current,
            } => write!(
                f,
                "fenced leader epoch on {topic}-{partition}: requested {requested} newer than current {current}"
            ),
            UnknownLeaderEpoch {
                topic,
                partition,
                requested,
                current,
            } => write!(
                f,
                "unknown leader epoch on {topic}-{partition}: requested {requested} older than current {current}"
            ),
            OffsetOutOfRange {
                topic,
                partition,
                requested,
                log_start_offset,
                log_end_offset,
            } => write!(
                f,
                "offset {requested} out of range [{log_start_offset}, {log_end_offset}] on {topic}-{partition}"
            ),
            InvalidRequiredAcks { acks } => write!(f, "invalid required acks: {acks}"),
            InvalidTopic { topic } => write!(f, "invalid topic: {topic}"),
            RecordTooLarge => write!(f, "record too large"),
            RecordBatchTooLarge => write!(f, "record batch too large"),
            CorruptRecord => write!(f, "corrupt record"),
            InvalidTimestamp => write!(f, "invalid timestamp"),
            NotEnoughReplicas {
                topic,
                partition,
                isr_size,
                min_in_sync_replicas,
            } => write!(
                f,
                "not enough replicas for {topic}-{partition}: isr size {isr_size} < min {min_in_sync_replicas}"
            ),
            PolicyViolation { reason } => write!(f, "policy violation: {reason}"),
            UnsupportedVersion => write!(f, "unsupported version"),
            ControllerMoved => write!(f, "controller moved"),
        }
    }
}

impl std::error::Error for ReplicaManagerError {}

impl ReplicaManagerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReplicaManagerError::UnknownTopicOrPartition { .. }
                | ReplicaManagerError::ReplicaNotAvailable { .. }
        )
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ReplicaManagerError::UnknownTopicOrPartition { .. }
                | ReplicaManagerError::NotLeaderForPartition { .. }
                | ReplicaManagerError::ReplicaNotAvailable { .. }
                | ReplicaManagerError::FencedLeaderEpoch { .. }
                | ReplicaManagerError::UnknownLeaderEpoch { .. }
                | ReplicaManagerError::OffsetOutOfRange { .. }
                | ReplicaManagerError::InvalidRequiredAcks { .. }
                | ReplicaManagerError::InvalidTopic { .. }
                | ReplicaManagerError::RecordTooLarge
                | ReplicaManagerError::RecordBatchTooLarge
                | ReplicaManagerError::CorruptRecord
                | ReplicaManagerError::InvalidTimestamp
                | ReplicaManagerError::NotEnoughReplicas { .. }
                | ReplicaManagerError::PolicyViolation { .. }
        )
    }

    pub fn storage(topic: &str, partition: u32, err: StorageError) -> Self {
        ReplicaManagerError::KafkaStorageError {
            topic: topic.to_string(),
            partition,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_stale_controller_epoch() {
        let err = ReplicaManagerError::StaleControllerEpoch {
            current: ControllerEpoch(7),
            attempted: ControllerEpoch(6),
        };
        assert_eq!(
            err.to_string(),
            "stale controller epoch: attempted controller-epoch-6, current controller-epoch-7"
        );
    }

    #[test]
    fn classifies_not_found_errors() {
        let err = ReplicaManagerError::UnknownTopicOrPartition {
            topic: "orders".into(),
            partition: 0,
        };
        assert!(err.is_not_found());
        assert!(err.is_client_error());

        let err = ReplicaManagerError::KafkaStorageError {
            topic: "orders".into(),
            partition: 0,
            reason: "disk offline".into(),
        };
        assert!(!err.is_not_found());
        assert!(!err.is_client_error());
    }
}
