//! Per-node replica manager for a partitioned, replicated commit log: owns
//! the locally hosted topic-partitions, applies controller directives,
//! accepts produce/fetch traffic, tracks ISR and high watermark, and
//! coordinates delayed operations through a purgatory.

pub mod checkpointer;
pub mod clock;
pub mod config;
pub mod dir_failure;
pub mod error;
pub mod fetcher;
pub mod hosted_map;
pub mod isr_tracker;
pub mod manager;
pub mod metrics;
pub mod partition;
pub mod purgatory;
pub mod selector;
pub mod telemetry;
pub mod types;

pub use checkpointer::{FileHighWatermarkSource, HighWatermarkCheckpointer, LogDirLayout};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ReplicaManagerConfig;
pub use dir_failure::{LogDirFailureEvent, LogDirFailureHandler, LogDirIndex};
pub use error::ReplicaManagerError;
pub use fetcher::{FetcherManager, InitialFetchState, LeaderFetchClient};
pub use hosted_map::{Hosted, HostedMap};
pub use isr_tracker::IsrChangeTracker;
pub use manager::{
    ElectionType, FetchRequest, HighWatermarkSource, LogFactory, NoCheckpoints, PartitionDirective,
    PartitionResults, ReplicaManager,
};
pub use metrics::ReplicaManagerMetrics;
pub use partition::{Isolation, PartitionSnapshot, PartitionState, ReplicaState};
pub use purgatory::{DelayedOp, Purgatory};
pub use selector::{ClientMetadata, LeaderOnlySelector, ReplicaSelector, ReplicaView};
pub use types::{BrokerId, ControllerEpoch, LeaderEpoch, PartitionId, TopicPartition};

pub use replicamgr_storage::{
    AppendResult, LogRecord, LogStore, MemoryLogStore, MetadataCache, MetadataUpdateRequest,
    ReadResult, StorageError,
};

pub use log::{debug, error, info, trace, warn};
