//! Storage-layer collaborators of the replica manager: the opaque
//! `LogStore` per-partition log and the cluster-wide `MetadataCache`, plus
//! the high-watermark checkpoint file format. The replica manager crate
//! depends on this one the way a broker crate depends on its storage
//! layer.

pub mod checkpoint;
pub mod error;
pub mod log_store;
pub mod metadata_cache;
pub mod types;

pub use error::{StorageError, StorageErrorSource};
pub use log_store::{
    AbortedTransaction, AppendResult, FetchOffsetMetadata, LogRecord, LogRecordWithOffset,
    LogStore, MemoryLogStore, ReadResult,
};
pub use metadata_cache::{BrokerEndpoint, InMemoryMetadataCache, MetadataCache, MetadataUpdateRequest};
pub use types::{BrokerId, PartitionId, TopicPartition};

// Re-export logging macros for consistent usage across the crate.
pub use log::{debug, error, info, trace, warn};
