use std::fmt;

/// Errors surfaced by the storage layer (the `LogStore`/`MetadataCache`
/// collaborators of the replica manager).
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Requested offset falls outside `[logStartOffset, logEndOffset]`.
    OffsetOutOfRange {
        requested: u64,
        log_start_offset: u64,
        log_end_offset: u64,
    },
    ReadFailed {
        context: String,
        source: Box<StorageErrorSource>,
    },
    WriteFailed {
        context: String,
        source: Box<StorageErrorSource>,
    },
    InsufficientSpace {
        context: String,
    },
    PermissionDenied {
        context: String,
    },
    DataCorruption {
        context: String,
        details: String,
    },
    /// The referenced partition has no local log handle.
    NoSuchPartition {
        topic: String,
        partition: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageErrorSource {
    Io(String),
    Serialization(String),
    Custom(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::OffsetOutOfRange {
                requested,
                log_start_offset,
                log_end_offset,
            } => write!(
                f,
                "offset {requested} out of range [{log_start_offset}, {log_end_offset}]"
            ),
            StorageError::ReadFailed { context, source } => {
                write!(f, "read failed in {context}: {source}")
            }
            StorageError::WriteFailed { context, source } => {
                write!(f, "write failed in {context}: {source}")
            }
            StorageError::InsufficientSpace { context } => {
                write!(f, "insufficient space in {context}")
            }
            StorageError::PermissionDenied { context } => {
                write!(f, "permission denied in {context}")
            }
            StorageError::DataCorruption { context, details } => {
                write!(f, "data corruption in {context}: {details}")
            }
            StorageError::NoSuchPartition { topic, partition } => {
                write!(f, "no local log for {topic}-{partition}")
            }
        }
    }
}

impl fmt::Display for StorageErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorSource::Io(msg) => write!(f, "IO error: {msg}"),
            StorageErrorSource::Serialization(msg) => write!(f, "serialization error: {msg}"),
            StorageErrorSource::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for StorageError {}
impl std::error::Error for StorageErrorSource {}

impl StorageError {
    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                context: context.to_string(),
            },
            _ => StorageError::WriteFailed {
                context: context.to_string(),
                source: Box::new(StorageErrorSource::Io(e.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_offset_out_of_range() {
        let err = StorageError::OffsetOutOfRange {
            requested: 10,
            log_start_offset: 0,
            log_end_offset: 5,
        };
        assert_eq!(err.to_string(), "offset 10 out of range [0, 5]");
    }

    #[test]
    fn converts_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = StorageError::from_io_error(io_err, "checkpoint write");
        assert!(matches!(err, StorageError::PermissionDenied { .. }));
    }
}
