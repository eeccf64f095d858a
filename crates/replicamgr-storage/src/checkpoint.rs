//! High-watermark checkpoint file (§6): one file per log directory,
//! line-oriented text, atomically replaced via temp-file + rename.

use crate::error::StorageError;
use crate::types::{PartitionId, TopicPartition};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Current checkpoint file format version (§6).
pub const CHECKPOINT_VERSION: u32 = 0;

/// Atomically write `(topic, partition) -> highWatermark` entries for one
/// log directory.
#[tracing::instrument(level = "debug", skip(entries), fields(path = %path.as_ref().display(), count = entries.len()))]
pub fn write_checkpoint(
    path: impl AsRef<Path>,
    entries: &HashMap<TopicPartition, u64>,
) -> Result<(), StorageError> {
    let path = path.as_ref();
    let mut body = String::new();
    body.push_str(&format!("{CHECKPOINT_VERSION}\n"));
    body.push_str(&format!("{}\n", entries.len()));
    for (tp, hw) in entries {
        body.push_str(&format!("{} {} {}\n", tp.topic, tp.partition.as_u32(), hw));
    }

    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp_file = fs::File::create(&tmp_path)
            .map_err(|e| StorageError::from_io_error(e, "create checkpoint temp file"))?;
        tmp_file
            .write_all(body.as_bytes())
            .map_err(|e| StorageError::from_io_error(e, "write checkpoint temp file"))?;
        tmp_file
            .sync_all()
            .map_err(|e| StorageError::from_io_error(e, "sync checkpoint temp file"))?;
    }
    fs::rename(&tmp_path, path)
        .map_err(|e| StorageError::from_io_error(e, "rename checkpoint temp file into place"))?;
    Ok(())
}

/// Read back a checkpoint file written by [`write_checkpoint`]. Returns an
/// empty map if the file does not exist yet (fresh log directory).
#[tracing::instrument(level = "debug", fields(path = %path.as_ref().display()))]
pub fn read_checkpoint(
    path: impl AsRef<Path>,
) -> Result<HashMap<TopicPartition, u64>, StorageError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| StorageError::from_io_error(e, "read checkpoint file"))?;
    parse_checkpoint(&contents)
}

fn parse_checkpoint(contents: &str) -> Result<HashMap<TopicPartition, u64>, StorageError> {
    let mut lines = contents.lines();

    let _version: u32 = lines
        .next()
        .ok_or_else(|| corrupt("missing version line"))?
        .trim()
        .parse()
        .map_err(|_| corrupt("invalid version line"))?;

    let count: usize = lines
        .next()
        .ok_or_else(|| corrupt("missing entry count line"))?
        .trim()
        .parse()
        .map_err(|_| corrupt("invalid entry count line"))?;

    let mut entries = HashMap::with_capacity(count);
    for line in lines.by_ref().take(count) {
        let mut parts = line.split_whitespace();
        let topic = parts
            .next()
            .ok_or_else(|| corrupt("missing topic field"))?
            .to_string();
        let partition: u32 = parts
            .next()
            .ok_or_else(|| corrupt("missing partition field"))?
            .parse()
            .map_err(|_| corrupt("invalid partition field"))?;
        let hw: u64 = parts
            .next()
            .ok_or_else(|| corrupt("missing high watermark field"))?
            .parse()
            .map_err(|_| corrupt("invalid high watermark field"))?;

        entries.insert(TopicPartition::new(topic, PartitionId::new(partition)), hw);
    }

    Ok(entries)
}

fn corrupt(details: &str) -> StorageError {
    StorageError::DataCorruption {
        context: "hw checkpoint file".to_string(),
        details: details.to_string(),
    }
}
