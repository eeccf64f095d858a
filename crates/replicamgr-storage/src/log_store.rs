//! The `LogStore` collaborator (§6): the byte-level log is out of scope for
//! the replica manager, so this module exposes only the opaque interface
//! the manager drives plus one in-memory implementation used by tests and
//! the demo binary.

use crate::error::StorageError;
use std::collections::HashMap;

/// A single record as the log sees it. Compaction, serialization format and
/// on-disk layout are the Log's concern, not the replica manager's.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl LogRecord {
    pub fn new(key: Option<Vec<u8>>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecordWithOffset {
    pub record: LogRecord,
    pub offset: u64,
    pub timestamp_ms: i64,
}

/// Result of a successful append (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    pub first_offset: u64,
    pub last_offset: u64,
    pub log_append_time_ms: i64,
    pub num_messages: usize,
}

/// Cursor a fetch response is pinned to; opaque beyond the raw offset since
/// segment/file layout is the Log's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOffsetMetadata {
    pub offset: u64,
}

/// Minimal stand-in for the transactional metadata the Log exposes; the
/// replica manager only ever passes this through (Non-goals, §1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortedTransaction {
    pub producer_id: i64,
    pub first_offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub records: Vec<LogRecordWithOffset>,
    pub fetch_offset_metadata: FetchOffsetMetadata,
    pub first_entry_incomplete: bool,
    pub aborted_transactions: Vec<AbortedTransaction>,
}

/// The boundary between the leader-epoch fencing the replica manager owns
/// and the "which offset did a given epoch end at" lookup only the Log can
/// answer, since it tracks where each epoch's records physically end.
pub trait LogStore: Send + Sync {
    fn append(
        &mut self,
        records: Vec<LogRecord>,
        required_acks: i16,
    ) -> Result<AppendResult, StorageError>;

    fn read(
        &self,
        fetch_offset: u64,
        max_bytes: usize,
        upper_bound_offset: u64,
        min_one_message: bool,
    ) -> Result<ReadResult, StorageError>;

    fn log_start_offset(&self) -> u64;
    fn log_end_offset(&self) -> u64;
    fn high_watermark(&self) -> u64;

    /// The replica manager, not the Log, drives HW (§6).
    fn set_high_watermark(&mut self, hw: u64);

    fn truncate_to(&mut self, offset: u64) -> Result<(), StorageError>;
    fn delete_records_before(&mut self, offset: u64) -> Result<(), StorageError>;

    /// Record that `epoch` started producing at `start_offset`; called by
    /// `PartitionState::make_leader`/`make_follower` on every leadership
    /// change so `end_offset_for_epoch` has something to look up.
    fn record_epoch_start(&mut self, epoch: u32, start_offset: u64);

    /// `(epoch, endOffset)` per §6: the end offset of the given epoch, or
    /// the end offset of the closest earlier epoch if `epoch` was never
    /// observed locally.
    fn end_offset_for_epoch(&self, epoch: u32) -> Option<(u32, u64)>;

    fn last_stable_offset(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct MemoryLogStore {
    records: Vec<LogRecordWithOffset>,
    log_start_offset: u64,
    high_watermark: u64,
    epoch_starts: Vec<(u32, u64)>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_offset(&self) -> u64 {
        self.records
            .last()
            .map(|r| r.offset + 1)
            .unwrap_or(self.log_start_offset)
    }

    fn index_of_offset(&self, offset: u64) -> Option<usize> {
        self.records.iter().position(|r| r.offset == offset)
    }
}

impl LogStore for MemoryLogStore {
    fn append(
        &mut self,
        records: Vec<LogRecord>,
        _required_acks: i16,
    ) -> Result<AppendResult, StorageError> {
        let first_offset = self.next_offset();
        let now_ms = 0; // logical append time; real wall clock is injected by callers that care
        let mut last_offset = first_offset;
        let num_messages = records.len();
        for (i, record) in records.into_iter().enumerate() {
            let offset = first_offset + i as u64;
            last_offset = offset;
            self.records.push(LogRecordWithOffset {
                record,
                offset,
                timestamp_ms: now_ms,
            });
        }
        Ok(AppendResult {
            first_offset,
            last_offset,
            log_append_time_ms: now_ms,
            num_messages,
        })
    }

    fn read(
        &self,
        fetch_offset: u64,
        max_bytes: usize,
        upper_bound_offset: u64,
        min_one_message: bool,
    ) -> Result<ReadResult, StorageError> {
        let log_end_offset = self.log_end_offset();
        if fetch_offset < self.log_start_offset || fetch_offset > log_end_offset {
            return Err(StorageError::OffsetOutOfRange {
                requested: fetch_offset,
                log_start_offset: self.log_start_offset,
                log_end_offset,
            });
        }

        let mut records = Vec::new();
        let mut bytes_read = 0usize;
        let mut first_entry_incomplete = false;
        for r in self.records.iter().filter(|r| r.offset >= fetch_offset) {
            if r.offset >= upper_bound_offset {
                break;
            }
            let size = r.record.value.len() + r.record.key.as_ref().map_or(0, |k| k.len());
            if bytes_read + size > max_bytes {
                if records.is_empty() && min_one_message {
                    first_entry_incomplete = true;
                    records.push(r.clone());
                }
                break;
            }
            bytes_read += size;
            records.push(r.clone());
        }

        Ok(ReadResult {
            records,
            fetch_offset_metadata: FetchOffsetMetadata {
                offset: fetch_offset,
            },
            first_entry_incomplete,
            aborted_transactions: Vec::new(),
        })
    }

    fn log_start_offset(&self) -> u64 {
        self.log_start_offset
    }

    fn log_end_offset(&self) -> u64 {
        self.next_offset()
    }

    fn high_watermark(&self) -> u64 {
        self.high_watermark
    }

    fn set_high_watermark(&mut self, hw: u64) {
        self.high_watermark = hw;
    }

    fn truncate_to(&mut self, offset: u64) -> Result<(), StorageError> {
        if let Some(idx) = self.index_of_offset(offset) {
            self.records.truncate(idx);
        }
        if self.high_watermark > offset {
            self.high_watermark = offset;
        }
        Ok(())
    }

    fn delete_records_before(&mut self, offset: u64) -> Result<(), StorageError> {
        let offset = offset.min(self.log_end_offset());
        self.records.retain(|r| r.offset >= offset);
        if offset > self.log_start_offset {
            self.log_start_offset = offset;
        }
        Ok(())
    }

    fn record_epoch_start(&mut self, epoch: u32, start_offset: u64) {
        if self.epoch_starts.last().map(|(e, _)| *e) != Some(epoch) {
            self.epoch_starts.push((epoch, start_offset));
        }
    }

    fn end_offset_for_epoch(&self, epoch: u32) -> Option<(u32, u64)> {
        let mut best: Option<(u32, u64)> = None;
        for window in self.epoch_starts.windows(2) {
            let (e, start) = window[0];
            let (_, next_start) = window[1];
            if e <= epoch {
                best = Some((e, next_start));
            }
        }
        if let Some((e, _)) = self.epoch_starts.last() {
            if *e <= epoch {
                best = Some((*e, self.log_end_offset()));
            }
        }
        best
    }

    fn last_stable_offset(&self) -> u64 {
        self.log_end_offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(v: &str) -> LogRecord {
        LogRecord::new(None, v.as_bytes().to_vec())
    }

    #[test]
    fn append_assigns_sequential_offsets() {
        let mut log = MemoryLogStore::new();
        let result = log
            .append(vec![rec("a"), rec("b"), rec("c")], -1)
            .unwrap();
        assert_eq!(result.first_offset, 0);
        assert_eq!(result.last_offset, 2);
        assert_eq!(result.num_messages, 3);
        assert_eq!(log.log_end_offset(), 3);
    }

    #[test]
    fn read_respects_upper_bound_offset() {
        let mut log = MemoryLogStore::new();
        log.append(vec![rec("a"), rec("b"), rec("c")], -1).unwrap();
        log.set_high_watermark(2);

        let result = log.read(0, 1024, log.high_watermark(), false).unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[1].offset, 1);
    }

    #[test]
    fn read_out_of_range_offset_errors() {
        let log = MemoryLogStore::new();
        let err = log.read(5, 1024, 0, false).unwrap_err();
        assert!(matches!(err, StorageError::OffsetOutOfRange { .. }));
    }

    #[test]
    fn delete_records_before_advances_log_start_offset() {
        let mut log = MemoryLogStore::new();
        log.append(vec![rec("a"), rec("b"), rec("c")], -1).unwrap();
        log.delete_records_before(2).unwrap();
        assert_eq!(log.log_start_offset(), 2);
        assert_eq!(log.read(2, 1024, 10, false).unwrap().records.len(), 1);
    }

    #[test]
    fn truncate_to_drops_suffix_and_caps_hw() {
        let mut log = MemoryLogStore::new();
        log.append(vec![rec("a"), rec("b"), rec("c")], -1).unwrap();
        log.set_high_watermark(3);
        log.truncate_to(1).unwrap();
        assert_eq!(log.log_end_offset(), 1);
        assert_eq!(log.high_watermark(), 1);
    }

    #[test]
    fn end_offset_for_epoch_tracks_boundaries() {
        let mut log = MemoryLogStore::new();
        log.record_epoch_start(1, 0);
        log.append(vec![rec("a"), rec("b")], -1).unwrap();
        log.record_epoch_start(2, 2);
        log.append(vec![rec("c")], -1).unwrap();

        assert_eq!(log.end_offset_for_epoch(1), Some((1, 2)));
        assert_eq!(log.end_offset_for_epoch(2), Some((2, 3)));
        assert_eq!(log.end_offset_for_epoch(5), Some((2, 3)));
    }
}
