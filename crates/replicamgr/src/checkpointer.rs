//! `HighWatermarkCheckpointer` (§4.8). Periodically flushes per-directory
//! `(topicPartition -> HW)` files using the atomic temp-file-then-rename
//! writer in `replicamgr_storage::checkpoint`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use replicamgr_storage::{checkpoint, TopicPartition};

use crate::hosted_map::HostedMap;
use crate::manager::HighWatermarkSource;

/// Maps a partition to the log directory it is rooted on, since that
/// assignment belongs to the (out-of-scope) LogManager, not the replica
/// manager.
pub trait LogDirLayout: Send + Sync {
    fn dir_for(&self, tp: &TopicPartition) -> Option<PathBuf>;
    fn all_dirs(&self) -> Vec<PathBuf>;
}

/// Filename used for the HW checkpoint within each log directory (§6).
const CHECKPOINT_FILE_NAME: &str = "replication-offset-checkpoint";

pub struct HighWatermarkCheckpointer;

impl HighWatermarkCheckpointer {
    /// Writes one checkpoint file per live log directory. A write failure on
    /// one directory is logged and does not abort the others (§4.8).
    pub fn checkpoint_all(hosted: &HostedMap, layout: &dyn LogDirLayout) {
        let mut per_dir: HashMap<PathBuf, HashMap<TopicPartition, u64>> = HashMap::new();
        for dir in layout.all_dirs() {
            per_dir.insert(dir, HashMap::new());
        }

        for (tp, state) in hosted.online_partitions() {
            let Some(dir) = layout.dir_for(&tp) else {
                continue;
            };
            per_dir
                .entry(dir)
                .or_default()
                .insert(tp, state.snapshot().high_watermark);
        }

        for (dir, entries) in per_dir {
            let path = dir.join(CHECKPOINT_FILE_NAME);
            if let Err(err) = checkpoint::write_checkpoint(&path, &entries) {
                log::warn!("high watermark checkpoint failed for {:?}: {}", path, err);
            }
        }
    }

    /// Drops the checkpoint file for a directory that just failed (§4.7).
    pub fn drop_checkpoint(dir: &Path) {
        let empty = HashMap::new();
        let path = dir.join(CHECKPOINT_FILE_NAME);
        if let Err(err) = checkpoint::write_checkpoint(&path, &empty) {
            log::warn!("failed to clear checkpoint for {:?}: {}", path, err);
        }
    }
}

/// Reads the checkpointed HW for a partition straight from its log
/// directory's checkpoint file (§4.2 makeLeader: "record HW from the
/// checkpoint on first create"). One file read per lookup; `become_leader_or_follower`
/// only consults this at local-log creation time, so the cost is paid once
/// per partition per process lifetime.
pub struct FileHighWatermarkSource {
    layout: Box<dyn LogDirLayout>,
}

impl FileHighWatermarkSource {
    pub fn new(layout: Box<dyn LogDirLayout>) -> Self {
        Self { layout }
    }
}

impl HighWatermarkSource for FileHighWatermarkSource {
    fn checkpointed_hw(&self, tp: &TopicPartition) -> Option<u64> {
        let dir = self.layout.dir_for(tp)?;
        let path = dir.join(CHECKPOINT_FILE_NAME);
        checkpoint::read_checkpoint(path).ok()?.get(tp).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::ReplicaManagerConfig;
    use crate::hosted_map::Hosted;
    use crate::partition::PartitionState;
    use crate::types::{BrokerId, ControllerEpoch, LeaderEpoch};
    use replicamgr_storage::{MemoryLogStore, PartitionId};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct SingleDirLayout(PathBuf);
    impl LogDirLayout for SingleDirLayout {
        fn dir_for(&self, _tp: &TopicPartition) -> Option<PathBuf> {
            Some(self.0.clone())
        }
        fn all_dirs(&self) -> Vec<PathBuf> {
            vec![self.0.clone()]
        }
    }

    #[test]
    fn checkpoint_all_round_trips_high_watermarks() {
        let dir = tempdir().unwrap();
        let hosted = HostedMap::new();
        let tp = TopicPartition::new("orders", PartitionId::new(0));

        let state = Arc::new(PartitionState::new(
            tp.clone(),
            BrokerId(1),
            ReplicaManagerConfig::default(),
        ));
        state.make_leader(
            LeaderEpoch(1),
            ControllerEpoch(1),
            vec![BrokerId(1)],
            vec![BrokerId(1)],
            Box::new(MemoryLogStore::new()),
            &SystemClock,
            None,
        );
        state.append_records_to_leader(
            vec![replicamgr_storage::LogRecord::new(None, b"a".to_vec())],
            1,
        )
        .unwrap();
        state.update_follower_fetch_state(BrokerId(1), 1, 0, 0, 1);
        hosted.insert(tp.clone(), Hosted::Online(state));

        let layout = SingleDirLayout(dir.path().to_path_buf());
        HighWatermarkCheckpointer::checkpoint_all(&hosted, &layout);

        let entries =
            checkpoint::read_checkpoint(dir.path().join(CHECKPOINT_FILE_NAME)).unwrap();
        assert_eq!(entries.get(&tp), Some(&1));
    }

    #[test]
    fn file_hw_source_restores_hw_on_leader_election_after_restart() {
        let dir = tempdir().unwrap();
        let tp = TopicPartition::new("orders", PartitionId::new(0));
        checkpoint::write_checkpoint(
            dir.path().join(CHECKPOINT_FILE_NAME),
            &HashMap::from([(tp.clone(), 7u64)]),
        )
        .unwrap();

        let source = FileHighWatermarkSource::new(Box::new(SingleDirLayout(
            dir.path().to_path_buf(),
        )));

        // Simulates a restart: the local log for this partition does not
        // exist yet, so makeLeader must consult the checkpoint instead of
        // starting the high watermark back at 0.
        let state = PartitionState::new(tp.clone(), BrokerId(1), ReplicaManagerConfig::default());
        state.make_leader(
            LeaderEpoch(2),
            ControllerEpoch(2),
            vec![BrokerId(1)],
            vec![BrokerId(1)],
            Box::new(MemoryLogStore::new()),
            &SystemClock,
            source.checkpointed_hw(&tp),
        );
        assert_eq!(state.snapshot().high_watermark, 7);
    }
}
