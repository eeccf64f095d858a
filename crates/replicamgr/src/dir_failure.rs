//! `LogDirFailureHandler` (§4.7). The channel a real deployment would wire
//! to the Log layer's disk-failure signal is out of scope (§1 "the Log...
//! consumed through an opaque interface"); this module exposes the handling
//! logic as a plain function over a `LogDirFailureEvent`, for a caller to
//! invoke from whatever receiver loop it drives the channel with.

use replicamgr_storage::TopicPartition;

use crate::hosted_map::{Hosted, HostedMap};

pub struct LogDirFailureEvent {
    pub log_dir: String,
}

/// Tells the handler which partitions live on a given directory, since that
/// mapping is owned by the log layer, not the replica manager.
pub trait LogDirIndex {
    fn partitions_on(&self, log_dir: &str) -> Vec<TopicPartition>;
}

pub struct LogDirFailureHandler {
    halt_on_failure: bool,
}

impl LogDirFailureHandler {
    pub fn new(halt_on_failure: bool) -> Self {
        Self { halt_on_failure }
    }

    /// Returns the set of partitions newly marked `Offline`, or `None` if
    /// the handler halted the process (in which case the caller should
    /// terminate immediately rather than continue).
    pub fn handle(
        &self,
        event: &LogDirFailureEvent,
        hosted: &HostedMap,
        index: &dyn LogDirIndex,
        fetcher: &crate::fetcher::FetcherManager,
    ) -> Option<Vec<TopicPartition>> {
        if self.halt_on_failure {
            return None;
        }

        let affected = index.partitions_on(&event.log_dir);
        fetcher.remove_fetcher_for_partitions(&affected);
        for tp in &affected {
            hosted.insert(tp.clone(), Hosted::Offline);
        }
        Some(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicamgr_storage::PartitionId;

    struct FixedIndex(Vec<TopicPartition>);
    impl LogDirIndex for FixedIndex {
        fn partitions_on(&self, _log_dir: &str) -> Vec<TopicPartition> {
            self.0.clone()
        }
    }

    #[test]
    fn marks_affected_partitions_offline() {
        let hosted = HostedMap::new();
        let tp = TopicPartition::new("orders", PartitionId::new(0));
        let index = FixedIndex(vec![tp.clone()]);
        let fetcher = crate::fetcher::FetcherManager::new();
        let handler = LogDirFailureHandler::new(false);

        let affected = handler
            .handle(
                &LogDirFailureEvent {
                    log_dir: "/data/0".to_string(),
                },
                &hosted,
                &index,
                &fetcher,
            )
            .unwrap();

        assert_eq!(affected, vec![tp.clone()]);
        assert!(hosted.get(&tp).is_offline());
    }

    #[test]
    fn halting_handler_reports_none() {
        let hosted = HostedMap::new();
        let index = FixedIndex(vec![]);
        let fetcher = crate::fetcher::FetcherManager::new();
        let handler = LogDirFailureHandler::new(true);
        let result = handler.handle(
            &LogDirFailureEvent {
                log_dir: "/data/0".to_string(),
            },
            &hosted,
            &index,
            &fetcher,
        );
        assert!(result.is_none());
    }
}
