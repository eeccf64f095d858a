//! `HostedMap` (§2.4, §3 I1): process-wide `topic-partition → Hosted` map.
//! Lock-free for readers; insertions/removals only happen under the
//! state-change lock held by the caller (`ReplicaManager`), matching the
//! discipline §5 lays out ("state-change lock → partition write-lock → log
//! lock, never acquired in reverse").

use dashmap::DashMap;
use replicamgr_storage::TopicPartition;
use std::sync::Arc;

use crate::partition::PartitionState;

/// Sealed as a three-way enum rather than `Option<Option<_>>` so `Offline`
/// is distinguishable from `None` (§9 "Sealed variant Hosted").
#[derive(Clone)]
pub enum Hosted {
    None,
    Online(Arc<PartitionState>),
    Offline,
}

impl Hosted {
    pub fn is_online(&self) -> bool {
        matches!(self, Hosted::Online(_))
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Hosted::Offline)
    }

    pub fn online(&self) -> Option<&Arc<PartitionState>> {
        match self {
            Hosted::Online(state) => Some(state),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct HostedMap {
    inner: DashMap<TopicPartition, Hosted>,
}

impl HostedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tp: &TopicPartition) -> Hosted {
        self.inner
            .get(tp)
            .map(|entry| entry.value().clone())
            .unwrap_or(Hosted::None)
    }

    /// Only called while the caller holds the state-change lock.
    pub fn insert(&self, tp: TopicPartition, hosted: Hosted) {
        self.inner.insert(tp, hosted);
    }

    /// Only called while the caller holds the state-change lock.
    pub fn remove(&self, tp: &TopicPartition) {
        self.inner.remove(tp);
    }

    pub fn online_partitions(&self) -> Vec<(TopicPartition, Arc<PartitionState>)> {
        self.inner
            .iter()
            .filter_map(|entry| match entry.value() {
                Hosted::Online(state) => Some((entry.key().clone(), state.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, tp: &TopicPartition) -> bool {
        !matches!(self.get(tp), Hosted::None)
    }
}
