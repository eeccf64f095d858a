//! The `MetadataCache` collaborator (§6): the cluster-wide view of alive
//! brokers, replica endpoints and topic existence. Owned by the controller
//! boundary, consumed read-mostly by the replica manager.

use crate::types::{BrokerId, TopicPartition};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub broker_id: BrokerId,
    pub host: String,
    pub port: u16,
}

/// One `UpdateMetadataRequest` as the controller would publish it: the
/// brokers currently alive plus, per hosted partition, its replica set.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdateRequest {
    pub alive_brokers: Vec<BrokerEndpoint>,
    pub partitions: HashMap<TopicPartition, Vec<BrokerId>>,
    /// Partitions no longer present in this metadata snapshot; the cache
    /// reports these back to the caller so it can stop hosting them.
    pub removed_partitions: Vec<TopicPartition>,
}

pub trait MetadataCache: Send + Sync {
    fn alive_brokers(&self) -> Vec<BrokerId>;

    fn is_alive(&self, broker: BrokerId) -> bool {
        self.alive_brokers().contains(&broker)
    }

    /// Replica endpoints for `tp` on the given listener name. Listener
    /// routing is opaque here; `listener` is passed through unused by the
    /// in-memory cache, which has exactly one endpoint set per broker.
    fn partition_replica_endpoints(&self, tp: &TopicPartition, listener: &str) -> Vec<BrokerEndpoint>;

    fn contains(&self, tp: &TopicPartition) -> bool;

    /// Apply an `UpdateMetadataRequest`; returns the partitions that were
    /// present before and are no longer in the new snapshot.
    fn update_metadata(
        &self,
        correlation_id: u64,
        request: MetadataUpdateRequest,
    ) -> Vec<TopicPartition>;
}

#[derive(Debug, Default)]
struct CacheState {
    brokers: HashMap<BrokerId, BrokerEndpoint>,
    partitions: HashMap<TopicPartition, HashSet<BrokerId>>,
    last_correlation_id: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataCache {
    state: RwLock<CacheState>,
}

impl InMemoryMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataCache for InMemoryMetadataCache {
    fn alive_brokers(&self) -> Vec<BrokerId> {
        self.state.read().brokers.keys().copied().collect()
    }

    fn partition_replica_endpoints(&self, tp: &TopicPartition, _listener: &str) -> Vec<BrokerEndpoint> {
        let state = self.state.read();
        let Some(replicas) = state.partitions.get(tp) else {
            return Vec::new();
        };
        replicas
            .iter()
            .filter_map(|id| state.brokers.get(id).cloned())
            .collect()
    }

    fn contains(&self, tp: &TopicPartition) -> bool {
        self.state.read().partitions.contains_key(tp)
    }

    fn update_metadata(
        &self,
        correlation_id: u64,
        request: MetadataUpdateRequest,
    ) -> Vec<TopicPartition> {
        let mut state = self.state.write();
        state.last_correlation_id = correlation_id;

        state.brokers = request
            .alive_brokers
            .into_iter()
            .map(|b| (b.broker_id, b))
            .collect();

        for tp in &request.removed_partitions {
            state.partitions.remove(tp);
        }

        for (tp, replicas) in request.partitions {
            state.partitions.insert(tp, replicas.into_iter().collect());
        }

        request.removed_partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: u32) -> BrokerEndpoint {
        BrokerEndpoint {
            broker_id: BrokerId(id),
            host: "127.0.0.1".into(),
            port: 9000 + id as u16,
        }
    }

    #[test]
    fn update_metadata_populates_alive_brokers_and_partitions() {
        let cache = InMemoryMetadataCache::new();
        let tp = TopicPartition::new("orders", 0u32);
        let mut partitions = HashMap::new();
        partitions.insert(tp.clone(), vec![BrokerId(1), BrokerId(2)]);

        let deleted = cache.update_metadata(
            1,
            MetadataUpdateRequest {
                alive_brokers: vec![endpoint(1), endpoint(2)],
                partitions,
                removed_partitions: Vec::new(),
            },
        );

        assert!(deleted.is_empty());
        assert!(cache.contains(&tp));
        assert_eq!(cache.alive_brokers().len(), 2);
        assert_eq!(cache.partition_replica_endpoints(&tp, "PLAINTEXT").len(), 2);
    }

    #[test]
    fn update_metadata_reports_removed_partitions() {
        let cache = InMemoryMetadataCache::new();
        let tp = TopicPartition::new("orders", 0u32);
        let mut partitions = HashMap::new();
        partitions.insert(tp.clone(), vec![BrokerId(1)]);
        cache.update_metadata(
            1,
            MetadataUpdateRequest {
                alive_brokers: vec![endpoint(1)],
                partitions,
                removed_partitions: Vec::new(),
            },
        );

        let deleted = cache.update_metadata(
            2,
            MetadataUpdateRequest {
                alive_brokers: vec![endpoint(1)],
                partitions: HashMap::new(),
                removed_partitions: vec![tp.clone()],
            },
        );

        assert_eq!(deleted, vec![tp.clone()]);
        assert!(!cache.contains(&tp));
    }

    #[test]
    fn unknown_partition_has_no_endpoints() {
        let cache = InMemoryMetadataCache::new();
        let tp = TopicPartition::new("missing", 0u32);
        assert!(cache.partition_replica_endpoints(&tp, "PLAINTEXT").is_empty());
        assert!(!cache.contains(&tp));
    }
}
