//! `ReplicaSelector` (§4.3, §9). Only invoked on the leader for a consumer
//! fetch, never a follower fetch. Takes the stricter of the two documented
//! policies: a replica is only eligible if it is currently an ISR member
//! (not merely assigned).

use std::collections::HashMap;

use crate::types::BrokerId;

/// Endpoint + staleness snapshot the selector needs for one ISR member.
#[derive(Debug, Clone, Copy)]
pub struct ReplicaView {
    pub broker_id: BrokerId,
    pub log_start_offset: u64,
    pub log_end_offset: u64,
}

/// Opaque consumer-supplied hints (rack id, client id, ...). Kept as a
/// string map since the wire format of client metadata is out of scope.
pub type ClientMetadata = HashMap<String, String>;

pub trait ReplicaSelector: Send + Sync {
    fn configure(&mut self, _config: &HashMap<String, String>) {}

    /// Returns `None` to mean "read from the leader" (§4.3 default policy).
    fn select(
        &self,
        isr_views: &[ReplicaView],
        client_metadata: &ClientMetadata,
        fetch_offset: u64,
    ) -> Option<BrokerId>;
}

/// Default policy: always prefer the leader (§4.3, §9).
#[derive(Debug, Default)]
pub struct LeaderOnlySelector;

impl ReplicaSelector for LeaderOnlySelector {
    fn select(
        &self,
        _isr_views: &[ReplicaView],
        _client_metadata: &ClientMetadata,
        _fetch_offset: u64,
    ) -> Option<BrokerId> {
        None
    }
}

/// Filters eligible replicas the way any real selector must: only ISR
/// members whose `[logStartOffset, logEndOffset]` covers `fetchOffset`
/// (§4.3). A concrete selector implementation calls this before applying
/// its own preference (e.g. rack affinity) over the remaining candidates.
pub fn eligible_replicas(isr_views: &[ReplicaView], fetch_offset: u64) -> Vec<ReplicaView> {
    isr_views
        .iter()
        .filter(|v| v.log_start_offset <= fetch_offset && fetch_offset <= v.log_end_offset)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(id: u32, start: u64, end: u64) -> ReplicaView {
        ReplicaView {
            broker_id: BrokerId(id),
            log_start_offset: start,
            log_end_offset: end,
        }
    }

    #[test]
    fn default_selector_always_picks_leader() {
        let selector = LeaderOnlySelector;
        let views = vec![view(2, 0, 10)];
        assert_eq!(selector.select(&views, &HashMap::new(), 5), None);
    }

    #[test]
    fn eligible_replicas_excludes_out_of_range_members() {
        let views = vec![view(1, 0, 10), view(2, 5, 10), view(3, 0, 3)];
        let eligible = eligible_replicas(&views, 4);
        let ids: Vec<_> = eligible.iter().map(|v| v.broker_id).collect();
        assert_eq!(ids, vec![BrokerId(1)]);
    }
}
