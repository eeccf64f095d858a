//! Fencing tokens and identities specific to the replica manager's domain
//! (§3, GLOSSARY). Topic/partition/broker identity lives in
//! `replicamgr-storage` and is re-exported from here for convenience.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use replicamgr_storage::{BrokerId, PartitionId, TopicPartition};

/// Monotone counter incremented on every leader change; fencing token for
/// all partition operations (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaderEpoch(pub u32);

impl LeaderEpoch {
    pub const INITIAL: LeaderEpoch = LeaderEpoch(0);

    pub fn next(self) -> Self {
        LeaderEpoch(self.0 + 1)
    }
}

impl fmt::Display for LeaderEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "leader-epoch-{}", self.0)
    }
}

/// Monotone counter incremented on every controller change; fencing token
/// for control directives (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControllerEpoch(pub u64);

impl fmt::Display for ControllerEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller-epoch-{}", self.0)
    }
}
