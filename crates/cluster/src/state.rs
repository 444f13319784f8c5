//! Cluster-wide state as published by the membership service

use serde::{Deserialize, Serialize};
use std::fmt;

/// The operational state of the cluster as a whole.
///
/// The partition service never changes this; it only consults it to decide
/// whether the partition table may be mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    /// Normal operation: joins, migrations and promotions are all allowed
    Active,

    /// New members may join but the partition table is pinned; lost replicas
    /// may still be promoted from backups
    NoMigration,

    /// Membership and partition table are both pinned; only previously known
    /// members may rejoin
    Frozen,

    /// Shutdown preparation: no joins, no migrations, no promotions
    Passive,
}

impl ClusterState {
    /// Whether repartitioning and migrations may run
    pub fn is_migration_allowed(self) -> bool {
        matches!(self, ClusterState::Active)
    }

    /// Whether new members may join the cluster
    pub fn is_join_allowed(self) -> bool {
        matches!(self, ClusterState::Active | ClusterState::NoMigration)
    }

    /// Whether backup replicas may be promoted to cover a lost owner
    pub fn is_partition_promotion_allowed(self) -> bool {
        !matches!(self, ClusterState::Passive)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Active => write!(f, "ACTIVE"),
            ClusterState::NoMigration => write!(f, "NO_MIGRATION"),
            ClusterState::Frozen => write!(f, "FROZEN"),
            ClusterState::Passive => write!(f, "PASSIVE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_allows_migration() {
        assert!(ClusterState::Active.is_migration_allowed());
        assert!(!ClusterState::NoMigration.is_migration_allowed());
        assert!(!ClusterState::Frozen.is_migration_allowed());
        assert!(!ClusterState::Passive.is_migration_allowed());
    }

    #[test]
    fn promotion_survives_frozen_but_not_passive() {
        assert!(ClusterState::Frozen.is_partition_promotion_allowed());
        assert!(!ClusterState::Passive.is_partition_promotion_allowed());
    }
}
