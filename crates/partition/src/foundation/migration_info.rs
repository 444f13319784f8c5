//! Migration descriptor

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::types::{PartitionId, PartitionReplica};

/// Status of a migration. Transitions `Pending` to a terminal status exactly
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStatus {
    /// Scheduled but not yet committed
    Pending,
    /// Committed on the master and reflected in the partition table
    Success,
    /// Abandoned; the partition table was left untouched
    Failed,
}

impl MigrationStatus {
    /// Whether the migration has reached a terminal status
    pub fn is_terminal(self) -> bool {
        !matches!(self, MigrationStatus::Pending)
    }
}

/// Describes one replica-slot move of one partition.
///
/// Two migrations are equal iff their (partition, source, destination) triple
/// matches; the slot indexes and status do not participate in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationInfo {
    /// The partition being migrated
    pub partition_id: PartitionId,

    /// The replica being displaced, if the destination slot was occupied or a
    /// handoff is involved; `None` for a plain copy into an empty slot
    pub source: Option<PartitionReplica>,

    /// The replica being installed
    pub destination: PartitionReplica,

    /// Slot the source currently occupies, cleared on commit
    pub source_current_replica_index: Option<usize>,

    /// Slot the destination currently occupies, if it is already a replica of
    /// this partition (promotion / shift); cleared on commit
    pub destination_current_replica_index: Option<usize>,

    /// Slot the destination will occupy after commit
    pub destination_new_replica_index: usize,

    /// Current status
    pub status: MigrationStatus,
}

impl MigrationInfo {
    /// Create a pending migration
    pub fn new(
        partition_id: PartitionId,
        source: Option<PartitionReplica>,
        destination: PartitionReplica,
        source_current_replica_index: Option<usize>,
        destination_current_replica_index: Option<usize>,
        destination_new_replica_index: usize,
    ) -> Self {
        Self {
            partition_id,
            source,
            destination,
            source_current_replica_index,
            destination_current_replica_index,
            destination_new_replica_index,
            status: MigrationStatus::Pending,
        }
    }

    /// Set the status. A terminal status is never overwritten by another one.
    pub fn set_status(&mut self, status: MigrationStatus) {
        debug_assert!(
            !self.status.is_terminal() || self.status == status,
            "migration already finalized: {self}"
        );
        self.status = status;
    }

    /// Whether the given (address, uuid) pair participates in this migration
    pub fn involves(&self, replica: &PartitionReplica) -> bool {
        self.source.as_ref() == Some(replica) || &self.destination == replica
    }
}

impl PartialEq for MigrationInfo {
    fn eq(&self, other: &Self) -> bool {
        self.partition_id == other.partition_id
            && self.source == other.source
            && self.destination == other.destination
    }
}

impl Eq for MigrationInfo {}

impl Hash for MigrationInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.partition_id.hash(state);
        self.source.hash(state);
        self.destination.hash(state);
    }
}

impl fmt::Display for MigrationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(
                f,
                "MigrationInfo {{ partition: {}, source: {}, destination: {} -> slot {}, status: {:?} }}",
                self.partition_id,
                source,
                self.destination,
                self.destination_new_replica_index,
                self.status,
            ),
            None => write!(
                f,
                "MigrationInfo {{ partition: {}, destination: {} -> slot {}, status: {:?} }}",
                self.partition_id,
                self.destination,
                self.destination_new_replica_index,
                self.status,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmesh_cluster::NodeId;

    fn replica(port: u16, seed: u8) -> PartitionReplica {
        PartitionReplica {
            address: format!("127.0.0.1:{port}").parse().unwrap(),
            uuid: NodeId::from_seed(seed),
        }
    }

    fn migration(partition: u32, source_seed: u8, destination_seed: u8) -> MigrationInfo {
        MigrationInfo::new(
            PartitionId::new(partition),
            Some(replica(5701, source_seed)),
            replica(5702, destination_seed),
            Some(0),
            None,
            0,
        )
    }

    #[test]
    fn equality_ignores_status_and_indexes() {
        let a = migration(1, 1, 2);
        let mut b = migration(1, 1, 2);
        b.set_status(MigrationStatus::Success);
        b.destination_new_replica_index = 3;
        assert_eq!(a, b);

        assert_ne!(a, migration(2, 1, 2));
        assert_ne!(a, migration(1, 3, 2));
        assert_ne!(a, migration(1, 1, 3));
    }

    #[test]
    fn involves_matches_source_and_destination() {
        let m = migration(0, 1, 2);
        assert!(m.involves(&replica(5701, 1)));
        assert!(m.involves(&replica(5702, 2)));
        assert!(!m.involves(&replica(5703, 3)));
    }
}
