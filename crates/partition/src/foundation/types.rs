//! Partition table data model

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use gridmesh_cluster::{Member, NodeId};

use super::migration_info::MigrationInfo;

/// Maximum number of replica slots per partition: one owner plus six backups.
pub const MAX_REPLICA_COUNT: usize = 7;

/// Maximum number of backup replicas per partition.
pub const MAX_BACKUP_COUNT: usize = MAX_REPLICA_COUNT - 1;

/// Identifier of a partition, in `[0, partition_count)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Create a partition ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The partition ID as a table index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps a key's partition hash onto `[0, length)`.
///
/// Deterministic for a fixed `length`: two keys with equal hashes always land
/// on the same partition, on every node.
pub fn hash_to_index(hash: i32, length: usize) -> usize {
    debug_assert!(length > 0);
    if hash == i32::MIN {
        return 0;
    }
    hash.unsigned_abs() as usize % length
}

/// One occupant of a replica slot: the address and process-unique id of the
/// member holding that replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionReplica {
    /// Network address of the member
    pub address: SocketAddr,

    /// Process-unique id of the member
    pub uuid: NodeId,
}

impl PartitionReplica {
    /// Create a replica reference from a member
    pub fn from_member(member: &Member) -> Self {
        Self {
            address: member.address,
            uuid: member.id,
        }
    }

    /// Whether this replica refers to the given member
    pub fn is_member(&self, member: &Member) -> bool {
        self.address == member.address && self.uuid == member.id
    }
}

impl fmt::Display for PartitionReplica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.address, self.uuid)
    }
}

/// Replica slot assignment of one partition.
///
/// Slot 0 is the owner; slots 1..[`MAX_BACKUP_COUNT`] are backups in priority
/// order. Until the first arrangement all slots are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalPartition {
    partition_id: PartitionId,
    replicas: [Option<PartitionReplica>; MAX_REPLICA_COUNT],
}

impl InternalPartition {
    /// Create an empty partition
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            replicas: [None; MAX_REPLICA_COUNT],
        }
    }

    /// Create a partition with the given replica slots
    pub fn with_replicas(
        partition_id: PartitionId,
        replicas: [Option<PartitionReplica>; MAX_REPLICA_COUNT],
    ) -> Self {
        Self {
            partition_id,
            replicas,
        }
    }

    /// The partition ID
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// The owner replica, if assigned
    pub fn owner(&self) -> Option<&PartitionReplica> {
        self.replicas[0].as_ref()
    }

    /// The replica at the given slot
    pub fn replica(&self, index: usize) -> Option<&PartitionReplica> {
        self.replicas.get(index).and_then(|r| r.as_ref())
    }

    /// All replica slots in priority order
    pub fn replicas(&self) -> &[Option<PartitionReplica>; MAX_REPLICA_COUNT] {
        &self.replicas
    }

    /// Overwrite the replica at the given slot, returning the previous value
    pub fn set_replica(
        &mut self,
        index: usize,
        replica: Option<PartitionReplica>,
    ) -> Option<PartitionReplica> {
        std::mem::replace(&mut self.replicas[index], replica)
    }

    /// Replace all slots at once, returning the previous assignment
    pub fn set_replicas(
        &mut self,
        replicas: [Option<PartitionReplica>; MAX_REPLICA_COUNT],
    ) -> [Option<PartitionReplica>; MAX_REPLICA_COUNT] {
        std::mem::replace(&mut self.replicas, replicas)
    }

    /// The slot index the given replica occupies, if any
    pub fn replica_index_of(&self, replica: &PartitionReplica) -> Option<usize> {
        self.replicas
            .iter()
            .position(|r| r.as_ref() == Some(replica))
    }

    /// Whether any slot references the given member
    pub fn references(&self, address: SocketAddr, uuid: NodeId) -> bool {
        self.replicas
            .iter()
            .flatten()
            .any(|r| r.address == address && r.uuid == uuid)
    }

    /// A partition with at least one non-empty slot is assigned
    pub fn is_assigned(&self) -> bool {
        self.replicas.iter().any(|r| r.is_some())
    }

    /// Whether the given member owns this partition
    pub fn is_owned_by(&self, member: &Member) -> bool {
        self.owner().is_some_and(|o| o.is_member(member))
    }
}

/// An immutable snapshot of the whole partition table at one state version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTableView {
    /// Partitions in ID order
    pub partitions: Vec<InternalPartition>,

    /// State version of the snapshot
    pub version: u32,
}

impl PartitionTableView {
    /// Number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Whether the table has no partitions
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

/// The wire-level partition state snapshot exchanged between members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionRuntimeState {
    /// Address of the master that produced this snapshot
    pub master: SocketAddr,

    /// Partitions in ID order
    pub partitions: Vec<InternalPartition>,

    /// State version of the snapshot
    pub version: u32,

    /// Migrations completed up to this version that peers may still need to
    /// finalize
    pub completed_migrations: Vec<MigrationInfo>,

    /// The migration in flight when this snapshot was taken, if any
    pub active_migration: Option<MigrationInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(port: u16, seed: u8) -> PartitionReplica {
        PartitionReplica {
            address: format!("127.0.0.1:{port}").parse().unwrap(),
            uuid: NodeId::from_seed(seed),
        }
    }

    #[test]
    fn hash_to_index_is_deterministic_and_in_range() {
        for hash in [0, 1, -1, 42, i32::MAX, i32::MIN, -271] {
            let index = hash_to_index(hash, 271);
            assert!(index < 271);
            assert_eq!(index, hash_to_index(hash, 271));
        }
        assert_eq!(hash_to_index(i32::MIN, 271), 0);
        assert_eq!(hash_to_index(-5, 271), hash_to_index(5, 271));
    }

    #[test]
    fn empty_partition_is_not_assigned() {
        let partition = InternalPartition::new(PartitionId::new(3));
        assert!(!partition.is_assigned());
        assert!(partition.owner().is_none());
    }

    #[test]
    fn set_replica_returns_previous_occupant() {
        let mut partition = InternalPartition::new(PartitionId::new(0));
        let first = replica(5701, 1);
        let second = replica(5702, 2);

        assert_eq!(partition.set_replica(0, Some(first)), None);
        assert_eq!(partition.set_replica(0, Some(second)), Some(first));
        assert_eq!(partition.replica_index_of(&second), Some(0));
        assert!(partition.is_assigned());
    }

    #[test]
    fn replica_equality_requires_address_and_uuid() {
        let a = replica(5701, 1);
        let mut b = a;
        b.uuid = NodeId::from_seed(2);
        assert_ne!(a, b);
    }
}
