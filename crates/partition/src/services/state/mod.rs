//! Partition state manager
//!
//! Owns the in-memory partition table, its version counter and the member
//! group sizing. All compound mutations are serialized by the coordinator
//! lock in [`PartitionService`](crate::PartitionService); this manager only
//! guards its own interior state.

pub mod arranger;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use gridmesh_cluster::{ClusterDirectory, Member};

use crate::error::{PartitionError, PartitionResult};
use crate::foundation::{
    InternalPartition, PartitionEventManager, PartitionId, PartitionLostEvent, PartitionReplica,
    PartitionTableView, ReplicaChangeEvent, MAX_REPLICA_COUNT,
};

use arranger::{MemberGroup, MemberGroupStrategy};

struct TableState {
    partitions: Vec<InternalPartition>,
    version: u32,
    initialized: bool,
    member_groups_size: usize,
}

/// Owns the partition table and its monotonic state version.
pub struct PartitionStateManager {
    partition_count: usize,
    backup_count: usize,
    local: Member,
    cluster: Arc<dyn ClusterDirectory>,
    strategy: Arc<dyn MemberGroupStrategy>,
    events: Arc<PartitionEventManager>,
    state: RwLock<TableState>,
}

impl PartitionStateManager {
    /// Create a manager with an empty, uninitialized table.
    pub fn new(
        partition_count: usize,
        backup_count: usize,
        local: Member,
        cluster: Arc<dyn ClusterDirectory>,
        strategy: Arc<dyn MemberGroupStrategy>,
        events: Arc<PartitionEventManager>,
    ) -> Self {
        let partitions = (0..partition_count)
            .map(|p| InternalPartition::new(PartitionId::new(p as u32)))
            .collect();
        Self {
            partition_count,
            backup_count,
            local,
            cluster,
            strategy,
            events,
            state: RwLock::new(TableState {
                partitions,
                version: 0,
                initialized: false,
                member_groups_size: 0,
            }),
        }
    }

    /// Whether the first arrangement (or an applied remote table) has
    /// populated the table
    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    /// Current partition state version
    pub async fn version(&self) -> u32 {
        self.state.read().await.version
    }

    /// Overwrite the version. Callers are responsible for monotonicity.
    pub async fn set_version(&self, version: u32) {
        self.state.write().await.version = version;
    }

    /// Bump the version by one and return the new value
    pub async fn increment_version(&self) -> u32 {
        let mut state = self.state.write().await;
        state.version += 1;
        state.version
    }

    /// Snapshot of one partition
    pub async fn partition(&self, partition_id: PartitionId) -> InternalPartition {
        self.state.read().await.partitions[partition_id.index()].clone()
    }

    /// Snapshot of the whole table
    pub async fn partitions_copy(&self) -> Vec<InternalPartition> {
        self.state.read().await.partitions.clone()
    }

    /// Snapshot of the table with its version
    pub async fn table_view(&self) -> PartitionTableView {
        let state = self.state.read().await;
        PartitionTableView {
            partitions: state.partitions.clone(),
            version: state.version,
        }
    }

    /// Overwrite the replica slots of one partition, firing replica-change
    /// and partition-lost events for the differences.
    pub async fn update_replicas(
        &self,
        partition_id: PartitionId,
        replicas: [Option<PartitionReplica>; MAX_REPLICA_COUNT],
    ) {
        let changes = {
            let mut state = self.state.write().await;
            let partition = &mut state.partitions[partition_id.index()];
            let old = partition.set_replicas(replicas);
            diff_replicas(partition_id, &old, &replicas)
        };
        self.fire_changes(&changes);
    }

    /// Overwrite a single replica slot, firing events for the change.
    pub async fn update_replica(
        &self,
        partition_id: PartitionId,
        replica_index: usize,
        replica: Option<PartitionReplica>,
    ) {
        let change = {
            let mut state = self.state.write().await;
            let partition = &mut state.partitions[partition_id.index()];
            let old = partition.set_replica(replica_index, replica);
            if old == replica {
                return;
            }
            ReplicaChangeEvent {
                partition_id,
                replica_index,
                old_replica: old,
                new_replica: replica,
            }
        };
        self.fire_changes(std::slice::from_ref(&change));
    }

    /// Replace every replica referencing `old` with `new`.
    pub async fn replace_member(&self, old: &Member, new: &Member) {
        let old_replica = PartitionReplica::from_member(old);
        let new_replica = PartitionReplica::from_member(new);
        let changes = {
            let mut state = self.state.write().await;
            let mut changes = Vec::new();
            for partition in &mut state.partitions {
                if let Some(index) = partition.replica_index_of(&old_replica) {
                    partition.set_replica(index, Some(new_replica));
                    changes.push(ReplicaChangeEvent {
                        partition_id: partition.partition_id(),
                        replica_index: index,
                        old_replica: Some(old_replica),
                        new_replica: Some(new_replica),
                    });
                }
            }
            changes
        };
        info!(%old, %new, changed = changes.len(), "replaced member in partition table");
        self.fire_changes(&changes);
    }

    /// Set the initial table and version. Fails if already initialized; the
    /// initialized flag is only raised if the table actually assigns a
    /// partition.
    pub async fn set_initial_state(&self, table: PartitionTableView) -> PartitionResult<()> {
        let changes = {
            let mut state = self.state.write().await;
            if state.initialized {
                return Err(PartitionError::AlreadyInitialized);
            }
            let mut changes = Vec::new();
            for incoming in table.partitions.into_iter().take(self.partition_count) {
                let partition_id = incoming.partition_id();
                let partition = &mut state.partitions[partition_id.index()];
                let replicas = *incoming.replicas();
                let old = partition.set_replicas(replicas);
                changes.extend(diff_replicas(partition_id, &old, &replicas));
            }
            state.version = table.version;
            state.initialized = state.partitions.iter().any(|p| p.is_assigned());
            info!(
                version = state.version,
                initialized = state.initialized,
                "initial partition table set"
            );
            changes
        };
        self.fire_changes(&changes);
        Ok(())
    }

    /// Compute and apply the first arrangement over the current data members,
    /// excluding `excluded`. Returns true iff any partition got an owner;
    /// success initializes the table and bumps the version.
    pub async fn initialize_partition_assignments(
        &self,
        excluded: &HashSet<Member>,
    ) -> bool {
        let groups = self.available_groups(excluded).await;
        if groups.is_empty() {
            debug!("no data members available for partition assignment");
            return false;
        }

        let arrangement =
            arranger::arrange_fresh(&groups, self.partition_count, self.backup_count);

        let changes = {
            let mut state = self.state.write().await;
            let mut changes = Vec::new();
            for (index, replicas) in arrangement.into_iter().enumerate() {
                let partition_id = PartitionId::new(index as u32);
                let partition = &mut state.partitions[index];
                let old = partition.set_replicas(replicas);
                changes.extend(diff_replicas(partition_id, &old, &replicas));
            }

            if !state.partitions.iter().any(|p| p.owner().is_some()) {
                return false;
            }
            state.initialized = true;
            state.version += 1;
            info!(
                version = state.version,
                groups = groups.len(),
                "partitions assigned for the first time"
            );
            changes
        };
        self.fire_changes(&changes);
        true
    }

    /// Group the currently known data members, excluding `excluded`.
    pub async fn available_groups(&self, excluded: &HashSet<Member>) -> Vec<MemberGroup> {
        let members = self.cluster.members().await;
        let data_members: Vec<Member> = members
            .data_members()
            .filter(|m| !excluded.contains(m))
            .cloned()
            .collect();
        self.strategy.group_members(&data_members)
    }

    /// Recompute the member group count from the current member list
    pub async fn update_member_groups_size(&self) {
        let groups = self.available_groups(&HashSet::new()).await.len();
        self.state.write().await.member_groups_size = groups;
    }

    /// Member group count as of the last update
    pub async fn member_groups_size(&self) -> usize {
        self.state.read().await.member_groups_size
    }

    /// Largest backup count the current member group count can support
    pub async fn max_allowed_backup_count(&self) -> usize {
        arranger::replica_count(self.member_groups_size().await, self.backup_count)
            .saturating_sub(1)
    }

    /// Raise the initialized flag if any partition is assigned. Returns true
    /// iff the flag was newly raised.
    pub async fn set_initialized(&self) -> bool {
        let mut state = self.state.write().await;
        if !state.initialized && state.partitions.iter().any(|p| p.is_assigned()) {
            state.initialized = true;
            true
        } else {
            false
        }
    }

    /// Clear all slots, reset the version to 0 and drop the initialized
    /// flag. Fires no events; reset is teardown, not a state transition
    /// peers observe.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        for partition in &mut state.partitions {
            partition.set_replicas([None; MAX_REPLICA_COUNT]);
        }
        state.version = 0;
        state.initialized = false;
    }

    fn fire_changes(&self, changes: &[ReplicaChangeEvent]) {
        for change in changes {
            self.events.send_replica_changed(change);
            // Owner slot cleared without replacement means the partition is
            // lost until a promotion or arrangement repairs it.
            if change.replica_index == 0 && change.new_replica.is_none() {
                if let Some(old_owner) = &change.old_replica {
                    let event = PartitionLostEvent {
                        partition_id: change.partition_id,
                        lost_backup_count: 0,
                        source: self.local.address,
                    };
                    self.events
                        .send_partition_lost(&event, old_owner.is_member(&self.local));
                }
            }
        }
    }
}

fn diff_replicas(
    partition_id: PartitionId,
    old: &[Option<PartitionReplica>; MAX_REPLICA_COUNT],
    new: &[Option<PartitionReplica>; MAX_REPLICA_COUNT],
) -> Vec<ReplicaChangeEvent> {
    old.iter()
        .zip(new.iter())
        .enumerate()
        .filter(|(_, (o, n))| o != n)
        .map(|(index, (o, n))| ReplicaChangeEvent {
            partition_id,
            replica_index: index,
            old_replica: *o,
            new_replica: *n,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arranger::PerMemberGroupStrategy;
    use gridmesh_cluster::{LocalClusterDirectory, NodeId};

    fn member(port: u16, seed: u8) -> Member {
        Member::new(
            format!("127.0.0.1:{port}").parse().unwrap(),
            NodeId::from_seed(seed),
        )
    }

    async fn manager_with_members(members: Vec<Member>) -> PartitionStateManager {
        let local = members[0].clone();
        let directory = Arc::new(LocalClusterDirectory::new(local.clone()));
        directory.set_members(members).await;
        PartitionStateManager::new(
            7,
            1,
            local,
            directory,
            Arc::new(PerMemberGroupStrategy),
            Arc::new(PartitionEventManager::new()),
        )
    }

    #[tokio::test]
    async fn first_arrangement_initializes_and_bumps_version() {
        let manager =
            manager_with_members(vec![member(5701, 1), member(5702, 2), member(5703, 3)]).await;

        assert!(!manager.is_initialized().await);
        assert_eq!(manager.version().await, 0);

        assert!(manager.initialize_partition_assignments(&HashSet::new()).await);

        assert!(manager.is_initialized().await);
        assert_eq!(manager.version().await, 1);
        for p in 0..7 {
            let partition = manager.partition(PartitionId::new(p)).await;
            assert!(partition.owner().is_some());
            assert!(partition.replica(1).is_some());
            assert_ne!(partition.owner(), partition.replica(1));
        }
    }

    #[tokio::test]
    async fn arrangement_fails_without_data_members() {
        let lite = Member::lite("127.0.0.1:5701".parse().unwrap(), NodeId::from_seed(1));
        let directory = Arc::new(LocalClusterDirectory::new(lite.clone()));
        let manager = PartitionStateManager::new(
            7,
            1,
            lite,
            directory,
            Arc::new(PerMemberGroupStrategy),
            Arc::new(PartitionEventManager::new()),
        );

        assert!(!manager.initialize_partition_assignments(&HashSet::new()).await);
        assert!(!manager.is_initialized().await);
        assert_eq!(manager.version().await, 0);
    }

    #[tokio::test]
    async fn set_initial_state_rejects_second_call() {
        let manager = manager_with_members(vec![member(5701, 1), member(5702, 2)]).await;

        let mut partitions: Vec<_> = (0..7)
            .map(|p| InternalPartition::new(PartitionId::new(p)))
            .collect();
        partitions[0].set_replica(0, Some(PartitionReplica::from_member(&member(5701, 1))));

        let table = PartitionTableView {
            partitions: partitions.clone(),
            version: 5,
        };
        manager.set_initial_state(table.clone()).await.unwrap();
        assert!(manager.is_initialized().await);
        assert_eq!(manager.version().await, 5);

        let err = manager.set_initial_state(table).await.unwrap_err();
        assert!(matches!(err, PartitionError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let manager =
            manager_with_members(vec![member(5701, 1), member(5702, 2), member(5703, 3)]).await;
        assert!(manager.initialize_partition_assignments(&HashSet::new()).await);

        manager.reset().await;

        assert!(!manager.is_initialized().await);
        assert_eq!(manager.version().await, 0);
        for p in 0..7 {
            assert!(!manager.partition(PartitionId::new(p)).await.is_assigned());
        }
    }

    #[tokio::test]
    async fn replace_member_swaps_every_slot() {
        let old = member(5702, 2);
        let manager =
            manager_with_members(vec![member(5701, 1), old.clone(), member(5703, 3)]).await;
        assert!(manager.initialize_partition_assignments(&HashSet::new()).await);

        let new = member(5704, 4);
        manager.replace_member(&old, &new).await;

        let old_replica = PartitionReplica::from_member(&old);
        for p in 0..7 {
            let partition = manager.partition(PartitionId::new(p)).await;
            assert!(partition.replica_index_of(&old_replica).is_none());
        }
    }
}
