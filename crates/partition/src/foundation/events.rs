//! Partition event listeners
//!
//! Listener registries are deliberately decoupled from the core state
//! machine: dispatch happens after the relevant mutation commits, and no
//! invariant of the partition table depends on listener behavior.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use super::migration_info::MigrationInfo;
use super::types::{PartitionId, PartitionReplica};

/// A migration observed from the outside
#[derive(Debug, Clone)]
pub struct MigrationEvent {
    /// The migration this event describes
    pub migration: MigrationInfo,
}

/// A partition whose owner was lost
#[derive(Debug, Clone)]
pub struct PartitionLostEvent {
    /// The partition that lost its owner
    pub partition_id: PartitionId,

    /// Number of backups lost together with the owner
    pub lost_backup_count: usize,

    /// Address of the member that detected the loss
    pub source: SocketAddr,
}

/// A replica slot assignment change
#[derive(Debug, Clone)]
pub struct ReplicaChangeEvent {
    /// The partition whose slot changed
    pub partition_id: PartitionId,

    /// The slot that changed
    pub replica_index: usize,

    /// Previous occupant
    pub old_replica: Option<PartitionReplica>,

    /// New occupant
    pub new_replica: Option<PartitionReplica>,
}

/// Observer of migration lifecycle events
pub trait MigrationListener: Send + Sync {
    /// A migration was started by the master
    fn migration_started(&self, event: &MigrationEvent);

    /// A migration was committed
    fn migration_completed(&self, event: &MigrationEvent);

    /// A migration failed and was abandoned
    fn migration_failed(&self, event: &MigrationEvent);
}

/// Observer of partition-loss events
pub trait PartitionLostListener: Send + Sync {
    /// A partition lost its owner replica
    fn partition_lost(&self, event: &PartitionLostEvent);
}

/// Observer of individual replica slot changes
pub trait PartitionListener: Send + Sync {
    /// A replica slot was overwritten
    fn replica_changed(&self, event: &ReplicaChangeEvent);
}

#[derive(Default)]
struct Registries {
    migration: HashMap<Uuid, Arc<dyn MigrationListener>>,
    partition_lost: HashMap<Uuid, Arc<dyn PartitionLostListener>>,
    local_partition_lost: HashMap<Uuid, Arc<dyn PartitionLostListener>>,
    partition: HashMap<Uuid, Arc<dyn PartitionListener>>,
}

/// Listener registry for all partition events.
///
/// Registration returns an id that the matching remover accepts; removers
/// return whether anything was removed.
#[derive(Default)]
pub struct PartitionEventManager {
    registries: RwLock<Registries>,
}

impl PartitionEventManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration listener
    pub fn add_migration_listener(&self, listener: Arc<dyn MigrationListener>) -> Uuid {
        let id = Uuid::new_v4();
        self.registries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .migration
            .insert(id, listener);
        id
    }

    /// Remove a migration listener
    pub fn remove_migration_listener(&self, id: Uuid) -> bool {
        self.registries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .migration
            .remove(&id)
            .is_some()
    }

    /// Register a partition-lost listener for cluster-wide loss events
    pub fn add_partition_lost_listener(&self, listener: Arc<dyn PartitionLostListener>) -> Uuid {
        let id = Uuid::new_v4();
        self.registries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .partition_lost
            .insert(id, listener);
        id
    }

    /// Register a partition-lost listener fired only for losses detected by
    /// the local member
    pub fn add_local_partition_lost_listener(
        &self,
        listener: Arc<dyn PartitionLostListener>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.registries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .local_partition_lost
            .insert(id, listener);
        id
    }

    /// Remove a partition-lost listener registered with either variant
    pub fn remove_partition_lost_listener(&self, id: Uuid) -> bool {
        let mut registries = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        registries.partition_lost.remove(&id).is_some()
            || registries.local_partition_lost.remove(&id).is_some()
    }

    /// Register a replica-change listener
    pub fn add_partition_listener(&self, listener: Arc<dyn PartitionListener>) -> Uuid {
        let id = Uuid::new_v4();
        self.registries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .partition
            .insert(id, listener);
        id
    }

    /// Remove a replica-change listener
    pub fn remove_partition_listener(&self, id: Uuid) -> bool {
        self.registries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .partition
            .remove(&id)
            .is_some()
    }

    /// Dispatch a migration-started event
    pub fn send_migration_started(&self, migration: &MigrationInfo) {
        let event = MigrationEvent {
            migration: migration.clone(),
        };
        for listener in self.migration_listeners() {
            listener.migration_started(&event);
        }
    }

    /// Dispatch a migration-completed event
    pub fn send_migration_completed(&self, migration: &MigrationInfo) {
        let event = MigrationEvent {
            migration: migration.clone(),
        };
        for listener in self.migration_listeners() {
            listener.migration_completed(&event);
        }
    }

    /// Dispatch a migration-failed event
    pub fn send_migration_failed(&self, migration: &MigrationInfo) {
        let event = MigrationEvent {
            migration: migration.clone(),
        };
        for listener in self.migration_listeners() {
            listener.migration_failed(&event);
        }
    }

    /// Dispatch a partition-lost event. `local` selects whether the
    /// local-only registry fires as well.
    pub fn send_partition_lost(&self, event: &PartitionLostEvent, local: bool) {
        let (cluster_wide, local_only) = {
            let registries = self.registries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            (
                registries
                    .partition_lost
                    .values()
                    .cloned()
                    .collect::<Vec<_>>(),
                registries
                    .local_partition_lost
                    .values()
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        };
        for listener in cluster_wide {
            listener.partition_lost(event);
        }
        if local {
            for listener in local_only {
                listener.partition_lost(event);
            }
        }
    }

    /// Dispatch a replica-change event
    pub fn send_replica_changed(&self, event: &ReplicaChangeEvent) {
        let listeners: Vec<_> = {
            let registries = self.registries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            registries.partition.values().cloned().collect()
        };
        for listener in listeners {
            listener.replica_changed(event);
        }
    }

    fn migration_listeners(&self) -> Vec<Arc<dyn MigrationListener>> {
        self.registries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .migration
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        started: AtomicUsize,
        completed: AtomicUsize,
        failed: AtomicUsize,
    }

    impl MigrationListener for CountingListener {
        fn migration_started(&self, _: &MigrationEvent) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn migration_completed(&self, _: &MigrationEvent) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn migration_failed(&self, _: &MigrationEvent) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_migration() -> MigrationInfo {
        use gridmesh_cluster::NodeId;

        MigrationInfo::new(
            PartitionId::new(0),
            None,
            PartitionReplica {
                address: "127.0.0.1:5701".parse().unwrap(),
                uuid: NodeId::from_seed(1),
            },
            None,
            None,
            0,
        )
    }

    #[test]
    fn removed_listener_no_longer_fires() {
        let manager = PartitionEventManager::new();
        let listener = Arc::new(CountingListener::default());
        let id = manager.add_migration_listener(listener.clone());

        manager.send_migration_started(&sample_migration());
        assert_eq!(listener.started.load(Ordering::SeqCst), 1);

        assert!(manager.remove_migration_listener(id));
        assert!(!manager.remove_migration_listener(id));

        manager.send_migration_started(&sample_migration());
        assert_eq!(listener.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn local_partition_lost_listener_skips_remote_events() {
        #[derive(Default)]
        struct LostCounter(AtomicUsize);
        impl PartitionLostListener for LostCounter {
            fn partition_lost(&self, _: &PartitionLostEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let manager = PartitionEventManager::new();
        let local = Arc::new(LostCounter::default());
        manager.add_local_partition_lost_listener(local.clone());

        let event = PartitionLostEvent {
            partition_id: PartitionId::new(1),
            lost_backup_count: 0,
            source: "127.0.0.1:5701".parse().unwrap(),
        };

        manager.send_partition_lost(&event, false);
        assert_eq!(local.0.load(Ordering::SeqCst), 0);

        manager.send_partition_lost(&event, true);
        assert_eq!(local.0.load(Ordering::SeqCst), 1);
    }
}
