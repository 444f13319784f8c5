//! Replica state checker
//!
//! Read-only safety predicate over the partition service. Nothing here
//! mutates state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use gridmesh_cluster::ClusterDirectory;

use crate::foundation::MAX_BACKUP_COUNT;
use crate::messages::{PartitionRequest, PartitionResponse};
use crate::rpc::PartitionRpc;
use crate::services::migration::MigrationManager;
use crate::services::replica::ReplicaManager;
use crate::services::state::arranger;
use crate::services::state::PartitionStateManager;

const ONGOING_MIGRATION_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Safety classification of the partition service on this member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionServiceState {
    /// Initialized, no migrations anywhere, all configured replicas filled
    Safe,

    /// No migrations, but the cluster cannot currently hold the configured
    /// replica count (or nothing is assigned yet)
    SafeWithReplicasMissing,

    /// Replicas that the cluster could hold are not yet in place or synced
    ReplicaNotSynced,

    /// A migration is active or queued on this member
    MigrationLocal,

    /// The master reports migrations in flight
    MigrationOnMaster,
}

/// Computes the [`PartitionServiceState`] of this member.
pub struct PartitionReplicaStateChecker {
    backup_count: usize,
    cluster: Arc<dyn ClusterDirectory>,
    rpc: Arc<dyn PartitionRpc>,
    state_manager: Arc<PartitionStateManager>,
    migration_manager: Arc<MigrationManager>,
    replica_manager: Arc<ReplicaManager>,
}

impl PartitionReplicaStateChecker {
    /// Create a checker over the given managers
    pub fn new(
        backup_count: usize,
        cluster: Arc<dyn ClusterDirectory>,
        rpc: Arc<dyn PartitionRpc>,
        state_manager: Arc<PartitionStateManager>,
        migration_manager: Arc<MigrationManager>,
        replica_manager: Arc<ReplicaManager>,
    ) -> Self {
        Self {
            backup_count,
            cluster,
            rpc,
            state_manager,
            migration_manager,
            replica_manager,
        }
    }

    /// Classify the current state
    pub async fn service_state(&self) -> PartitionServiceState {
        if !self.state_manager.is_initialized().await {
            return PartitionServiceState::SafeWithReplicasMissing;
        }

        if self.migration_manager.has_ongoing_migration().await {
            return PartitionServiceState::MigrationLocal;
        }

        if !self.cluster.is_master().await && self.has_ongoing_migration_on_master().await {
            return PartitionServiceState::MigrationOnMaster;
        }

        let groups = self
            .state_manager
            .available_groups(&Default::default())
            .await
            .len();
        let configured = self.backup_count.min(MAX_BACKUP_COUNT);
        let achievable = arranger::replica_count(groups, self.backup_count).saturating_sub(1);

        if !self.replica_manager.ongoing_replica_sync_requests().await.is_empty()
            || !self
                .replica_manager
                .scheduled_replica_sync_requests()
                .await
                .is_empty()
        {
            return PartitionServiceState::ReplicaNotSynced;
        }

        for partition in self.state_manager.partitions_copy().await {
            for index in 0..=achievable {
                if partition.replica(index).is_none() {
                    trace!(
                        partition = %partition.partition_id(),
                        replica_index = index,
                        "replica slot not yet filled"
                    );
                    return PartitionServiceState::ReplicaNotSynced;
                }
            }
        }

        if achievable < configured {
            return PartitionServiceState::SafeWithReplicasMissing;
        }

        PartitionServiceState::Safe
    }

    /// Whether the master reports migrations in flight. Conservative: an
    /// unreachable master counts as ongoing.
    pub async fn has_ongoing_migration_on_master(&self) -> bool {
        let Some(master) = self.cluster.master_address().await else {
            return true;
        };
        match self
            .rpc
            .request_with_timeout(
                master,
                PartitionRequest::HasOngoingMigration,
                ONGOING_MIGRATION_CHECK_TIMEOUT,
            )
            .await
        {
            Ok(PartitionResponse::OngoingMigration(ongoing)) => ongoing,
            Ok(response) => {
                debug!(?response, "unexpected ongoing-migration response");
                true
            }
            Err(error) => {
                debug!(%error, "could not check migrations on master");
                true
            }
        }
    }
}
