//! Replica manager
//!
//! Schedules and tracks per-partition replica version sync requests from
//! backup holders to owners. Sync is best-effort and sits outside the strict
//! versioning invariant: completing or failing a sync never bumps the
//! partition state version.

pub mod checker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use gridmesh_cluster::Member;

use crate::foundation::{PartitionId, MAX_BACKUP_COUNT};
use crate::messages::{PartitionRequest, PartitionResponse};
use crate::rpc::PartitionRpc;
use crate::services::state::PartitionStateManager;

const REPLICA_SYNC_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One replica sync request: which backup slot of which partition is synced
/// against which owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicaSyncInfo {
    /// The partition being synced
    pub partition_id: PartitionId,

    /// The backup slot being synced
    pub replica_index: usize,

    /// Address of the owner the version is requested from
    pub target: SocketAddr,
}

/// Schedules and tracks replica version sync requests.
pub struct ReplicaManager {
    local: Member,
    rpc: Arc<dyn PartitionRpc>,
    state_manager: Arc<PartitionStateManager>,
    replica_versions: RwLock<Vec<[u64; MAX_BACKUP_COUNT]>>,
    scheduled: RwLock<Vec<ReplicaSyncInfo>>,
    ongoing: RwLock<Vec<ReplicaSyncInfo>>,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl ReplicaManager {
    /// Create a manager for the given table size
    pub fn new(
        partition_count: usize,
        local: Member,
        rpc: Arc<dyn PartitionRpc>,
        state_manager: Arc<PartitionStateManager>,
    ) -> Self {
        Self {
            local,
            rpc,
            state_manager,
            replica_versions: RwLock::new(vec![[0; MAX_BACKUP_COUNT]; partition_count]),
            scheduled: RwLock::new(Vec::new()),
            ongoing: RwLock::new(Vec::new()),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        }
    }

    /// Start the periodic replica version sync task
    pub fn schedule_replica_version_sync(self: &Arc<Self>, interval: Duration) {
        let manager = self.clone();
        let token = self.token.clone();
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => manager.run_sync_round().await,
                }
            }
        });
    }

    /// Stop the sync task
    pub async fn stop(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// One sync round: request versions from the owners of every partition
    /// where this member holds a backup slot.
    pub async fn run_sync_round(&self) {
        let partitions = self.state_manager.partitions_copy().await;

        let mut round = Vec::new();
        for partition in &partitions {
            let Some(owner) = partition.owner() else { continue };
            if owner.is_member(&self.local) {
                continue;
            }
            for index in 1..=MAX_BACKUP_COUNT {
                if partition.replica(index).is_some_and(|r| r.is_member(&self.local)) {
                    round.push(ReplicaSyncInfo {
                        partition_id: partition.partition_id(),
                        replica_index: index,
                        target: owner.address,
                    });
                }
            }
        }

        if round.is_empty() {
            return;
        }
        trace!(requests = round.len(), "running replica version sync round");
        self.scheduled.write().await.extend(round.iter().copied());

        for info in round {
            {
                let mut scheduled = self.scheduled.write().await;
                scheduled.retain(|s| s != &info);
            }
            self.ongoing.write().await.push(info);
            self.sync_one(info).await;
            self.ongoing.write().await.retain(|s| s != &info);
        }
    }

    async fn sync_one(&self, info: ReplicaSyncInfo) {
        let request = PartitionRequest::ReplicaVersionQuery {
            partition_id: info.partition_id,
            replica_index: info.replica_index,
        };
        match self
            .rpc
            .request_with_timeout(info.target, request, REPLICA_SYNC_REQUEST_TIMEOUT)
            .await
        {
            Ok(PartitionResponse::ReplicaVersion(version)) => {
                self.update_replica_version(info.partition_id, info.replica_index, version)
                    .await;
            }
            Ok(response) => {
                debug!(?response, "unexpected replica version response");
            }
            Err(error) => {
                // Best effort; the next round retries.
                debug!(%error, partition = %info.partition_id, "replica version sync failed");
            }
        }
    }

    /// The locally known version of the given backup slot. Out-of-range
    /// coordinates (possible on the wire path) read as zero.
    pub async fn replica_version(&self, partition_id: PartitionId, replica_index: usize) -> u64 {
        if !(1..=MAX_BACKUP_COUNT).contains(&replica_index) {
            return 0;
        }
        self.replica_versions
            .read()
            .await
            .get(partition_id.index())
            .map_or(0, |versions| versions[replica_index - 1])
    }

    /// Record a synced replica version. Never regresses.
    pub async fn update_replica_version(
        &self,
        partition_id: PartitionId,
        replica_index: usize,
        version: u64,
    ) {
        if !(1..=MAX_BACKUP_COUNT).contains(&replica_index) {
            return;
        }
        let mut versions = self.replica_versions.write().await;
        if let Some(slots) = versions.get_mut(partition_id.index()) {
            let slot = &mut slots[replica_index - 1];
            *slot = (*slot).max(version);
        }
    }

    /// Advance a replica version on the owner. Called by data services after
    /// a replicated mutation.
    pub async fn increment_replica_version(&self, partition_id: PartitionId, replica_index: usize) {
        debug_assert!((1..=MAX_BACKUP_COUNT).contains(&replica_index));
        let mut versions = self.replica_versions.write().await;
        if let Some(slots) = versions.get_mut(partition_id.index()) {
            slots[replica_index - 1] += 1;
        }
    }

    /// Drop scheduled and ongoing sync requests towards the given member.
    /// Idempotent.
    pub async fn cancel_replica_sync_requests_to(&self, address: SocketAddr) {
        self.scheduled.write().await.retain(|s| s.target != address);
        self.ongoing.write().await.retain(|s| s.target != address);
    }

    /// Copy of the sync requests currently in flight
    pub async fn ongoing_replica_sync_requests(&self) -> Vec<ReplicaSyncInfo> {
        self.ongoing.read().await.clone()
    }

    /// Copy of the sync requests scheduled but not yet sent
    pub async fn scheduled_replica_sync_requests(&self) -> Vec<ReplicaSyncInfo> {
        self.scheduled.read().await.clone()
    }

    /// Clear all versions and pending requests
    pub async fn reset(&self) {
        for versions in self.replica_versions.write().await.iter_mut() {
            *versions = [0; MAX_BACKUP_COUNT];
        }
        self.scheduled.write().await.clear();
        self.ongoing.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::PartitionEventManager;
    use crate::services::state::arranger::PerMemberGroupStrategy;
    use async_trait::async_trait;
    use gridmesh_cluster::{ClusterResult, LocalClusterDirectory, NodeId};

    struct FixedVersionRpc(u64);

    #[async_trait]
    impl PartitionRpc for FixedVersionRpc {
        async fn request_with_timeout(
            &self,
            _target: SocketAddr,
            request: PartitionRequest,
            _timeout: Duration,
        ) -> ClusterResult<PartitionResponse> {
            match request {
                PartitionRequest::ReplicaVersionQuery { .. } => {
                    Ok(PartitionResponse::ReplicaVersion(self.0))
                }
                _ => Ok(PartitionResponse::Ack),
            }
        }

        async fn send(&self, _target: SocketAddr, _request: PartitionRequest) {}
    }

    fn member(port: u16, seed: u8) -> Member {
        Member::new(
            format!("127.0.0.1:{port}").parse().unwrap(),
            NodeId::from_seed(seed),
        )
    }

    async fn manager_for(local: Member, members: Vec<Member>, rpc: Arc<dyn PartitionRpc>) -> Arc<ReplicaManager> {
        let directory = Arc::new(LocalClusterDirectory::new(local.clone()));
        directory.set_members(members).await;
        let state_manager = Arc::new(PartitionStateManager::new(
            7,
            1,
            local.clone(),
            directory,
            Arc::new(PerMemberGroupStrategy),
            Arc::new(PartitionEventManager::new()),
        ));
        state_manager
            .initialize_partition_assignments(&Default::default())
            .await;
        Arc::new(ReplicaManager::new(7, local, rpc, state_manager))
    }

    #[tokio::test]
    async fn sync_round_adopts_owner_versions() {
        let local = member(5702, 2);
        let members = vec![member(5701, 1), local.clone(), member(5703, 3)];
        let manager = manager_for(local.clone(), members, Arc::new(FixedVersionRpc(42))).await;

        manager.run_sync_round().await;

        // Wherever this member is a backup, the owner's version was adopted.
        let partitions = manager.state_manager.partitions_copy().await;
        let mut synced = 0;
        for partition in &partitions {
            if partition.replica(1).is_some_and(|r| r.is_member(&local)) {
                assert_eq!(manager.replica_version(partition.partition_id(), 1).await, 42);
                synced += 1;
            }
        }
        assert!(synced > 0);
        assert!(manager.ongoing_replica_sync_requests().await.is_empty());
        assert!(manager.scheduled_replica_sync_requests().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let local = member(5702, 2);
        let other = member(5701, 1);
        let members = vec![other.clone(), local.clone(), member(5703, 3)];
        let manager = manager_for(local, members, Arc::new(FixedVersionRpc(1))).await;

        manager.cancel_replica_sync_requests_to(other.address).await;
        manager.cancel_replica_sync_requests_to(other.address).await;
        assert!(manager.ongoing_replica_sync_requests().await.is_empty());
    }

    #[tokio::test]
    async fn update_never_regresses() {
        let local = member(5702, 2);
        let manager = manager_for(local.clone(), vec![local], Arc::new(FixedVersionRpc(1))).await;

        let partition = PartitionId::new(0);
        manager.update_replica_version(partition, 1, 10).await;
        manager.update_replica_version(partition, 1, 5).await;
        assert_eq!(manager.replica_version(partition, 1).await, 10);

        manager.reset().await;
        assert_eq!(manager.replica_version(partition, 1).await, 0);
    }
}
