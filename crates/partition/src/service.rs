//! Partition service coordinator
//!
//! The public façade over the partition state, migration and replica
//! managers. Owns the coordinator lock that serializes every compound
//! mutation of the partition table and the completed-migrations list,
//! drives master-side publication, processes inbound state, and runs the
//! master-takeover reconciliation.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use gridmesh_cluster::{ClusterDirectory, ClusterError, ClusterState, Member};

use crate::config::PartitionConfig;
use crate::error::{PartitionError, PartitionResult};
use crate::foundation::{
    hash_to_index, CoalescingDelayedTrigger, InternalPartition, MigrationInfo, MigrationListener,
    MigrationStatus, PartitionEventManager, PartitionId, PartitionListener, PartitionLostListener,
    PartitionReplica, PartitionRuntimeState, PartitionTableView,
};
use crate::messages::{PartitionRequest, PartitionResponse};
use crate::rpc::PartitionRpc;
use crate::services::migration::{planner, MigrationManager};
use crate::services::replica::checker::{PartitionReplicaStateChecker, PartitionServiceState};
use crate::services::replica::{ReplicaManager, ReplicaSyncInfo};
use crate::services::state::arranger::{MemberGroupStrategy, PerMemberGroupStrategy};
use crate::services::state::PartitionStateManager;

const PARTITION_OWNERSHIP_WAIT: Duration = Duration::from_millis(10);
const PTABLE_SYNC_TIMEOUT: Duration = Duration::from_secs(10);
const SAFE_SHUTDOWN_MAX_AWAIT_STEP: Duration = Duration::from_secs(1);
const FETCH_PARTITION_STATE_TIMEOUT: Duration = Duration::from_secs(5);
const TRIGGER_MASTER_DELAY: Duration = Duration::from_secs(1);

type ShutdownLatch = (watch::Sender<bool>, watch::Receiver<bool>);

/// The cluster partition service.
///
/// Answers "which member owns partition P" for every other service on the
/// node, and guarantees that the partition table evolves monotonically
/// across the cluster under membership changes, master changes and graceful
/// shutdowns.
pub struct PartitionService {
    config: PartitionConfig,
    local: Member,
    cluster: Arc<dyn ClusterDirectory>,
    rpc: Arc<dyn PartitionRpc>,

    events: Arc<PartitionEventManager>,
    state_manager: Arc<PartitionStateManager>,
    migration_manager: Arc<MigrationManager>,
    replica_manager: Arc<ReplicaManager>,
    replica_state_checker: Arc<PartitionReplicaStateChecker>,

    /// Serializes compound mutations of the partition table, the
    /// completed-migrations list, `last_master` and the fetch flag.
    lock: Mutex<()>,

    /// Limits in-flight AssignPartitions requests to the master
    master_triggered: Arc<AtomicBool>,
    master_trigger: CoalescingDelayedTrigger,

    /// One-shot latch released by the master's shutdown response
    shutdown_latch: StdMutex<Option<ShutdownLatch>>,

    last_master: StdMutex<Option<SocketAddr>>,

    /// Raised when this node becomes master and must reconcile the tables
    should_fetch_partition_tables: AtomicBool,

    running: AtomicBool,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl PartitionService {
    /// Create a partition service with the default member-group strategy.
    pub fn new(
        config: PartitionConfig,
        cluster: Arc<dyn ClusterDirectory>,
        rpc: Arc<dyn PartitionRpc>,
    ) -> Arc<Self> {
        Self::with_strategy(config, cluster, rpc, Arc::new(PerMemberGroupStrategy))
    }

    /// Create a partition service with a custom member-group strategy.
    pub fn with_strategy(
        config: PartitionConfig,
        cluster: Arc<dyn ClusterDirectory>,
        rpc: Arc<dyn PartitionRpc>,
        strategy: Arc<dyn MemberGroupStrategy>,
    ) -> Arc<Self> {
        let local = cluster.local_member();
        let events = Arc::new(PartitionEventManager::new());
        let state_manager = Arc::new(PartitionStateManager::new(
            config.partition_count,
            config.backup_count,
            local.clone(),
            cluster.clone(),
            strategy,
            events.clone(),
        ));
        let migration_manager = Arc::new(MigrationManager::new(events.clone()));
        let replica_manager = Arc::new(ReplicaManager::new(
            config.partition_count,
            local.clone(),
            rpc.clone(),
            state_manager.clone(),
        ));
        let replica_state_checker = Arc::new(PartitionReplicaStateChecker::new(
            config.backup_count,
            cluster.clone(),
            rpc.clone(),
            state_manager.clone(),
            migration_manager.clone(),
            replica_manager.clone(),
        ));

        let master_triggered = Arc::new(AtomicBool::new(false));
        let trigger_flag = master_triggered.clone();
        let master_trigger = CoalescingDelayedTrigger::new(
            TRIGGER_MASTER_DELAY,
            2 * TRIGGER_MASTER_DELAY,
            move || trigger_flag.store(false, Ordering::SeqCst),
        );

        Arc::new(Self {
            config,
            local,
            cluster,
            rpc,
            events,
            state_manager,
            migration_manager,
            replica_manager,
            replica_state_checker,
            lock: Mutex::new(()),
            master_triggered,
            master_trigger,
            shutdown_latch: StdMutex::new(None),
            last_master: StdMutex::new(None),
            should_fetch_partition_tables: AtomicBool::new(false),
            running: AtomicBool::new(false),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        })
    }

    /// Start the migration worker, the replica sync task and the master's
    /// periodic publish task.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let service = self.clone();
        self.migration_manager.start(Arc::new(move || {
            let service = service.clone();
            Box::pin(async move { service.run_control_task().await }) as BoxFuture<'static, ()>
        }));

        self.replica_manager
            .schedule_replica_version_sync(self.config.replica_sync_interval);

        let service = self.clone();
        let token = self.token.clone();
        let interval = self.config.effective_send_interval();
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if service.cluster.is_master().await {
                            service.publish_partition_runtime_state().await;
                            service.check_cluster_partition_runtime_states().await;
                        }
                    }
                }
            }
        });

        info!("partition service started");
    }

    /// Stop background work and clear all partition state.
    pub async fn shutdown(&self) {
        trace!("shutting down the partition service");
        self.running.store(false, Ordering::SeqCst);
        self.token.cancel();
        self.tracker.close();
        if tokio::time::timeout(Duration::from_secs(5), self.tracker.wait())
            .await
            .is_err()
        {
            warn!("partition service tasks did not stop within timeout");
        }
        self.migration_manager.stop().await;
        self.replica_manager.stop().await;
        self.reset().await;
    }

    /// Whether the service accepts work
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ---------------------------------------------------------------------
    // Lookup API
    // ---------------------------------------------------------------------

    /// Deterministically map a key's partition hash to a partition.
    pub fn get_partition_id(&self, partition_hash: i32) -> PartitionId {
        PartitionId::new(hash_to_index(partition_hash, self.config.partition_count) as u32)
    }

    /// The fixed partition count
    pub fn partition_count(&self) -> usize {
        self.config.partition_count
    }

    /// Current partition state version
    pub async fn get_partition_state_version(&self) -> u32 {
        self.state_manager.version().await
    }

    /// The owner address of the given partition, triggering assignment if
    /// the table is uninitialized. Never blocks waiting for an owner.
    pub async fn get_partition_owner(self: &Arc<Self>, partition_id: PartitionId) -> Option<SocketAddr> {
        if !self.state_manager.is_initialized().await {
            self.first_arrangement().await;
        }
        let partition = self.state_manager.partition(partition_id).await;
        if partition.owner().is_none()
            && !self.cluster.is_master().await
            && !self.is_cluster_formed_by_only_lite_members().await
        {
            self.trigger_master_to_assign_partitions().await;
        }
        partition.owner().map(|owner| owner.address)
    }

    /// Like [`get_partition_owner`](Self::get_partition_owner) but waits in
    /// 10 ms steps until an owner exists.
    pub async fn get_partition_owner_or_wait(
        self: &Arc<Self>,
        partition_id: PartitionId,
    ) -> PartitionResult<SocketAddr> {
        loop {
            if let Some(owner) = self.get_partition_owner(partition_id).await {
                return Ok(owner);
            }
            if !self.is_running() {
                return Err(PartitionError::NotActive);
            }
            let cluster_state = self.cluster.cluster_state().await;
            if !cluster_state.is_migration_allowed() {
                return Err(PartitionError::MigrationDisallowed(cluster_state));
            }
            if self.is_cluster_formed_by_only_lite_members().await {
                return Err(PartitionError::NoDataMember);
            }
            tokio::time::sleep(PARTITION_OWNERSHIP_WAIT).await;
        }
    }

    /// Snapshot of one partition, forcing owner assignment if none is set.
    pub async fn get_partition(self: &Arc<Self>, partition_id: PartitionId) -> InternalPartition {
        let partition = self.state_manager.partition(partition_id).await;
        if partition.owner().is_none() {
            // Ownerships are probably not set yet; force assignment.
            self.get_partition_owner(partition_id).await;
            return self.state_manager.partition(partition_id).await;
        }
        partition
    }

    /// Snapshot of all partitions
    pub async fn get_partitions(&self) -> Vec<InternalPartition> {
        self.state_manager.partitions_copy().await
    }

    /// Snapshot of the table with its version, taken under the coordinator
    /// lock.
    pub async fn create_partition_table_view(&self) -> PartitionTableView {
        let _guard = self.lock.lock().await;
        self.state_manager.table_view().await
    }

    /// Partitions currently owned by the given address. Non-blocking; the
    /// result may be partial while assignment is in progress.
    pub async fn get_member_partitions(self: &Arc<Self>, target: SocketAddr) -> Vec<PartitionId> {
        let mut owned = Vec::new();
        for p in 0..self.config.partition_count {
            let partition_id = PartitionId::new(p as u32);
            if self.get_partition_owner(partition_id).await == Some(target) {
                owned.push(partition_id);
            }
        }
        owned
    }

    /// Partitions owned by the given address, or empty if the table is not
    /// initialized yet.
    pub async fn get_member_partitions_if_assigned(
        self: &Arc<Self>,
        target: SocketAddr,
    ) -> Vec<PartitionId> {
        if !self.state_manager.is_initialized().await {
            return Vec::new();
        }
        self.get_member_partitions(target).await
    }

    /// Full owner-to-partitions map, waiting for every owner to be assigned.
    pub async fn get_member_partitions_map(
        self: &Arc<Self>,
    ) -> PartitionResult<HashMap<SocketAddr, Vec<PartitionId>>> {
        let mut map: HashMap<SocketAddr, Vec<PartitionId>> = HashMap::new();
        for p in 0..self.config.partition_count {
            let partition_id = PartitionId::new(p as u32);
            let owner = self.get_partition_owner_or_wait(partition_id).await?;
            map.entry(owner).or_default().push(partition_id);
        }
        Ok(map)
    }

    /// Number of member groups the cluster currently forms
    pub async fn member_groups_size(&self) -> usize {
        self.state_manager.member_groups_size().await
    }

    /// Largest backup count the current member group count can support
    pub async fn max_allowed_backup_count(&self) -> usize {
        self.state_manager.max_allowed_backup_count().await
    }

    /// Install an initial partition table, e.g. restored by the embedder.
    /// Fails with [`PartitionError::AlreadyInitialized`] once a table is in
    /// place.
    pub async fn set_initial_state(&self, table: PartitionTableView) -> PartitionResult<()> {
        let _guard = self.lock.lock().await;
        self.state_manager.set_initial_state(table).await
    }

    /// Whether the local member owns the given partition
    pub async fn is_partition_owner(&self, partition_id: PartitionId) -> bool {
        self.state_manager
            .partition(partition_id)
            .await
            .is_owned_by(&self.local)
    }

    async fn is_cluster_formed_by_only_lite_members(&self) -> bool {
        self.cluster.members().await.data_members().next().is_none()
    }

    // ---------------------------------------------------------------------
    // First arrangement and assignment triggering
    // ---------------------------------------------------------------------

    /// Compute and publish the first partition arrangement. On non-masters
    /// this asks the master to assign instead and returns nothing.
    pub async fn first_arrangement(self: &Arc<Self>) -> Option<PartitionRuntimeState> {
        if !self.cluster.is_master().await {
            self.trigger_master_to_assign_partitions().await;
            return None;
        }

        let _guard = self.lock.lock().await;
        if !self.state_manager.is_initialized().await {
            let excluded = self.migration_manager.shutdown_requested_members().await;
            if self
                .state_manager
                .initialize_partition_assignments(&excluded)
                .await
            {
                self.publish_partition_runtime_state_locked().await;
            }
        }
        self.snapshot_runtime_state().await
    }

    async fn should_trigger_master_to_assign_partitions(&self) -> bool {
        !self.state_manager.is_initialized().await
            && self.cluster.is_joined().await
            && self.is_running()
    }

    /// Ask the master to assign partitions. A CAS flag paired with the
    /// coalescing trigger keeps it to at most one in-flight request per
    /// coalescing window.
    async fn trigger_master_to_assign_partitions(self: &Arc<Self>) {
        if !self.should_trigger_master_to_assign_partitions().await {
            return;
        }

        let cluster_state = self.cluster.cluster_state().await;
        if !cluster_state.is_migration_allowed() {
            warn!(%cluster_state, "partitions cannot be assigned in this cluster state");
            return;
        }

        let Some(master) = self.cluster.master_address().await else {
            return;
        };
        if master == self.local.address {
            return;
        }

        if self
            .master_triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let service = self.clone();
            self.tracker.spawn(async move {
                let result = service
                    .rpc
                    .request_with_timeout(
                        master,
                        PartitionRequest::AssignPartitions,
                        PTABLE_SYNC_TIMEOUT,
                    )
                    .await;
                service.master_triggered.store(false, Ordering::SeqCst);
                match result {
                    Ok(PartitionResponse::PartitionState(Some(mut state))) => {
                        state.master = master;
                        service.process_partition_runtime_state(state).await;
                    }
                    Ok(_) => debug!("master is not ready to assign partitions"),
                    Err(e) => error!(%e, "assign-partitions request to master failed"),
                }
            });

            self.master_trigger.execute_with_delay();
        }
    }

    // ---------------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------------

    /// Snapshot the current runtime state, or nothing while a fetch task is
    /// pending (the table may be about to change wholesale).
    pub async fn create_partition_state(&self) -> Option<PartitionRuntimeState> {
        if self.should_fetch_partition_tables.load(Ordering::SeqCst) {
            return None;
        }
        self.create_partition_state_internal().await
    }

    /// Snapshot the current runtime state under the coordinator lock, or
    /// nothing if uninitialized.
    pub async fn create_partition_state_internal(&self) -> Option<PartitionRuntimeState> {
        let _guard = self.lock.lock().await;
        self.snapshot_runtime_state().await
    }

    /// Build a state snapshot. Callers must hold the coordinator lock.
    async fn snapshot_runtime_state(&self) -> Option<PartitionRuntimeState> {
        if !self.state_manager.is_initialized().await {
            return None;
        }
        let view = self.state_manager.table_view().await;
        Some(PartitionRuntimeState {
            master: self.local.address,
            partitions: view.partitions,
            version: view.version,
            completed_migrations: self.migration_manager.completed_migrations_copy().await,
            active_migration: self.migration_manager.active_migration().await,
        })
    }

    /// Build the transient snapshot committing one migration: the migration
    /// is applied to a copy of the table, marked successful, added to the
    /// completed set, and the version is incremented by one.
    async fn create_migration_commit_partition_state(
        &self,
        migration: &MigrationInfo,
    ) -> Option<PartitionRuntimeState> {
        let _guard = self.lock.lock().await;
        if !self.state_manager.is_initialized().await {
            return None;
        }
        let mut partitions = self.state_manager.partitions_copy().await;
        let mut completed = self.migration_manager.completed_migrations_copy().await;

        let mut migration = migration.clone();
        self.migration_manager
            .apply_migration(&mut partitions[migration.partition_id.index()], &migration);
        migration.set_status(MigrationStatus::Success);
        completed.push(migration);

        Some(PartitionRuntimeState {
            master: self.local.address,
            partitions,
            version: self.state_manager.version().await + 1,
            completed_migrations: completed,
            active_migration: None,
        })
    }

    /// Build the transient snapshot committing a batch of promotions; the
    /// version is incremented by the number of promoted replicas.
    async fn create_promotion_commit_partition_state(
        &self,
        migrations: &[MigrationInfo],
    ) -> Option<PartitionRuntimeState> {
        let _guard = self.lock.lock().await;
        if !self.state_manager.is_initialized().await {
            return None;
        }
        let mut partitions = self.state_manager.partitions_copy().await;
        let completed = self.migration_manager.completed_migrations_copy().await;

        for migration in migrations {
            self.migration_manager
                .apply_migration(&mut partitions[migration.partition_id.index()], migration);
        }

        Some(PartitionRuntimeState {
            master: self.local.address,
            partitions,
            version: self.state_manager.version().await + migrations.len() as u32,
            completed_migrations: completed,
            active_migration: None,
        })
    }

    // ---------------------------------------------------------------------
    // Publication (master side)
    // ---------------------------------------------------------------------

    /// Push the current state to every non-local member, best-effort.
    pub async fn publish_partition_runtime_state(&self) {
        if !self.can_publish().await {
            return;
        }
        let Some(state) = self.create_partition_state_internal().await else {
            return;
        };
        self.broadcast_state(state).await;
    }

    /// Publish variant for callers already holding the coordinator lock.
    async fn publish_partition_runtime_state_locked(&self) {
        if !self.can_publish().await {
            return;
        }
        let Some(state) = self.snapshot_runtime_state().await else {
            return;
        };
        self.broadcast_state(state).await;
    }

    async fn can_publish(&self) -> bool {
        // Do not send partition state until initialized, from non-masters,
        // or while migrations are paused after a member leave.
        self.state_manager.is_initialized().await
            && self.cluster.is_master().await
            && self.migration_manager.are_migration_tasks_allowed()
    }

    async fn broadcast_state(&self, state: PartitionRuntimeState) {
        debug!(version = state.version, "publishing partition state");
        let members = self.cluster.members().await;
        for member in members.non_local(self.local.address) {
            self.rpc
                .send(
                    member.address,
                    PartitionRequest::PartitionState {
                        state: state.clone(),
                        sync: false,
                    },
                )
                .await;
        }
    }

    /// Push the current state to one member and await its acknowledgement in
    /// the background.
    fn send_partition_runtime_state(self: &Arc<Self>, target: SocketAddr) {
        let service = self.clone();
        self.tracker.spawn(async move {
            if !service.is_running() {
                return;
            }
            let Some(state) = service.create_partition_state_internal().await else {
                return;
            };
            debug!(version = state.version, %target, "sending partition state");
            let request = PartitionRequest::PartitionState { state, sync: true };
            if let Err(e) = service
                .rpc
                .request_with_timeout(target, request, PTABLE_SYNC_TIMEOUT)
                .await
            {
                debug!(%e, %target, "sending partition state failed");
            }
        });
    }

    /// Ask every peer whether it is on the current version; push the full
    /// state to any peer that is stale or unreachable.
    pub async fn check_cluster_partition_runtime_states(self: &Arc<Self>) {
        if !self.can_publish().await {
            return;
        }

        let version = self.state_manager.version().await;
        debug!(version, "checking cluster partition state versions");

        let members = self.cluster.members().await;
        for member in members.non_local(self.local.address) {
            let service = self.clone();
            let member = member.clone();
            self.tracker.spawn(async move {
                let request = PartitionRequest::PartitionStateVersionCheck { version };
                match service
                    .rpc
                    .request_with_timeout(member.address, request, PTABLE_SYNC_TIMEOUT)
                    .await
                {
                    Ok(PartitionResponse::Applied(true)) => {}
                    Ok(_) => {
                        debug!(%member, "member has a stale partition state; sending the current one");
                        service.send_partition_runtime_state(member.address);
                    }
                    Err(e) => {
                        debug!(%e, %member, "partition state version check failed");
                        service.send_partition_runtime_state(member.address);
                    }
                }
            });
        }
    }

    /// Push the current state to every peer and wait up to ten seconds for
    /// each acknowledgement. Returns true iff every peer acknowledged the
    /// version.
    pub async fn sync_partition_runtime_state(&self) -> bool {
        let Some(state) = self.create_partition_state_internal().await else {
            return false;
        };
        debug!(version = state.version, "sync'ing partition state");

        let members = self.cluster.members().await;
        let targets: Vec<SocketAddr> = members
            .non_local(self.local.address)
            .map(|m| m.address)
            .collect();

        let requests = targets.iter().map(|target| {
            self.rpc.request_with_timeout(
                *target,
                PartitionRequest::PartitionState {
                    state: state.clone(),
                    sync: true,
                },
                PTABLE_SYNC_TIMEOUT,
            )
        });

        join_all(requests).await.into_iter().all(|result| match result {
            Ok(PartitionResponse::Applied(applied)) => applied,
            Ok(_) => false,
            Err(e) => {
                trace!(%e, "partition state sync invocation timed out");
                false
            }
        })
    }

    // ---------------------------------------------------------------------
    // Inbound state
    // ---------------------------------------------------------------------

    /// Apply a partition state pushed by the master. Returns true iff the
    /// state was applied or already known.
    pub async fn process_partition_runtime_state(&self, state: PartitionRuntimeState) -> bool {
        let sender = state.master;
        if !self.is_running() {
            warn!(%sender, "ignoring received partition table, node is not running");
            return false;
        }
        if !self.validate_sender_is_master(sender, "partition table update").await {
            return false;
        }
        self.apply_new_partition_table(
            state.partitions,
            state.version,
            state.completed_migrations,
            sender,
        )
        .await
    }

    async fn validate_sender_is_master(&self, sender: SocketAddr, message_type: &str) -> bool {
        if self.cluster.is_master().await {
            if sender != self.local.address {
                warn!(
                    %sender,
                    message_type,
                    "this is the master node; ignoring state from another member"
                );
                return false;
            }
            return true;
        }

        let master = self.cluster.master_address().await;
        if Some(sender) != master {
            if self.cluster.member_at(sender).await.is_none() {
                error!(
                    %sender,
                    ?master,
                    message_type,
                    "received state from an unknown member"
                );
            } else {
                warn!(
                    %sender,
                    ?master,
                    message_type,
                    "sender does not seem to be master (ignore if the master changed recently)"
                );
            }
            return false;
        }
        true
    }

    /// Apply a new table if it is newer than the current one and finalize
    /// its completed migrations. Does not validate the sender.
    async fn apply_new_partition_table(
        &self,
        partitions: Vec<InternalPartition>,
        new_version: u32,
        completed_migrations: Vec<MigrationInfo>,
        sender: SocketAddr,
    ) -> bool {
        if partitions.len() != self.config.partition_count
            || partitions
                .iter()
                .enumerate()
                .any(|(index, p)| p.partition_id().index() != index)
        {
            warn!(%sender, "received a partition table with an unexpected shape");
            return false;
        }

        let Ok(_guard) = tokio::time::timeout(PTABLE_SYNC_TIMEOUT, self.lock.lock()).await else {
            // Drop the state; the sender will push the version again.
            warn!(%sender, "could not lock partition service to apply the new partition table");
            return false;
        };

        if let Some(already_applied) = self.check_version_applied(new_version, sender).await {
            return already_applied;
        }

        self.request_member_list_update_if_unknown(sender, &partitions)
            .await;

        for partition in &partitions {
            self.state_manager
                .update_replicas(partition.partition_id(), *partition.replicas())
                .await;
        }
        self.apply_completed_migrations_locked(&completed_migrations, new_version)
            .await;
        true
    }

    /// Whether `version` was already applied: true for the current version,
    /// false for a stale one, none for a newer one that should be applied.
    async fn check_version_applied(&self, version: u32, sender: SocketAddr) -> Option<bool> {
        let current = self.state_manager.version().await;
        if version < current {
            debug!(
                current,
                version,
                %sender,
                "already applied a newer partition state change"
            );
            Some(false)
        } else if version == current {
            debug!(version, %sender, "partition state change already applied");
            Some(true)
        } else {
            None
        }
    }

    async fn request_member_list_update_if_unknown(
        &self,
        sender: SocketAddr,
        partitions: &[InternalPartition],
    ) {
        let members = self.cluster.members().await;
        let cluster_state = self.cluster.cluster_state().await;

        let mut unknown = HashSet::new();
        for partition in partitions {
            for replica in partition.replicas().iter().flatten() {
                if members.find(replica.address, replica.uuid).is_none()
                    && (cluster_state.is_join_allowed()
                        || !self
                            .cluster
                            .is_missing_member(replica.address, replica.uuid)
                            .await)
                {
                    unknown.insert(*replica);
                }
            }
        }
        if unknown.is_empty() {
            return;
        }

        warn!(
            ?unknown,
            %sender,
            "unknown replicas found in partition table (probably recently joined or left); requesting member list"
        );
        if let Some(master) = self.cluster.master_address().await {
            // If the node is shutting down, the master can be unknown.
            if master != self.local.address {
                self.rpc
                    .send(master, PartitionRequest::TriggerMemberListPublish)
                    .await;
            }
        }
    }

    /// Record the completed migrations (idempotently), re-apply the
    /// successful ones, set the new version and schedule finalization of
    /// everything newly learned. Callers must hold the coordinator lock.
    async fn apply_completed_migrations_locked(
        &self,
        completed_migrations: &[MigrationInfo],
        new_version: u32,
    ) {
        let mut recently_completed = Vec::new();
        for migration in completed_migrations {
            debug_assert!(migration.status.is_terminal(), "invalid migration: {migration}");
            if migration.partition_id.index() >= self.config.partition_count {
                warn!(%migration, "dropping completed migration for an unknown partition");
                continue;
            }
            // A participant's active migration is done once it shows up
            // completed; release it before the finalizer runs. This must
            // also cover re-runs of a previously failed migration, which the
            // completed set already knows by its identity triple.
            self.migration_manager.clear_active_migration(migration).await;
            if self
                .migration_manager
                .add_completed_migration(migration.clone())
                .await
            {
                recently_completed.push(migration.clone());
                if migration.status == MigrationStatus::Success {
                    trace!(%migration, "applying completed migration");
                    let mut partition =
                        self.state_manager.partition(migration.partition_id).await;
                    self.migration_manager.apply_migration(&mut partition, migration);
                    self.state_manager
                        .update_replicas(partition.partition_id(), *partition.replicas())
                        .await;
                }
            }
        }

        self.state_manager.set_version(new_version).await;
        trace!(version = new_version, "applied completed migrations");

        if self.state_manager.set_initialized().await {
            debug!("partition table initialized from applied state");
        }

        self.migration_manager
            .retain_completed_migrations(completed_migrations)
            .await;

        for migration in recently_completed {
            self.migration_manager
                .schedule_active_migration_finalization(migration);
        }
    }

    /// Apply completed migrations pushed without a full table. Equal-version
    /// deliveries are a pure no-op returning true.
    pub async fn apply_completed_migrations(
        &self,
        migrations: Vec<MigrationInfo>,
        new_version: u32,
        sender: SocketAddr,
    ) -> bool {
        if !self.validate_sender_is_master(sender, "completed migrations").await {
            return false;
        }
        let _guard = self.lock.lock().await;
        if !self.state_manager.is_initialized().await {
            debug!(
                version = new_version,
                "cannot apply completed migrations until the partition table is initialized"
            );
            return false;
        }
        if let Some(already_applied) = self.check_version_applied(new_version, sender).await {
            return already_applied;
        }
        self.apply_completed_migrations_locked(&migrations, new_version)
            .await;
        true
    }

    // ---------------------------------------------------------------------
    // Control task (runs on the migration worker, master only)
    // ---------------------------------------------------------------------

    async fn run_control_task(self: Arc<Self>) {
        if !self.cluster.is_master().await {
            return;
        }

        if self.should_fetch_partition_tables.load(Ordering::SeqCst) {
            self.run_fetch_most_recent_partition_table_task().await;
        }

        let cluster_state = self.cluster.cluster_state().await;
        if !cluster_state.is_migration_allowed() {
            debug!(%cluster_state, "skipping repartitioning; migrations are not allowed");
            return;
        }
        if !self.migration_manager.are_migration_tasks_allowed() {
            return;
        }
        if !self.state_manager.is_initialized().await {
            return;
        }

        let (plan, draining) = {
            let _guard = self.lock.lock().await;
            let members = self.cluster.members().await;
            let shutdown_requested = self.migration_manager.shutdown_requested_members().await;
            let draining: HashSet<PartitionReplica> = shutdown_requested
                .iter()
                .map(PartitionReplica::from_member)
                .collect();
            let alive: HashSet<PartitionReplica> = members
                .data_members()
                .map(PartitionReplica::from_member)
                .collect();
            let groups = self
                .state_manager
                .available_groups(&shutdown_requested)
                .await;
            let current = self.state_manager.partitions_copy().await;
            (
                planner::plan_repartitioning(
                    &current,
                    &groups,
                    &alive,
                    &draining,
                    self.config.backup_count,
                ),
                draining,
            )
        };

        if !plan.promotions.is_empty() {
            self.commit_promotions(&plan.promotions).await;
        }

        if !plan.migrations.is_empty() {
            info!(
                migrations = plan.migrations.len(),
                draining = draining.len(),
                "repartitioning"
            );
        }
        for migration in plan.migrations {
            if !self.cluster.is_master().await
                || !self.migration_manager.are_migration_tasks_allowed()
            {
                break;
            }
            self.execute_migration(migration).await;
        }

        self.release_drained_members().await;
    }

    /// Commit a batch of promotions: version grows by the batch size.
    async fn commit_promotions(&self, promotions: &[MigrationInfo]) {
        let Some(state) = self.create_promotion_commit_partition_state(promotions).await else {
            return;
        };
        info!(
            promotions = promotions.len(),
            version = state.version,
            "promoting replicas"
        );
        let applied = self
            .apply_new_partition_table(
                state.partitions,
                state.version,
                state.completed_migrations,
                self.local.address,
            )
            .await;
        if applied {
            self.publish_partition_runtime_state().await;
        }
    }

    /// Execute one migration: activate it, ask the destination to prepare,
    /// then commit and publish or mark it failed and move on.
    async fn execute_migration(self: &Arc<Self>, mut migration: MigrationInfo) {
        if let Some(existing) = self
            .migration_manager
            .set_active_migration(migration.clone())
            .await
        {
            warn!(%existing, "not starting migration; another one is active");
            return;
        }
        debug!(%migration, "starting migration");
        self.events.send_migration_started(&migration);

        let request = PartitionRequest::MigrationRequest {
            migration: migration.clone(),
        };
        let accepted = match self
            .rpc
            .request_with_timeout(
                migration.destination.address,
                request,
                self.config.partition_migration_timeout,
            )
            .await
        {
            Ok(PartitionResponse::Applied(accepted)) => accepted,
            Ok(response) => {
                warn!(?response, %migration, "unexpected migration response");
                false
            }
            Err(e) => {
                warn!(%e, %migration, "migration invocation failed");
                false
            }
        };

        if accepted {
            let Some(state) = self.create_migration_commit_partition_state(&migration).await
            else {
                warn!(%migration, "partition table reset while migrating");
                return;
            };
            let applied = self
                .apply_new_partition_table(
                    state.partitions,
                    state.version,
                    state.completed_migrations,
                    self.local.address,
                )
                .await;
            if applied {
                // Finalization was scheduled by the apply; it clears the
                // active migration and fires the completed event.
                self.publish_partition_runtime_state().await;
            } else {
                warn!(%migration, "migration commit state was not applied");
            }
        } else {
            migration.set_status(MigrationStatus::Failed);
            self.migration_manager
                .add_completed_migration(migration.clone())
                .await;
            // Release the slot now so the rest of the round can proceed; the
            // finalizer only fires the failed event.
            self.migration_manager.clear_active_migration(&migration).await;
            self.migration_manager
                .schedule_active_migration_finalization(migration);
        }
    }

    /// Send shutdown responses to drained members. A lone data member cannot
    /// be drained and is released as-is.
    async fn release_drained_members(&self) {
        let requested = self.migration_manager.shutdown_requested_members().await;
        if requested.is_empty() {
            return;
        }
        let partitions = self.state_manager.partitions_copy().await;
        let members = self.cluster.members().await;

        for member in requested {
            let holds_replicas = partitions
                .iter()
                .any(|p| p.references(member.address, member.id));
            let has_other_data_members = members
                .data_members()
                .any(|m| m.address != member.address || m.id != member.id);

            if !holds_replicas || !has_other_data_members {
                info!(%member, "member drained; sending shutdown response");
                if member.address == self.local.address {
                    self.on_shutdown_response();
                } else {
                    self.rpc
                        .send(member.address, PartitionRequest::ShutdownResponse)
                        .await;
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Master takeover reconciliation
    // ---------------------------------------------------------------------

    /// Fetch partition states from all members, pick the newest, fold every
    /// observed migration into the completed set and republish one version
    /// past the maximum observed. Runs on the migration worker of a node
    /// that just became master.
    async fn run_fetch_most_recent_partition_table_task(self: &Arc<Self>) {
        let cluster_state = self.cluster.cluster_state().await;
        if !cluster_state.is_migration_allowed()
            && !cluster_state.is_partition_promotion_allowed()
        {
            // The table cannot have changed while pinned; ours is current.
            debug!("no need to fetch partition tables; cluster state pins the table");
            self.should_fetch_partition_tables
                .store(false, Ordering::SeqCst);
            return;
        }

        let mut max_version = self.state_manager.version().await;
        info!(version = max_version, "fetching most recent partition table");

        let mut all_completed: HashSet<MigrationInfo> = HashSet::new();
        let mut all_active: HashSet<MigrationInfo> = HashSet::new();
        let mut newest: Option<PartitionRuntimeState> = None;

        let members = self.cluster.members().await;
        let mut pending: Vec<Member> = members.non_local(self.local.address).cloned().collect();

        while !pending.is_empty() {
            let mut retry = Vec::new();
            for member in pending {
                match self
                    .rpc
                    .request_with_timeout(
                        member.address,
                        PartitionRequest::FetchPartitionState,
                        FETCH_PARTITION_STATE_TIMEOUT,
                    )
                    .await
                {
                    Ok(PartitionResponse::PartitionState(Some(state))) => {
                        debug!(version = state.version, %member, "received partition state");
                        all_completed.extend(state.completed_migrations.iter().cloned());
                        if let Some(active) = &state.active_migration {
                            all_active.insert(active.clone());
                        }
                        if state.version > max_version {
                            max_version = state.version;
                            newest = Some(state);
                        }
                    }
                    Ok(PartitionResponse::PartitionState(None)) => {
                        debug!(%member, "received no partition state");
                    }
                    Ok(response) => {
                        debug!(?response, %member, "unexpected fetch response");
                    }
                    Err(ClusterError::Timeout(_)) => {
                        // The fetch is idempotent; retry until the member
                        // responds or leaves the cluster.
                        if self
                            .cluster
                            .find_member(member.address, member.id)
                            .await
                            .is_some()
                        {
                            retry.push(member);
                        }
                    }
                    Err(e) if e.is_transient() => {
                        debug!(%e, %member, "failed to fetch partition table");
                    }
                    Err(e) => {
                        error!(%e, %member, "failed to fetch partition table");
                    }
                }
            }
            pending = retry;
        }

        info!(version = max_version, "most recent partition table version");

        // Fold the local view in and fail every observed active migration.
        {
            let _guard = self.lock.lock().await;
            all_completed.extend(self.migration_manager.completed_migrations_copy().await);
            if let Some(active) = self.migration_manager.active_migration().await {
                all_active.insert(active);
            }
        }
        for mut active in all_active {
            active.set_status(MigrationStatus::Failed);
            if all_completed.insert(active.clone()) {
                info!(%active, "marked active migration as failed");
            }
        }
        let all_completed: Vec<MigrationInfo> = all_completed.into_iter().collect();

        if let Some(state) = newest {
            let new_version = max_version.max(self.state_manager.version().await) + 1;
            info!(version = new_version, "applying the most recent partition state");
            self.apply_new_partition_table(
                state.partitions,
                new_version,
                all_completed,
                self.local.address,
            )
            .await;
        } else if self.state_manager.is_initialized().await {
            // No newer table anywhere; a version bump signals the change of
            // authority.
            let _guard = self.lock.lock().await;
            self.state_manager.increment_version().await;
            for migration in all_completed {
                if self
                    .migration_manager
                    .add_completed_migration(migration.clone())
                    .await
                {
                    trace!(%migration, "scheduling finalization after master takeover");
                    self.migration_manager
                        .schedule_active_migration_finalization(migration);
                }
            }
        }

        self.should_fetch_partition_tables
            .store(false, Ordering::SeqCst);
        self.publish_partition_runtime_state().await;
    }

    /// Whether this node still has to reconcile partition tables after
    /// becoming master
    pub fn should_fetch_partition_tables(&self) -> bool {
        self.should_fetch_partition_tables.load(Ordering::SeqCst)
    }

    // ---------------------------------------------------------------------
    // Membership events
    // ---------------------------------------------------------------------

    /// Entry point for membership-service member-added events.
    pub async fn member_added(&self, member: Member) {
        debug!(%member, "adding member");
        let _guard = self.lock.lock().await;
        self.set_last_master(self.cluster.master_address().await);
        if member.address != self.local.address {
            self.state_manager.update_member_groups_size().await;
        }
        if self.cluster.is_master().await && self.state_manager.is_initialized().await {
            self.migration_manager.trigger_control_task();
        }
    }

    /// Entry point for membership-service member-removed events. Detects
    /// this node becoming the new master and schedules the fetch task.
    pub async fn member_removed(self: &Arc<Self>, member: Member) {
        debug!(%member, "removing member");
        let _guard = self.lock.lock().await;

        self.migration_manager.on_member_remove(&member).await;
        self.migration_manager.remove_shutdown_request(&member).await;
        self.replica_manager
            .cancel_replica_sync_requests_to(member.address)
            .await;

        let cluster_state = self.cluster.cluster_state().await;
        if cluster_state.is_migration_allowed() || cluster_state.is_partition_promotion_allowed() {
            self.state_manager.update_member_groups_size().await;

            let is_this_node_new_master = self.cluster.is_master().await
                && self.get_last_master() != Some(self.local.address);
            if is_this_node_new_master {
                self.should_fetch_partition_tables
                    .store(true, Ordering::SeqCst);
                let service = self.clone();
                self.migration_manager.schedule(async move {
                    service.run_fetch_most_recent_partition_table_task().await;
                });
            }
            if self.cluster.is_master().await {
                self.migration_manager.trigger_control_task();
            }
        }

        self.set_last_master(self.cluster.master_address().await);
    }

    /// Entry point for cluster-state changes: re-enabling migration on the
    /// master triggers a control task.
    pub async fn on_cluster_state_change(&self, new_state: ClusterState) {
        if !new_state.is_migration_allowed() {
            return;
        }
        if !self.cluster.is_master().await {
            return;
        }
        let _guard = self.lock.lock().await;
        if self.state_manager.is_initialized().await {
            self.migration_manager.trigger_control_task();
        }
    }

    fn get_last_master(&self) -> Option<SocketAddr> {
        *self
            .last_master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_last_master(&self, master: Option<SocketAddr>) {
        *self
            .last_master
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = master;
    }

    // ---------------------------------------------------------------------
    // Graceful shutdown
    // ---------------------------------------------------------------------

    /// Drain this member and wait for the master's go-ahead, up to
    /// `timeout`. Lite and unjoined members return immediately.
    pub async fn on_shutdown(&self, timeout: Duration) -> bool {
        if !self.cluster.is_joined().await {
            return true;
        }
        if self.local.lite {
            return true;
        }

        let mut latch = self.shutdown_latch();
        let mut remaining = timeout;
        loop {
            if *latch.borrow_and_update() {
                return true;
            }
            if remaining.is_zero() {
                return false;
            }

            let Some(master) = self.cluster.master_address().await else {
                warn!("safe shutdown failed, master member is not known");
                return false;
            };
            if master == self.local.address {
                self.on_shutdown_request(self.local.clone()).await;
            } else {
                self.rpc
                    .send(
                        master,
                        PartitionRequest::ShutdownRequest {
                            member: self.local.clone(),
                        },
                    )
                    .await;
            }

            let step = SAFE_SHUTDOWN_MAX_AWAIT_STEP.min(remaining);
            let _ = tokio::time::timeout(step, latch.changed()).await;
            remaining = remaining.saturating_sub(step);
        }
    }

    /// Concurrent shutdown calls share one latch; the reference is created
    /// on first use and discarded by `reset()`.
    fn shutdown_latch(&self) -> watch::Receiver<bool> {
        let mut latch = self
            .shutdown_latch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match latch.as_ref() {
            Some((_, receiver)) => receiver.clone(),
            None => {
                let (sender, receiver) = watch::channel(false);
                *latch = Some((sender, receiver.clone()));
                receiver
            }
        }
    }

    /// Master side: track the shutdown request and drive a drain round.
    /// Skipped silently if the coordinator lock is contended; the member
    /// resends its request every shutdown step.
    pub async fn on_shutdown_request(&self, member: Member) {
        if let Ok(_guard) = self.lock.try_lock() {
            self.migration_manager.on_shutdown_request(member).await;
            self.migration_manager.trigger_control_task();
        }
    }

    /// Member side: the master released this member; unblock `on_shutdown`.
    pub fn on_shutdown_response(&self) {
        let latch = self
            .shutdown_latch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match latch.as_ref() {
            Some((sender, _)) => {
                let _ = sender.send(true);
            }
            None => debug!("shutdown response without a pending shutdown"),
        }
    }

    // ---------------------------------------------------------------------
    // Inbound dispatch
    // ---------------------------------------------------------------------

    /// Handle one inbound partition operation. `sender` is attached by the
    /// transport and is authoritative over anything the payload claims.
    pub async fn handle_message(
        self: &Arc<Self>,
        sender: SocketAddr,
        request: PartitionRequest,
    ) -> PartitionResponse {
        match request {
            PartitionRequest::AssignPartitions => {
                let state = if self.cluster.is_master().await {
                    self.first_arrangement().await;
                    self.create_partition_state().await
                } else {
                    None
                };
                PartitionResponse::PartitionState(state)
            }
            PartitionRequest::PartitionState { mut state, sync } => {
                state.master = sender;
                let applied = self.process_partition_runtime_state(state).await;
                if sync {
                    PartitionResponse::Applied(applied)
                } else {
                    PartitionResponse::Ack
                }
            }
            PartitionRequest::ApplyCompletedMigrations {
                migrations,
                version,
            } => PartitionResponse::Applied(
                self.apply_completed_migrations(migrations, version, sender).await,
            ),
            PartitionRequest::PartitionStateVersionCheck { version } => {
                PartitionResponse::Applied(self.state_manager.version().await >= version)
            }
            PartitionRequest::FetchPartitionState => {
                PartitionResponse::PartitionState(self.create_partition_state_internal().await)
            }
            PartitionRequest::ShutdownRequest { member } => {
                if self.cluster.is_master().await {
                    self.on_shutdown_request(member).await;
                } else {
                    warn!(%member, "received a shutdown request but this node is not the master");
                }
                PartitionResponse::Ack
            }
            PartitionRequest::ShutdownResponse => {
                if self.validate_sender_is_master(sender, "shutdown response").await {
                    self.on_shutdown_response();
                }
                PartitionResponse::Ack
            }
            PartitionRequest::TriggerMemberListPublish => {
                self.cluster.publish_member_list().await;
                PartitionResponse::Ack
            }
            PartitionRequest::MigrationRequest { migration } => {
                PartitionResponse::Applied(self.accept_migration(sender, migration).await)
            }
            PartitionRequest::HasOngoingMigration => {
                PartitionResponse::OngoingMigration(self.has_ongoing_migration_local().await)
            }
            PartitionRequest::ReplicaVersionQuery {
                partition_id,
                replica_index,
            } => PartitionResponse::ReplicaVersion(
                self.replica_manager
                    .replica_version(partition_id, replica_index)
                    .await,
            ),
        }
    }

    /// Participant side of a migration: validate and activate it. The data
    /// transfer itself is out of band; the commit arrives with the next
    /// published state.
    async fn accept_migration(&self, sender: SocketAddr, migration: MigrationInfo) -> bool {
        if !self.is_running() {
            return false;
        }
        if !self.validate_sender_is_master(sender, "migration request").await {
            return false;
        }
        if !self.cluster.cluster_state().await.is_migration_allowed() {
            return false;
        }
        if !self.migration_manager.are_migration_tasks_allowed() {
            return false;
        }
        match self.migration_manager.set_active_migration(migration.clone()).await {
            None => true,
            Some(existing) if existing == migration => true,
            Some(existing) => {
                warn!(%existing, "rejecting migration request while another is active");
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Safety and introspection
    // ---------------------------------------------------------------------

    /// Whether this member is in the SAFE state
    pub async fn is_member_state_safe(&self) -> bool {
        self.replica_state_checker.service_state().await == PartitionServiceState::Safe
    }

    /// Full safety classification
    pub async fn partition_service_state(&self) -> PartitionServiceState {
        self.replica_state_checker.service_state().await
    }

    /// Whether a migration is in flight anywhere: locally, or on the master
    /// as observed from a non-master.
    pub async fn has_ongoing_migration(&self) -> bool {
        if self.has_ongoing_migration_local().await {
            return true;
        }
        !self.cluster.is_master().await
            && self
                .replica_state_checker
                .has_ongoing_migration_on_master()
                .await
    }

    /// Whether a migration is active or queued on this member
    pub async fn has_ongoing_migration_local(&self) -> bool {
        self.migration_manager.has_ongoing_migration().await
    }

    /// Number of queued migration tasks
    pub fn migration_queue_size(&self) -> usize {
        self.migration_manager.migration_queue_size()
    }

    /// Suspend migration tasks
    pub fn pause_migration(&self) {
        self.migration_manager.pause_migration();
    }

    /// Resume migration tasks
    pub fn resume_migration(&self) {
        self.migration_manager.resume_migration();
    }

    /// Whether migration tasks may run
    pub fn are_migration_tasks_allowed(&self) -> bool {
        self.migration_manager.are_migration_tasks_allowed()
    }

    /// Copy of the replica sync requests currently in flight
    pub async fn ongoing_replica_sync_requests(&self) -> Vec<ReplicaSyncInfo> {
        self.replica_manager.ongoing_replica_sync_requests().await
    }

    /// Copy of the replica sync requests scheduled but not yet sent
    pub async fn scheduled_replica_sync_requests(&self) -> Vec<ReplicaSyncInfo> {
        self.replica_manager.scheduled_replica_sync_requests().await
    }

    /// Swap every partition table reference of `old` for `new`
    pub async fn replace_member(&self, old: &Member, new: &Member) {
        let _guard = self.lock.lock().await;
        self.state_manager.replace_member(old, new).await;
    }

    /// Clear all partition state: table, version, migrations, replica
    /// versions and the shutdown latch.
    pub async fn reset(&self) {
        let _guard = self.lock.lock().await;
        self.should_fetch_partition_tables
            .store(false, Ordering::SeqCst);
        self.replica_manager.reset().await;
        self.state_manager.reset().await;
        self.migration_manager.reset().await;
        self.shutdown_latch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    // ---------------------------------------------------------------------
    // Listener registration
    // ---------------------------------------------------------------------

    /// Register a migration listener
    pub fn add_migration_listener(&self, listener: Arc<dyn MigrationListener>) -> Uuid {
        self.events.add_migration_listener(listener)
    }

    /// Remove a migration listener
    pub fn remove_migration_listener(&self, id: Uuid) -> bool {
        self.events.remove_migration_listener(id)
    }

    /// Register a partition-lost listener
    pub fn add_partition_lost_listener(&self, listener: Arc<dyn PartitionLostListener>) -> Uuid {
        self.events.add_partition_lost_listener(listener)
    }

    /// Register a partition-lost listener fired only for local events
    pub fn add_local_partition_lost_listener(
        &self,
        listener: Arc<dyn PartitionLostListener>,
    ) -> Uuid {
        self.events.add_local_partition_lost_listener(listener)
    }

    /// Remove a partition-lost listener
    pub fn remove_partition_lost_listener(&self, id: Uuid) -> bool {
        self.events.remove_partition_lost_listener(id)
    }

    /// Register a replica-change listener
    pub fn add_partition_listener(&self, listener: Arc<dyn PartitionListener>) -> Uuid {
        self.events.add_partition_listener(listener)
    }

    /// Remove a replica-change listener
    pub fn remove_partition_listener(&self, id: Uuid) -> bool {
        self.events.remove_partition_listener(id)
    }
}

impl std::fmt::Debug for PartitionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionService")
            .field("local", &self.local)
            .field("partition_count", &self.config.partition_count)
            .finish_non_exhaustive()
    }
}
