//! Migration manager
//!
//! Sequences all migration work on a single cooperative worker. Control-task
//! planning, scheduled reconciliation tasks and migration finalizations run
//! serially on that worker, so the migration plan itself needs no
//! fine-grained locking. State reads from outside the worker go through the
//! coordinator lock in [`PartitionService`](crate::PartitionService).

pub mod planner;

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use gridmesh_cluster::Member;

use crate::foundation::{
    InternalPartition, MigrationInfo, MigrationStatus, PartitionEventManager, PartitionReplica,
};

/// The closure run for each coalesced control-task request. Installed by the
/// coordinator at start; it recomputes the desired assignment and drives the
/// resulting migrations.
pub type ControlTaskFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

enum MigrationTask {
    Control,
    Run(BoxFuture<'static, ()>),
    Finalize(MigrationInfo),
}

/// Sequences migrations on a single control queue and tracks active and
/// completed migrations.
pub struct MigrationManager {
    events: Arc<PartitionEventManager>,
    sender: StdMutex<Option<mpsc::UnboundedSender<MigrationTask>>>,
    queue_size: Arc<AtomicUsize>,
    control_queued: AtomicBool,
    active_migration: RwLock<Option<MigrationInfo>>,
    completed_migrations: RwLock<Vec<MigrationInfo>>,
    shutdown_requested: RwLock<HashSet<Member>>,
    pause_depth: AtomicUsize,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl MigrationManager {
    /// Create a stopped manager
    pub fn new(events: Arc<PartitionEventManager>) -> Self {
        Self {
            events,
            sender: StdMutex::new(None),
            queue_size: Arc::new(AtomicUsize::new(0)),
            control_queued: AtomicBool::new(false),
            active_migration: RwLock::new(None),
            completed_migrations: RwLock::new(Vec::new()),
            shutdown_requested: RwLock::new(HashSet::new()),
            pause_depth: AtomicUsize::new(0),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        }
    }

    /// Start the migration worker with the given control-task body.
    pub fn start(self: &Arc<Self>, control: ControlTaskFn) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let manager = self.clone();
        let token = self.token.clone();
        self.tracker.spawn(async move {
            loop {
                let task = tokio::select! {
                    _ = token.cancelled() => break,
                    task = rx.recv() => match task {
                        Some(task) => task,
                        None => break,
                    },
                };
                manager.queue_size.fetch_sub(1, Ordering::SeqCst);
                match task {
                    MigrationTask::Control => {
                        manager.control_queued.store(false, Ordering::SeqCst);
                        control().await;
                    }
                    MigrationTask::Run(task) => task.await,
                    MigrationTask::Finalize(migration) => {
                        manager.finalize_migration(&migration).await;
                    }
                }
            }
            debug!("migration worker stopped");
        });
    }

    /// Stop the worker and wait briefly for it to drain
    pub async fn stop(&self) {
        self.token.cancel();
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.tracker.close();
        if tokio::time::timeout(Duration::from_secs(5), self.tracker.wait())
            .await
            .is_err()
        {
            warn!("migration worker did not stop within timeout");
        }
    }

    fn enqueue(&self, task: MigrationTask) -> bool {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => {
                self.queue_size.fetch_add(1, Ordering::SeqCst);
                if sender.send(task).is_err() {
                    self.queue_size.fetch_sub(1, Ordering::SeqCst);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Enqueue a control task. Requests arriving while one is already queued
    /// coalesce into a single run.
    pub fn trigger_control_task(&self) {
        if self
            .control_queued
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            && !self.enqueue(MigrationTask::Control)
        {
            self.control_queued.store(false, Ordering::SeqCst);
        }
    }

    /// Enqueue an arbitrary task on the migration worker
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.enqueue(MigrationTask::Run(Box::pin(task)));
    }

    /// Enqueue finalization of a completed migration. The finalizer observes
    /// the post-migration table because the version is bumped before this is
    /// called.
    pub fn schedule_active_migration_finalization(&self, migration: MigrationInfo) {
        self.enqueue(MigrationTask::Finalize(migration));
    }

    async fn finalize_migration(&self, migration: &MigrationInfo) {
        {
            let mut active = self.active_migration.write().await;
            if active.as_ref() == Some(migration) {
                *active = None;
            }
        }
        match migration.status {
            MigrationStatus::Success => self.events.send_migration_completed(migration),
            MigrationStatus::Failed => self.events.send_migration_failed(migration),
            MigrationStatus::Pending => {
                debug_assert!(false, "finalizing a pending migration: {migration}");
            }
        }
    }

    /// The migration currently in flight, if any
    pub async fn active_migration(&self) -> Option<MigrationInfo> {
        self.active_migration.read().await.clone()
    }

    /// Install the active migration. Returns the already-active one instead
    /// if there is one.
    pub async fn set_active_migration(&self, migration: MigrationInfo) -> Option<MigrationInfo> {
        let mut active = self.active_migration.write().await;
        match active.as_ref() {
            Some(existing) => Some(existing.clone()),
            None => {
                *active = Some(migration);
                None
            }
        }
    }

    /// Clear the active migration if it equals the given one
    pub async fn clear_active_migration(&self, migration: &MigrationInfo) {
        let mut active = self.active_migration.write().await;
        if active.as_ref() == Some(migration) {
            *active = None;
        }
    }

    /// Copy of the completed-migrations list
    pub async fn completed_migrations_copy(&self) -> Vec<MigrationInfo> {
        self.completed_migrations.read().await.clone()
    }

    /// Record a completed migration. Idempotent: returns true iff the
    /// migration was newly added.
    pub async fn add_completed_migration(&self, migration: MigrationInfo) -> bool {
        debug_assert!(migration.status.is_terminal(), "not completed: {migration}");
        let mut completed = self.completed_migrations.write().await;
        if completed.contains(&migration) {
            false
        } else {
            completed.push(migration);
            true
        }
    }

    /// Drop completed migrations that are not in the keep set
    pub async fn retain_completed_migrations(&self, keep: &[MigrationInfo]) {
        let mut completed = self.completed_migrations.write().await;
        completed.retain(|m| keep.contains(m));
    }

    /// Apply a migration to a partition's replica slots: the source slot is
    /// cleared, the destination's previous slot (if it was already a replica)
    /// is cleared, and the destination is written to its new slot.
    ///
    /// Callers must hold the coordinator lock when `partition` aliases the
    /// live table.
    pub fn apply_migration(&self, partition: &mut InternalPartition, migration: &MigrationInfo) {
        if let (Some(source), Some(index)) =
            (&migration.source, migration.source_current_replica_index)
        {
            if partition.replica(index) == Some(source) {
                partition.set_replica(index, None);
            }
        }
        // The destination may only occupy one slot.
        while let Some(index) = partition.replica_index_of(&migration.destination) {
            partition.set_replica(index, None);
        }
        partition.set_replica(migration.destination_new_replica_index, Some(migration.destination));
    }

    /// Fail and finalize the active migration if it involves the removed
    /// member. Returns true iff a migration was cancelled; callers re-run the
    /// control task in that case.
    pub async fn on_member_remove(&self, member: &Member) -> bool {
        let replica = PartitionReplica::from_member(member);
        let cancelled = {
            let mut active = self.active_migration.write().await;
            match active.as_ref() {
                Some(migration) if migration.involves(&replica) => active.take(),
                _ => None,
            }
        };

        let Some(mut migration) = cancelled else {
            return false;
        };
        info!(%migration, %member, "cancelling active migration on member remove");
        migration.set_status(MigrationStatus::Failed);
        self.add_completed_migration(migration.clone()).await;
        self.schedule_active_migration_finalization(migration);
        true
    }

    /// Record a member's graceful-shutdown request. Returns true iff the
    /// member is newly tracked.
    pub async fn on_shutdown_request(&self, member: Member) -> bool {
        let inserted = self.shutdown_requested.write().await.insert(member.clone());
        if inserted {
            info!(%member, "member requested graceful shutdown");
        }
        inserted
    }

    /// Members that asked to leave gracefully and are being drained
    pub async fn shutdown_requested_members(&self) -> HashSet<Member> {
        self.shutdown_requested.read().await.clone()
    }

    /// Stop tracking a shutdown-requested member (it left, or shut down)
    pub async fn remove_shutdown_request(&self, member: &Member) {
        self.shutdown_requested.write().await.remove(member);
    }

    /// Suspend migration tasks. Calls nest.
    pub fn pause_migration(&self) {
        self.pause_depth.fetch_add(1, Ordering::SeqCst);
    }

    /// Resume migration tasks after a matching pause
    pub fn resume_migration(&self) {
        let previous = self.pause_depth.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "resume without matching pause");
    }

    /// Whether migration tasks may run
    pub fn are_migration_tasks_allowed(&self) -> bool {
        self.pause_depth.load(Ordering::SeqCst) == 0
    }

    /// Whether any migration is active or queued
    pub async fn has_ongoing_migration(&self) -> bool {
        self.active_migration.read().await.is_some() || self.migration_queue_size() > 0
    }

    /// Number of queued migration tasks
    pub fn migration_queue_size(&self) -> usize {
        self.queue_size.load(Ordering::SeqCst)
    }

    /// Drop all migration state. The worker keeps running.
    pub async fn reset(&self) {
        *self.active_migration.write().await = None;
        self.completed_migrations.write().await.clear();
        self.shutdown_requested.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::PartitionId;
    use gridmesh_cluster::NodeId;

    fn replica(port: u16, seed: u8) -> PartitionReplica {
        PartitionReplica {
            address: format!("127.0.0.1:{port}").parse().unwrap(),
            uuid: NodeId::from_seed(seed),
        }
    }

    fn migration(partition: u32, source_seed: u8, destination_seed: u8) -> MigrationInfo {
        let mut m = MigrationInfo::new(
            PartitionId::new(partition),
            Some(replica(5701, source_seed)),
            replica(5702, destination_seed),
            Some(0),
            None,
            0,
        );
        m.set_status(MigrationStatus::Success);
        m
    }

    fn manager() -> Arc<MigrationManager> {
        Arc::new(MigrationManager::new(Arc::new(PartitionEventManager::new())))
    }

    #[tokio::test]
    async fn add_completed_migration_is_idempotent() {
        let manager = manager();

        assert!(manager.add_completed_migration(migration(1, 1, 2)).await);
        assert!(!manager.add_completed_migration(migration(1, 1, 2)).await);
        assert_eq!(manager.completed_migrations_copy().await.len(), 1);
    }

    #[tokio::test]
    async fn retain_prunes_unreferenced_migrations() {
        let manager = manager();
        manager.add_completed_migration(migration(1, 1, 2)).await;
        manager.add_completed_migration(migration(2, 1, 2)).await;

        manager
            .retain_completed_migrations(&[migration(2, 1, 2)])
            .await;

        let completed = manager.completed_migrations_copy().await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].partition_id, PartitionId::new(2));
    }

    #[tokio::test]
    async fn control_task_requests_coalesce() {
        let manager = manager();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let gate_for_task = gate.clone();

        manager.start(Arc::new(move || {
            let counter = counter.clone();
            let gate = gate_for_task.clone();
            Box::pin(async move {
                // Hold the worker so further triggers arrive while queued.
                let _permit = gate.acquire().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }) as BoxFuture<'static, ()>
        }));

        manager.trigger_control_task();
        manager.trigger_control_task();
        manager.trigger_control_task();

        gate.add_permits(8);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // A trigger after the previous run is a new request.
        manager.trigger_control_task();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        manager.stop().await;
    }

    #[tokio::test]
    async fn member_remove_fails_involved_active_migration() {
        let manager = manager();
        manager.start(Arc::new(|| Box::pin(async {}) as BoxFuture<'static, ()>));

        let source_member = Member::new(
            "127.0.0.1:5701".parse().unwrap(),
            NodeId::from_seed(1),
        );
        let active = MigrationInfo::new(
            PartitionId::new(3),
            Some(PartitionReplica::from_member(&source_member)),
            replica(5702, 2),
            Some(0),
            None,
            0,
        );
        assert!(manager.set_active_migration(active.clone()).await.is_none());

        let bystander = Member::new("127.0.0.1:5709".parse().unwrap(), NodeId::from_seed(9));
        assert!(!manager.on_member_remove(&bystander).await);
        assert!(manager.active_migration().await.is_some());

        assert!(manager.on_member_remove(&source_member).await);
        let completed = manager.completed_migrations_copy().await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, MigrationStatus::Failed);

        manager.stop().await;
    }

    #[tokio::test]
    async fn apply_migration_moves_the_destination_to_its_new_slot() {
        let manager = manager();
        let mut partition = InternalPartition::new(PartitionId::new(0));
        let owner = replica(5701, 1);
        let backup = replica(5702, 2);
        partition.set_replica(0, Some(owner));
        partition.set_replica(1, Some(backup));

        // Promote the backup to owner.
        let promotion = MigrationInfo::new(
            PartitionId::new(0),
            Some(owner),
            backup,
            Some(0),
            Some(1),
            0,
        );
        manager.apply_migration(&mut partition, &promotion);

        assert_eq!(partition.owner(), Some(&backup));
        assert_eq!(partition.replica(1), None);
    }

    #[tokio::test]
    async fn pause_nests() {
        let manager = manager();
        assert!(manager.are_migration_tasks_allowed());
        manager.pause_migration();
        manager.pause_migration();
        manager.resume_migration();
        assert!(!manager.are_migration_tasks_allowed());
        manager.resume_migration();
        assert!(manager.are_migration_tasks_allowed());
    }
}
