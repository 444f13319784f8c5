//! In-memory cluster harness for partition service integration tests

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use gridmesh_cluster::{
    ClusterError, ClusterResult, LocalClusterDirectory, Member, NodeId,
};
use gridmesh_partition::{
    PartitionConfig, PartitionRequest, PartitionResponse, PartitionRpc, PartitionService,
};

/// Routes partition requests between in-process services by address.
#[derive(Default)]
pub struct Router {
    services: RwLock<HashMap<SocketAddr, Arc<PartitionService>>>,
}

impl Router {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, address: SocketAddr, service: Arc<PartitionService>) {
        self.services.write().await.insert(address, service);
    }

    /// Disconnect a member, e.g. to simulate a crash.
    pub async fn unregister(&self, address: SocketAddr) {
        self.services.write().await.remove(&address);
    }

    async fn service_at(&self, address: SocketAddr) -> Option<Arc<PartitionService>> {
        self.services.read().await.get(&address).cloned()
    }
}

/// The router-backed messaging endpoint of one member.
pub struct RouterRpc {
    router: Arc<Router>,
    local: SocketAddr,
}

impl RouterRpc {
    pub fn new(router: Arc<Router>, local: SocketAddr) -> Arc<Self> {
        Arc::new(Self { router, local })
    }
}

#[async_trait]
impl PartitionRpc for RouterRpc {
    async fn request_with_timeout(
        &self,
        target: SocketAddr,
        request: PartitionRequest,
        timeout: Duration,
    ) -> ClusterResult<PartitionResponse> {
        let Some(service) = self.router.service_at(target).await else {
            return Err(ClusterError::TargetNotMember(target));
        };
        let sender = self.local;
        tokio::time::timeout(timeout, service.handle_message(sender, request))
            .await
            .map_err(|_| ClusterError::Timeout(timeout))
    }

    async fn send(&self, target: SocketAddr, request: PartitionRequest) {
        let router = self.router.clone();
        let sender = self.local;
        tokio::spawn(async move {
            if let Some(service) = router.service_at(target).await {
                service.handle_message(sender, request).await;
            }
        });
    }
}

/// One member of the test cluster.
pub struct TestNode {
    pub member: Member,
    pub directory: Arc<LocalClusterDirectory>,
    pub service: Arc<PartitionService>,
}

pub fn member(index: u8) -> Member {
    Member::new(
        format!("127.0.0.1:{}", 5700 + index as u16).parse().unwrap(),
        NodeId::from_seed(index),
    )
}

/// Start `count` joined members with member 1 as master.
pub async fn start_cluster(count: u8, config: PartitionConfig) -> (Arc<Router>, Vec<TestNode>) {
    let router = Router::new();
    let members: Vec<Member> = (1..=count).map(member).collect();
    let master = members[0].address;

    let mut nodes = Vec::new();
    for local in &members {
        let directory = Arc::new(LocalClusterDirectory::new(local.clone()));
        directory.set_members(members.clone()).await;
        directory.set_master(Some(master)).await;
        directory.set_joined(true).await;

        let rpc = RouterRpc::new(router.clone(), local.address);
        let service = PartitionService::new(config.clone(), directory.clone(), rpc);
        service.start();
        router.register(local.address, service.clone()).await;

        nodes.push(TestNode {
            member: local.clone(),
            directory,
            service,
        });
    }

    // Deliver the initial membership events so every node knows the master.
    for node in &nodes {
        for joined in &members {
            node.service.member_added(joined.clone()).await;
        }
    }

    (router, nodes)
}

/// Remove a member from every surviving node's view and deliver the removal
/// event. `new_master` becomes the master everywhere.
pub async fn remove_member_everywhere(
    nodes: &[TestNode],
    removed: &Member,
    new_master: SocketAddr,
) {
    for node in nodes {
        if node.member == *removed {
            continue;
        }
        node.directory
            .remove_member(removed.address, removed.id)
            .await;
        node.directory.set_master(Some(new_master)).await;
    }
    for node in nodes {
        if node.member == *removed {
            continue;
        }
        node.service.member_removed(removed.clone()).await;
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` expires.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A small test config: few partitions, fast publishes.
pub fn test_config(partition_count: usize) -> PartitionConfig {
    PartitionConfig {
        partition_count,
        backup_count: 1,
        partition_migration_timeout: Duration::from_secs(5),
        partition_table_send_interval: Duration::from_secs(1),
        replica_sync_interval: Duration::from_millis(200),
    }
}
