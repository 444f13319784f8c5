//! In-process membership directory

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::directory::ClusterDirectory;
use crate::node::{Member, MemberList, NodeId};
use crate::state::ClusterState;

struct DirectoryState {
    members: Vec<Member>,
    master: Option<SocketAddr>,
    state: ClusterState,
    joined: bool,
    missing: HashSet<(SocketAddr, NodeId)>,
}

/// A settable, in-process [`ClusterDirectory`].
///
/// Used by embedders that drive membership themselves and throughout the
/// test suites. Mutations only change the view; delivering the matching
/// membership events to consumers is the caller's responsibility.
pub struct LocalClusterDirectory {
    local: Member,
    inner: RwLock<DirectoryState>,
    member_list_publish_requests: AtomicUsize,
}

impl LocalClusterDirectory {
    /// Create a directory with the given local member, initially containing
    /// only that member, unjoined and masterless.
    pub fn new(local: Member) -> Self {
        Self {
            inner: RwLock::new(DirectoryState {
                members: vec![local.clone()],
                master: None,
                state: ClusterState::Active,
                joined: false,
                missing: HashSet::new(),
            }),
            local,
            member_list_publish_requests: AtomicUsize::new(0),
        }
    }

    /// Replace the member list
    pub async fn set_members(&self, members: Vec<Member>) {
        self.inner.write().await.members = members;
    }

    /// Add a member to the view
    pub async fn add_member(&self, member: Member) {
        let mut state = self.inner.write().await;
        if !state.members.contains(&member) {
            state.members.push(member);
        }
    }

    /// Remove a member from the view
    pub async fn remove_member(&self, address: SocketAddr, id: NodeId) {
        let mut state = self.inner.write().await;
        state.members.retain(|m| m.address != address || m.id != id);
    }

    /// Set the master address
    pub async fn set_master(&self, master: Option<SocketAddr>) {
        debug!(?master, "master changed");
        self.inner.write().await.master = master;
    }

    /// Set the cluster state
    pub async fn set_cluster_state(&self, state: ClusterState) {
        self.inner.write().await.state = state;
    }

    /// Mark the node as joined
    pub async fn set_joined(&self, joined: bool) {
        self.inner.write().await.joined = joined;
    }

    /// Record a member as missing but expected to rejoin
    pub async fn mark_missing(&self, address: SocketAddr, id: NodeId) {
        self.inner.write().await.missing.insert((address, id));
    }

    /// Number of member-list publish requests received so far
    pub fn member_list_publish_requests(&self) -> usize {
        self.member_list_publish_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterDirectory for LocalClusterDirectory {
    fn local_member(&self) -> Member {
        self.local.clone()
    }

    async fn members(&self) -> MemberList {
        MemberList::new(self.inner.read().await.members.clone())
    }

    async fn master_address(&self) -> Option<SocketAddr> {
        self.inner.read().await.master
    }

    async fn is_joined(&self) -> bool {
        self.inner.read().await.joined
    }

    async fn cluster_state(&self) -> ClusterState {
        self.inner.read().await.state
    }

    async fn is_missing_member(&self, address: SocketAddr, id: NodeId) -> bool {
        self.inner.read().await.missing.contains(&(address, id))
    }

    async fn publish_member_list(&self) {
        self.member_list_publish_requests
            .fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(port: u16, seed: u8) -> Member {
        Member::new(
            format!("127.0.0.1:{port}").parse().unwrap(),
            NodeId::from_seed(seed),
        )
    }

    #[tokio::test]
    async fn master_flag_follows_master_address() {
        let local = member(5701, 1);
        let directory = LocalClusterDirectory::new(local.clone());

        assert!(!directory.is_master().await);

        directory.set_master(Some(local.address)).await;
        assert!(directory.is_master().await);

        directory.set_master(Some(member(5702, 2).address)).await;
        assert!(!directory.is_master().await);
    }

    #[tokio::test]
    async fn removed_member_is_no_longer_found() {
        let local = member(5701, 1);
        let other = member(5702, 2);
        let directory = LocalClusterDirectory::new(local);
        directory.add_member(other.clone()).await;

        assert!(directory.find_member(other.address, other.id).await.is_some());

        directory.remove_member(other.address, other.id).await;
        assert!(directory.find_member(other.address, other.id).await.is_none());
    }
}
