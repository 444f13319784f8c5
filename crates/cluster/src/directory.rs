//! Membership directory trait

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::node::{Member, MemberList, NodeId};
use crate::state::ClusterState;

/// Read-only view of cluster membership, provided by an external membership
/// service.
///
/// Implementations answer from their current view; none of these calls block
/// on the network. Membership *changes* are delivered to consumers as events
/// through their own entry points, not through this trait.
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    /// The member this process runs as
    fn local_member(&self) -> Member;

    /// Current member list snapshot
    async fn members(&self) -> MemberList;

    /// Address of the current master, if one is elected
    async fn master_address(&self) -> Option<SocketAddr>;

    /// Whether this node has completed joining the cluster
    async fn is_joined(&self) -> bool;

    /// Current cluster-wide state
    async fn cluster_state(&self) -> ClusterState;

    /// Whether (address, id) identifies a member that is currently missing
    /// but expected to rejoin
    async fn is_missing_member(&self, address: SocketAddr, id: NodeId) -> bool;

    /// Ask the membership service to publish the member list to the
    /// cluster. Invoked on the master when a peer reports replicas it does
    /// not know yet.
    async fn publish_member_list(&self);

    /// Whether the local member is the current master
    async fn is_master(&self) -> bool {
        self.master_address().await == Some(self.local_member().address)
    }

    /// Look up a member by address and id in the current view
    async fn find_member(&self, address: SocketAddr, id: NodeId) -> Option<Member> {
        self.members().await.find(address, id).cloned()
    }

    /// Look up a member by address alone
    async fn member_at(&self, address: SocketAddr) -> Option<Member> {
        self.members()
            .await
            .all()
            .iter()
            .find(|m| m.address == address)
            .cloned()
    }
}
