//! Member identity types

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a cluster member for the lifetime of its process.
///
/// A member that restarts on the same address comes back with a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Create a deterministic node ID from a seed, for tests
    pub fn from_seed(seed: u8) -> Self {
        Self(Uuid::from_bytes([seed; 16]))
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A member of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Network address the member is reachable at
    pub address: SocketAddr,

    /// Process-unique identifier
    pub id: NodeId,

    /// Lite members hold no partition replicas
    pub lite: bool,
}

impl Member {
    /// Create a new data member
    pub fn new(address: SocketAddr, id: NodeId) -> Self {
        Self {
            address,
            id,
            lite: false,
        }
    }

    /// Create a new lite member
    pub fn lite(address: SocketAddr, id: NodeId) -> Self {
        Self {
            address,
            id,
            lite: true,
        }
    }

    /// Whether this member may own partition replicas
    pub fn is_data_member(&self) -> bool {
        !self.lite
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Member [{}] - {}{}",
            self.address,
            self.id,
            if self.lite { " lite" } else { "" }
        )
    }
}

/// A point-in-time view of the member list with the selections the partition
/// service cares about.
#[derive(Debug, Clone, Default)]
pub struct MemberList {
    members: Vec<Member>,
}

impl MemberList {
    /// Create a member list from a snapshot
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }

    /// All members
    pub fn all(&self) -> &[Member] {
        &self.members
    }

    /// Members that may hold partition replicas
    pub fn data_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_data_member())
    }

    /// Members other than the given local address
    pub fn non_local(&self, local: SocketAddr) -> impl Iterator<Item = &Member> + '_ {
        self.members.iter().filter(move |m| m.address != local)
    }

    /// Look up a member by address and id
    pub fn find(&self, address: SocketAddr, id: NodeId) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.address == address && m.id == id)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn data_member_selection_excludes_lite_members() {
        let list = MemberList::new(vec![
            Member::new(addr(5701), NodeId::from_seed(1)),
            Member::lite(addr(5702), NodeId::from_seed(2)),
            Member::new(addr(5703), NodeId::from_seed(3)),
        ]);

        let data: Vec<_> = list.data_members().collect();
        assert_eq!(data.len(), 2);
        assert!(data.iter().all(|m| !m.lite));
    }

    #[test]
    fn find_matches_on_both_address_and_id() {
        let id = NodeId::from_seed(7);
        let list = MemberList::new(vec![Member::new(addr(5701), id)]);

        assert!(list.find(addr(5701), id).is_some());
        assert!(list.find(addr(5701), NodeId::from_seed(8)).is_none());
        assert!(list.find(addr(5702), id).is_none());
    }
}
