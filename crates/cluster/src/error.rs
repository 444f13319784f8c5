//! Error types for cluster messaging

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Result type for cluster operations
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by the messaging layer to the partition service
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The invocation did not complete within its deadline
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The target address is not a member of this cluster
    #[error("target {0} is not a member")]
    TargetNotMember(SocketAddr),

    /// The target left the cluster while the invocation was in flight
    #[error("member {0} left the cluster")]
    MemberLeft(SocketAddr),

    /// The target could not be reached
    #[error("target {0} unreachable: {1}")]
    Unreachable(SocketAddr, String),

    /// A payload could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ClusterError {
    /// Transient errors are retried or logged at debug level by callers;
    /// everything else is an error-level event.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterError::Timeout(_) | ClusterError::MemberLeft(_) | ClusterError::TargetNotMember(_)
        )
    }
}
