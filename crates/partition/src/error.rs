//! Error types for the partition service

use std::time::Duration;

use thiserror::Error;

use gridmesh_cluster::{ClusterError, ClusterState};

/// Result type for partition operations
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Caller-facing failures of the partition service.
///
/// Recoverable conditions (stale versions, unknown senders, lock timeouts on
/// the receive path) are handled where they occur and reported as boolean
/// outcomes, not as errors.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// The node is shutting down
    #[error("partition service is not active")]
    NotActive,

    /// The cluster state forbids partition assignment
    #[error("partitions cannot be assigned in cluster state {0}")]
    MigrationDisallowed(ClusterState),

    /// All cluster members are lite members
    #[error("partitions cannot be assigned since all members are lite members")]
    NoDataMember,

    /// `set_initial_state` on an already initialized table
    #[error("partition table is already initialized")]
    AlreadyInitialized,

    /// The coordinator lock could not be acquired in time
    #[error("could not acquire partition service lock within {0:?}")]
    LockTimeout(Duration),

    /// A messaging failure surfaced to the caller
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
