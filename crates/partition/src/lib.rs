//! Master-coordinated cluster partition service
//!
//! Assigns, publishes, repairs and migrates a fixed-size table of data
//! partitions across a dynamic cluster of members. Every other service on a
//! node asks this one question here: which member owns partition P, and what
//! version of the mapping am I on?
//!
//! - The partition table is versioned by a monotonic counter; nodes agree on
//!   the table at equal versions.
//! - Only the elected master publishes state; receivers validate the sender.
//! - Migrations run serially on a single control queue; a new master
//!   reconciles by fetching every member's table and republishing one
//!   version past the maximum it observed.
//!
//! Membership and master election are consumed through
//! [`gridmesh_cluster::ClusterDirectory`]; messaging through
//! [`PartitionRpc`]. Neither is implemented here.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Configuration types
pub mod config;

/// Error types
pub mod error;

/// Core data model, events and utilities
pub mod foundation;

/// Wire-level operations
pub mod messages;

/// Messaging seam
pub mod rpc;

/// Partition service coordinator
mod service;

/// Sub-managers: state, migration, replica
pub mod services;

pub use {
    config::PartitionConfig,
    error::{PartitionError, PartitionResult},
    foundation::{
        hash_to_index, InternalPartition, MigrationInfo, MigrationListener, MigrationStatus,
        PartitionId, PartitionListener, PartitionLostListener, PartitionReplica,
        PartitionRuntimeState, PartitionTableView, MAX_BACKUP_COUNT, MAX_REPLICA_COUNT,
    },
    messages::{PartitionRequest, PartitionResponse},
    rpc::PartitionRpc,
    service::PartitionService,
    services::replica::checker::PartitionServiceState,
};
