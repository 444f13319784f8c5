//! Wire-level partition operations
//!
//! Semantics only; the envelope and bit layout belong to the messaging
//! layer. Every request is dispatched through
//! [`PartitionService::handle_message`](crate::PartitionService::handle_message)
//! with the sender's address attached by the transport.

use serde::{Deserialize, Serialize};

use gridmesh_cluster::Member;

use crate::foundation::{MigrationInfo, PartitionId, PartitionRuntimeState};

/// Requests handled by the partition service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PartitionRequest {
    /// Ask the master to run the first arrangement and return the resulting
    /// state. Idempotent; returns no state while the master is not ready.
    AssignPartitions,

    /// Master pushes a partition state snapshot. With `sync` the receiver
    /// responds whether it applied (or already had) the version.
    PartitionState {
        /// The snapshot being pushed
        state: PartitionRuntimeState,
        /// Whether the sender awaits an acknowledgement
        sync: bool,
    },

    /// Master pushes completed migrations without a full table
    ApplyCompletedMigrations {
        /// Migrations completed since the last publish
        migrations: Vec<MigrationInfo>,
        /// Version after applying them
        version: u32,
    },

    /// Master asks whether the receiver is on the given version
    PartitionStateVersionCheck {
        /// The master's current version
        version: u32,
    },

    /// New master collects states during takeover. Idempotent.
    FetchPartitionState,

    /// A member asks the master to drain and release it
    ShutdownRequest {
        /// The member that wants to leave
        member: Member,
    },

    /// Master tells a drained member it may complete shutdown
    ShutdownResponse,

    /// A member found unknown replicas in a partition table and asks the
    /// master to publish the member list
    TriggerMemberListPublish,

    /// Master instructs a participant to execute a migration
    MigrationRequest {
        /// The migration to execute
        migration: MigrationInfo,
    },

    /// A member asks the master whether migrations are in flight
    HasOngoingMigration,

    /// A backup replica asks the owner for its replica version
    ReplicaVersionQuery {
        /// The partition being synced
        partition_id: PartitionId,
        /// The backup slot being synced
        replica_index: usize,
    },
}

/// Responses to [`PartitionRequest`]s
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PartitionResponse {
    /// A state snapshot, or none if the responder has nothing to offer
    PartitionState(Option<PartitionRuntimeState>),

    /// Whether the request took effect (or already had, for idempotent ones)
    Applied(bool),

    /// Answer to [`PartitionRequest::HasOngoingMigration`]
    OngoingMigration(bool),

    /// Answer to [`PartitionRequest::ReplicaVersionQuery`]
    ReplicaVersion(u64),

    /// Acknowledgement without a payload
    Ack,
}
