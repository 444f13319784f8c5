//! Messaging seam between partition services

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use gridmesh_cluster::ClusterResult;

use crate::messages::{PartitionRequest, PartitionResponse};

/// Typed messaging between partition services on different members.
///
/// Implementations route a request to the partition service of the member at
/// `target` and return its response. Every invocation carries an explicit
/// deadline; `send` is fire-and-forget and must never error back into the
/// caller.
#[async_trait]
pub trait PartitionRpc: Send + Sync {
    /// Invoke a request on the target and await its response within
    /// `timeout`.
    async fn request_with_timeout(
        &self,
        target: SocketAddr,
        request: PartitionRequest,
        timeout: Duration,
    ) -> ClusterResult<PartitionResponse>;

    /// Deliver a request best-effort. Failures are logged by the
    /// implementation and never surfaced.
    async fn send(&self, target: SocketAddr, request: PartitionRequest);
}
