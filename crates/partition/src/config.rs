//! Partition service configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Partition service configuration.
///
/// `partition_count` is fixed for the lifetime of the cluster and must match
/// on every member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Number of partitions. Cannot change at runtime.
    pub partition_count: usize,

    /// Desired number of backup replicas per partition. Capped at runtime by
    /// the number of member groups available.
    pub backup_count: usize,

    /// Per-migration invocation deadline
    pub partition_migration_timeout: Duration,

    /// Period of the master's partition table publish task. Values below one
    /// second are coerced up.
    pub partition_table_send_interval: Duration,

    /// Period of the replica version sync task
    pub replica_sync_interval: Duration,
}

impl PartitionConfig {
    /// The publish interval with the one-second floor applied
    pub fn effective_send_interval(&self) -> Duration {
        self.partition_table_send_interval.max(Duration::from_secs(1))
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            partition_count: 271,
            backup_count: 1,
            partition_migration_timeout: Duration::from_secs(300),
            partition_table_send_interval: Duration::from_secs(15),
            replica_sync_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_interval_is_coerced_to_at_least_one_second() {
        let config = PartitionConfig {
            partition_table_send_interval: Duration::from_millis(50),
            ..Default::default()
        };
        assert_eq!(config.effective_send_interval(), Duration::from_secs(1));

        let config = PartitionConfig::default();
        assert_eq!(config.effective_send_interval(), Duration::from_secs(15));
    }
}
