//! Repartitioning planner
//!
//! Pure functions: given the current table and the available members,
//! produce the ordered migration decisions for the control task. Promotions
//! repair slots whose occupants left the cluster and are committed locally
//! in one batch; migrations move replicas between live members and require a
//! participant round-trip each.

use std::collections::HashSet;

use crate::foundation::{
    InternalPartition, MigrationInfo, PartitionReplica, MAX_REPLICA_COUNT,
};
use crate::services::state::arranger::{self, MemberGroup};

/// The outcome of one control-task planning round.
#[derive(Debug, Default)]
pub struct RepartitionPlan {
    /// Shift-up repairs for slots whose occupants are gone; committed as one
    /// batch with a version bump per promoted replica
    pub promotions: Vec<MigrationInfo>,

    /// The table after applying the promotions, used as the base the
    /// migrations were planned against
    pub compacted: Vec<InternalPartition>,

    /// Replica moves between live members, in execution order: owners before
    /// backups within a partition, drains of leaving members first across
    /// partitions
    pub migrations: Vec<MigrationInfo>,
}

impl RepartitionPlan {
    /// Whether the plan contains any work
    pub fn is_empty(&self) -> bool {
        self.promotions.is_empty() && self.migrations.is_empty()
    }
}

/// Plan a repartitioning round.
///
/// `alive` holds the replicas of every current data member (including ones
/// that requested shutdown); `groups` holds only the members that may receive
/// new replicas; `draining` marks members being drained for shutdown.
pub fn plan_repartitioning(
    current: &[InternalPartition],
    groups: &[MemberGroup],
    alive: &HashSet<PartitionReplica>,
    draining: &HashSet<PartitionReplica>,
    backup_count: usize,
) -> RepartitionPlan {
    let (promotions, compacted) = plan_promotions(current, alive);
    let migrations = plan_migrations(&compacted, groups, draining, backup_count);
    RepartitionPlan {
        promotions,
        compacted,
        migrations,
    }
}

/// Compact each partition's slots over the surviving replicas, producing one
/// promotion per replica that moved up.
fn plan_promotions(
    current: &[InternalPartition],
    alive: &HashSet<PartitionReplica>,
) -> (Vec<MigrationInfo>, Vec<InternalPartition>) {
    let mut promotions = Vec::new();
    let compacted = current
        .iter()
        .map(|partition| {
            if partition
                .replicas()
                .iter()
                .flatten()
                .all(|r| alive.contains(r))
            {
                return partition.clone();
            }

            let mut replicas = [None; MAX_REPLICA_COUNT];
            let mut next = 0;
            for (index, replica) in partition.replicas().iter().enumerate() {
                let Some(replica) = replica else { continue };
                if !alive.contains(replica) {
                    continue;
                }
                if index != next {
                    promotions.push(MigrationInfo::new(
                        partition.partition_id(),
                        None,
                        *replica,
                        None,
                        Some(index),
                        next,
                    ));
                }
                replicas[next] = Some(*replica);
                next += 1;
            }
            InternalPartition::with_replicas(partition.partition_id(), replicas)
        })
        .collect();
    (promotions, compacted)
}

/// Diff the compacted table against its rearrangement target and order the
/// resulting moves.
fn plan_migrations(
    compacted: &[InternalPartition],
    groups: &[MemberGroup],
    draining: &HashSet<PartitionReplica>,
    backup_count: usize,
) -> Vec<MigrationInfo> {
    let target = arranger::rearrange(compacted, groups, backup_count);

    let mut migrations = Vec::new();
    for (partition, target_replicas) in compacted.iter().zip(target.iter()) {
        for (index, target_replica) in target_replicas.iter().enumerate() {
            let current_replica = partition.replica(index).copied();
            let Some(destination) = target_replica else {
                // A slot beyond the achievable replica count stays as it is;
                // occupants referencing departed members were already
                // compacted away.
                continue;
            };
            if current_replica.as_ref() == Some(destination) {
                continue;
            }
            migrations.push(MigrationInfo::new(
                partition.partition_id(),
                current_replica,
                *destination,
                current_replica.map(|_| index),
                partition.replica_index_of(destination),
                index,
            ));
        }
    }

    // Owner moves already precede backup moves within a partition; pull
    // drains of leaving members to the front across partitions.
    migrations.sort_by_key(|m| {
        !m.source
            .as_ref()
            .is_some_and(|source| draining.contains(source))
    });
    migrations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::PartitionId;
    use crate::services::state::arranger::{MemberGroupStrategy, PerMemberGroupStrategy};
    use gridmesh_cluster::{Member, NodeId};

    fn member(port: u16, seed: u8) -> Member {
        Member::new(
            format!("127.0.0.1:{port}").parse().unwrap(),
            NodeId::from_seed(seed),
        )
    }

    fn replica_of(member: &Member) -> PartitionReplica {
        PartitionReplica::from_member(member)
    }

    fn table_over(members: &[Member], partition_count: usize, backup_count: usize) -> Vec<InternalPartition> {
        let groups = PerMemberGroupStrategy.group_members(members);
        arranger::arrange_fresh(&groups, partition_count, backup_count)
            .into_iter()
            .enumerate()
            .map(|(p, replicas)| {
                InternalPartition::with_replicas(PartitionId::new(p as u32), replicas)
            })
            .collect()
    }

    #[test]
    fn stable_cluster_plans_nothing() {
        let members = vec![member(5701, 1), member(5702, 2), member(5703, 3)];
        let table = table_over(&members, 7, 1);
        let groups = PerMemberGroupStrategy.group_members(&members);
        let alive: HashSet<_> = members.iter().map(replica_of).collect();

        let plan = plan_repartitioning(&table, &groups, &alive, &HashSet::new(), 1);
        assert!(plan.is_empty());
    }

    #[test]
    fn dead_owner_is_promoted_from_backup() {
        let members = vec![member(5701, 1), member(5702, 2), member(5703, 3)];
        let table = table_over(&members, 7, 1);

        let survivors = vec![members[0].clone(), members[1].clone()];
        let groups = PerMemberGroupStrategy.group_members(&survivors);
        let alive: HashSet<_> = survivors.iter().map(replica_of).collect();
        let dead = replica_of(&members[2]);

        let plan = plan_repartitioning(&table, &groups, &alive, &HashSet::new(), 1);

        // Every partition that was owned by the dead member gets its backup
        // promoted into the owner slot.
        for promotion in &plan.promotions {
            assert_eq!(promotion.source, None);
            assert!(promotion.destination_new_replica_index < promotion.destination_current_replica_index.unwrap());
        }
        for partition in &plan.compacted {
            assert!(!partition.references(dead.address, dead.uuid));
        }
        // Backup holes left by the promotions are refilled by migrations.
        assert!(!plan.migrations.is_empty());
        for migration in &plan.migrations {
            assert!(alive.contains(&migration.destination));
        }
    }

    #[test]
    fn drain_moves_come_first() {
        let members = vec![member(5701, 1), member(5702, 2), member(5703, 3)];
        let table = table_over(&members, 7, 1);

        let leaving = members[2].clone();
        let staying = vec![members[0].clone(), members[1].clone()];
        let groups = PerMemberGroupStrategy.group_members(&staying);
        let alive: HashSet<_> = members.iter().map(replica_of).collect();
        let draining: HashSet<_> = [replica_of(&leaving)].into();

        let plan = plan_repartitioning(&table, &groups, &alive, &draining, 1);

        assert!(plan.promotions.is_empty());
        assert!(!plan.migrations.is_empty());
        let first_non_drain = plan
            .migrations
            .iter()
            .position(|m| !m.source.as_ref().is_some_and(|s| draining.contains(s)));
        if let Some(boundary) = first_non_drain {
            assert!(
                plan.migrations[boundary..]
                    .iter()
                    .all(|m| !m.source.as_ref().is_some_and(|s| draining.contains(s)))
            );
        }
        // The plan fully evacuates the leaving member.
        let leaving_replica = replica_of(&leaving);
        let evacuated: Vec<_> = plan
            .migrations
            .iter()
            .filter(|m| m.source.as_ref() == Some(&leaving_replica))
            .collect();
        let held: usize = table
            .iter()
            .filter(|p| p.references(leaving_replica.address, leaving_replica.uuid))
            .count();
        assert_eq!(evacuated.len(), held);
    }
}
