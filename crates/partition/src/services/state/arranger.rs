//! Deterministic replica slot assignment

use std::collections::{HashMap, HashSet};

use gridmesh_cluster::Member;

use crate::foundation::{
    InternalPartition, PartitionReplica, MAX_BACKUP_COUNT, MAX_REPLICA_COUNT,
};

/// A set of members that must not hold more than one replica of the same
/// partition between them.
#[derive(Debug, Clone)]
pub struct MemberGroup {
    /// Members of the group, in deterministic order
    pub members: Vec<Member>,
}

/// Splits data members into groups for replica placement.
///
/// The arranger guarantees that no two replica slots of one partition land in
/// the same group, so grouping is where failure domains (hosts, zones) are
/// expressed.
pub trait MemberGroupStrategy: Send + Sync {
    /// Partition the data members into non-empty groups. Input order is not
    /// significant; output must be deterministic for a given member set.
    fn group_members(&self, data_members: &[Member]) -> Vec<MemberGroup>;
}

/// Default strategy: every data member forms its own group.
#[derive(Debug, Default)]
pub struct PerMemberGroupStrategy;

impl MemberGroupStrategy for PerMemberGroupStrategy {
    fn group_members(&self, data_members: &[Member]) -> Vec<MemberGroup> {
        let mut members = data_members.to_vec();
        members.sort_by_key(|m| (m.address, m.id));
        members
            .into_iter()
            .map(|m| MemberGroup { members: vec![m] })
            .collect()
    }
}

/// Number of replica slots to fill given the configured backup count and the
/// number of member groups.
pub fn replica_count(groups: usize, backup_count: usize) -> usize {
    if groups == 0 {
        return 0;
    }
    1 + backup_count.min(groups - 1).min(MAX_BACKUP_COUNT)
}

fn group_replica(groups: &[MemberGroup], group_index: usize, partition_index: usize) -> PartitionReplica {
    let group = &groups[group_index];
    let member = &group.members[(partition_index / groups.len()) % group.members.len()];
    PartitionReplica::from_member(member)
}

/// Compute a fresh assignment for `partition_count` partitions over the given
/// groups. Deterministic; no two slots of one partition share a group.
pub fn arrange_fresh(
    groups: &[MemberGroup],
    partition_count: usize,
    backup_count: usize,
) -> Vec<[Option<PartitionReplica>; MAX_REPLICA_COUNT]> {
    let slots = replica_count(groups.len(), backup_count);
    (0..partition_count)
        .map(|p| {
            let mut replicas = [None; MAX_REPLICA_COUNT];
            for (i, slot) in replicas.iter_mut().enumerate().take(slots) {
                *slot = Some(group_replica(groups, (p + i) % groups.len(), p));
            }
            replicas
        })
        .collect()
}

/// Compute a target assignment for the current table over the given groups.
///
/// Owners are kept where they are as long as their group stays within its
/// fair share, so movement is minimized while ownership still balances onto
/// every group. Backups are kept wherever their group is not already used by
/// the partition; holes are filled from the partition's deterministic
/// rotation.
pub fn rearrange(
    current: &[InternalPartition],
    groups: &[MemberGroup],
    backup_count: usize,
) -> Vec<[Option<PartitionReplica>; MAX_REPLICA_COUNT]> {
    let slots = replica_count(groups.len(), backup_count);
    if slots == 0 {
        return current.iter().map(|_| [None; MAX_REPLICA_COUNT]).collect();
    }

    let group_of: HashMap<PartitionReplica, usize> = groups
        .iter()
        .enumerate()
        .flat_map(|(index, group)| {
            group
                .members
                .iter()
                .map(move |m| (PartitionReplica::from_member(m), index))
        })
        .collect();

    // Fair owner share per group: the first `remainder` groups take one
    // extra.
    let base = current.len() / groups.len();
    let remainder = current.len() % groups.len();
    let quota: Vec<usize> = (0..groups.len())
        .map(|g| if g < remainder { base + 1 } else { base })
        .collect();
    let mut owner_load = vec![0usize; groups.len()];

    // Pass 1: keep owners whose group has quota left.
    let mut owners: Vec<Option<(PartitionReplica, usize)>> = current
        .iter()
        .map(|partition| {
            let replica = partition.owner()?;
            let &group = group_of.get(replica)?;
            if owner_load[group] < quota[group] {
                owner_load[group] += 1;
                Some((*replica, group))
            } else {
                None
            }
        })
        .collect();

    // Pass 2: give ownerless partitions to rotation groups with quota left.
    for (p, owner) in owners.iter_mut().enumerate() {
        if owner.is_none() {
            let group = (0..groups.len())
                .map(|k| (p + k) % groups.len())
                .find(|&g| owner_load[g] < quota[g]);
            if let Some(group) = group {
                owner_load[group] += 1;
                *owner = Some((group_replica(groups, group, p), group));
            }
        }
    }

    current
        .iter()
        .zip(owners)
        .enumerate()
        .map(|(p, (partition, owner))| {
            let mut replicas = [None; MAX_REPLICA_COUNT];
            let mut used_groups = HashSet::new();
            if let Some((replica, group)) = owner {
                replicas[0] = Some(replica);
                used_groups.insert(group);
            }

            // Keep current backups whose group is free for this partition.
            for i in 1..slots {
                if let Some(replica) = partition.replica(i) {
                    if let Some(&group) = group_of.get(replica) {
                        if used_groups.insert(group) {
                            replicas[i] = Some(*replica);
                        }
                    }
                }
            }

            // Fill the holes from the partition's deterministic rotation.
            let mut rotation = (0..groups.len())
                .map(|k| (p + k) % groups.len())
                .filter(|g| !used_groups.contains(g));
            for slot in replicas.iter_mut().take(slots).skip(1) {
                if slot.is_none() {
                    match rotation.next() {
                        Some(group) => *slot = Some(group_replica(groups, group, p)),
                        None => break,
                    }
                }
            }

            replicas
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::PartitionId;
    use gridmesh_cluster::NodeId;

    fn members(count: u8) -> Vec<Member> {
        (1..=count)
            .map(|i| {
                Member::new(
                    format!("127.0.0.1:{}", 5700 + i as u16).parse().unwrap(),
                    NodeId::from_seed(i),
                )
            })
            .collect()
    }

    fn groups(count: u8) -> Vec<MemberGroup> {
        PerMemberGroupStrategy.group_members(&members(count))
    }

    #[test]
    fn fresh_arrangement_uses_distinct_members_per_partition() {
        let arrangement = arrange_fresh(&groups(3), 7, 1);
        assert_eq!(arrangement.len(), 7);

        for replicas in &arrangement {
            let assigned: Vec<_> = replicas.iter().flatten().collect();
            assert_eq!(assigned.len(), 2);
            assert_ne!(assigned[0], assigned[1]);
        }
    }

    #[test]
    fn backup_count_is_capped_by_group_count() {
        let arrangement = arrange_fresh(&groups(2), 7, 6);
        for replicas in &arrangement {
            assert_eq!(replicas.iter().flatten().count(), 2);
        }
    }

    #[test]
    fn fresh_arrangement_is_deterministic() {
        assert_eq!(arrange_fresh(&groups(3), 271, 1), arrange_fresh(&groups(3), 271, 1));
    }

    #[test]
    fn rearrange_preserves_surviving_owners() {
        let all_groups = groups(3);
        let fresh = arrange_fresh(&all_groups, 7, 1);
        let table: Vec<_> = fresh
            .iter()
            .enumerate()
            .map(|(p, replicas)| InternalPartition::with_replicas(PartitionId::new(p as u32), *replicas))
            .collect();

        let target = rearrange(&table, &all_groups, 1);
        for (p, partition) in table.iter().enumerate() {
            assert_eq!(target[p][0].as_ref(), partition.owner());
        }
    }

    #[test]
    fn rearrange_replaces_departed_members() {
        let all_groups = groups(3);
        let fresh = arrange_fresh(&all_groups, 7, 1);
        let table: Vec<_> = fresh
            .iter()
            .enumerate()
            .map(|(p, replicas)| InternalPartition::with_replicas(PartitionId::new(p as u32), *replicas))
            .collect();

        // Member 3 leaves; the remaining two members must cover everything.
        let survivors = groups(2);
        let target = rearrange(&table, &survivors, 1);

        let surviving: HashSet<_> = survivors
            .iter()
            .flat_map(|g| g.members.iter().map(PartitionReplica::from_member))
            .collect();
        for replicas in &target {
            let assigned: Vec<_> = replicas.iter().flatten().collect();
            assert_eq!(assigned.len(), 2);
            for replica in assigned {
                assert!(surviving.contains(replica));
            }
        }
    }
}
