//! Cluster views and partition tables.
//!
//! A `ClusterView` is immutable once built. The membership component is the
//! only writer; it publishes a fresh `Arc<ClusterView>` through a `watch`
//! channel and every reader works on whichever snapshot it borrowed.

use super::types::{Node, NodeId};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub owner: NodeId,
    pub backups: Vec<NodeId>,
}

/// Owner and backups of every partition.
///
/// Owner of partition `p` is `members[p % n]` over the id-sorted member
/// list; backup `i` is `members[(p + i) % n]`, so owner and backups are
/// always distinct members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    partition_count: u32,
    backup_count: usize,
    assignments: Vec<PartitionAssignment>,
}

impl PartitionTable {
    pub fn empty(partition_count: u32, backup_count: usize) -> Self {
        Self {
            partition_count,
            backup_count,
            assignments: Vec::new(),
        }
    }

    pub fn compute(members: &[NodeId], partition_count: u32, backup_count: usize) -> Self {
        let mut node_ids: Vec<NodeId> = members.to_vec();
        node_ids.sort();
        node_ids.dedup();

        if node_ids.is_empty() {
            return Self::empty(partition_count, backup_count);
        }

        let n = node_ids.len();
        let backups_per_partition = backup_count.min(n - 1);
        let assignments = (0..partition_count as usize)
            .map(|p| PartitionAssignment {
                owner: node_ids[p % n].clone(),
                backups: (1..=backups_per_partition)
                    .map(|i| node_ids[(p + i) % n].clone())
                    .collect(),
            })
            .collect();

        Self {
            partition_count,
            backup_count,
            assignments,
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    pub fn backup_count(&self) -> usize {
        self.backup_count
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn assignment(&self, partition: u32) -> Option<&PartitionAssignment> {
        self.assignments.get(partition as usize)
    }

    pub fn owner(&self, partition: u32) -> Option<&NodeId> {
        self.assignment(partition).map(|a| &a.owner)
    }

    pub fn backups(&self, partition: u32) -> &[NodeId] {
        self.assignment(partition)
            .map(|a| a.backups.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_owner(&self, partition: u32, node: &NodeId) -> bool {
        self.owner(partition) == Some(node)
    }

    pub fn is_backup(&self, partition: u32, node: &NodeId) -> bool {
        self.backups(partition).contains(node)
    }

    pub fn partitions_owned_by(&self, node: &NodeId) -> Vec<u32> {
        (0..self.assignments.len() as u32)
            .filter(|&p| self.is_owner(p, node))
            .collect()
    }

    pub fn partitions_backed_up_by(&self, node: &NodeId) -> Vec<u32> {
        (0..self.assignments.len() as u32)
            .filter(|&p| self.is_backup(p, node))
            .collect()
    }
}

/// The current, versioned set of live data members and partition ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterView {
    pub version: u64,
    /// Live data-hosting members, sorted by id.
    pub members: Vec<Node>,
    pub partitions: PartitionTable,
}

impl ClusterView {
    /// The view before any member is known: version 0, nothing owned.
    pub fn empty(partition_count: u32, backup_count: usize) -> Self {
        Self {
            version: 0,
            members: Vec::new(),
            partitions: PartitionTable::empty(partition_count, backup_count),
        }
    }

    pub fn build(version: u64, mut members: Vec<Node>, partition_count: u32, backup_count: usize) -> Self {
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members.dedup_by(|a, b| a.id == b.id);
        let ids: Vec<NodeId> = members.iter().map(|m| m.id.clone()).collect();
        Self {
            version,
            partitions: PartitionTable::compute(&ids, partition_count, backup_count),
            members,
        }
    }

    pub fn member(&self, id: &NodeId) -> Option<&Node> {
        self.members.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.member(id).is_some()
    }

    pub fn member_ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    pub fn owner_of(&self, partition: u32) -> Option<&Node> {
        self.partitions
            .owner(partition)
            .and_then(|id| self.member(id))
    }

    /// Same members at the same addresses.
    pub fn same_membership(&self, other: &ClusterView) -> bool {
        self.members.len() == other.members.len()
            && self
                .members
                .iter()
                .zip(other.members.iter())
                .all(|(a, b)| a.id == b.id && a.http_addr == b.http_addr)
    }
}

/// Where the partitioned map learns who owns what.
///
/// Implemented by the embedded `MembershipService` and by the
/// `ClientGateway`.
pub trait ClusterTopology: Send + Sync {
    fn local_id(&self) -> &NodeId;

    /// Whether this process stores partitions itself.
    fn hosts_data(&self) -> bool;

    fn current_view(&self) -> Arc<ClusterView>;

    fn subscribe(&self) -> watch::Receiver<Arc<ClusterView>>;

    /// Hint that the caller saw evidence of a stale view.
    fn request_refresh(&self) {}
}
