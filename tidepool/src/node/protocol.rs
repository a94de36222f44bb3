//! Partition lookup on a node.

use crate::node::partition::Partition;
use crate::types::PartitionId;

/// The partitions a node hosts.
pub trait Protocol: Send + Sync {
    /// Every hosted partition, ordered by id.
    fn partitions(&self) -> Vec<Partition>;

    /// The partition with the given id, if hosted here.
    fn partition(&self, id: PartitionId) -> Option<Partition>;
}
