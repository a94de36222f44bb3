//! The partitions a consensus-backed node hosts.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::node::partition::Partition;
use crate::node::protocol::Protocol;
use crate::raft::engine::LeaderUpdate;
use crate::raft::partition::RaftPartition;
use crate::types::PartitionId;

/// Hosted [`RaftPartition`]s, keyed by id.
#[derive(Default)]
pub struct RaftProtocol {
    partitions: RwLock<BTreeMap<PartitionId, Arc<RaftPartition>>>,
}

impl RaftProtocol {
    /// A protocol hosting nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host `partition`, replacing any partition with the same id.
    pub fn add_partition(&self, partition: Arc<RaftPartition>) {
        debug!(partition = %partition.id(), "hosting partition");
        self.partitions.write().insert(partition.id(), partition);
    }

    /// Stop hosting partition `id`.
    pub fn remove_partition(&self, id: PartitionId) -> Option<Arc<RaftPartition>> {
        self.partitions.write().remove(&id)
    }

    /// The hosted replica of partition `id`.
    pub fn raft_partition(&self, id: PartitionId) -> Option<Arc<RaftPartition>> {
        self.partitions.read().get(&id).cloned()
    }

    /// Apply one leadership update. Returns whether a snapshot changed.
    pub fn handle_leader_update(&self, update: LeaderUpdate) -> bool {
        match self.raft_partition(update.partition) {
            Some(partition) => partition.set_leader(update.term, update.leader),
            None => {
                warn!(partition = %update.partition, "leader update for unknown partition");
                false
            }
        }
    }

    /// Consume leadership updates until the sender side closes.
    pub fn spawn_leader_updates(
        self: &Arc<Self>,
        mut updates: mpsc::Receiver<LeaderUpdate>,
    ) -> JoinHandle<()> {
        let protocol = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                protocol.handle_leader_update(update);
            }
            debug!("leader update channel closed");
        })
    }
}

impl Protocol for RaftProtocol {
    fn partitions(&self) -> Vec<Partition> {
        self.partitions
            .read()
            .values()
            .map(RaftPartition::as_partition)
            .collect()
    }

    fn partition(&self, id: PartitionId) -> Option<Partition> {
        self.partitions.read().get(&id).map(RaftPartition::as_partition)
    }
}

impl std::fmt::Debug for RaftProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftProtocol")
            .field("partitions", &self.partitions.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
