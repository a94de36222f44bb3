//! A partition as seen by request handling: an id and its executor.

use std::fmt;
use std::sync::Arc;

use crate::node::executor::Executor;
use crate::types::PartitionId;

/// One partition hosted on this node.
#[derive(Clone)]
pub struct Partition {
    id: PartitionId,
    executor: Arc<dyn Executor>,
}

impl Partition {
    /// Pair a partition id with the executor serving it.
    pub fn new(id: PartitionId, executor: Arc<dyn Executor>) -> Self {
        Self { id, executor }
    }

    /// The partition id.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// The executor serving the partition.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition").field("id", &self.id).finish()
    }
}
