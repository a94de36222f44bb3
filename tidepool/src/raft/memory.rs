//! In-process, single-replica consensus engine.
//!
//! [`MemoryEngine`] commits every proposal immediately: it appends the entry
//! to an in-memory log and applies it to the attached
//! [`ReplicatedStateMachine`] before `sync_propose` returns. Entries are
//! applied strictly in log order.
//!
//! It also carries the knobs tests need to exercise failure handling:
//!
//! - [`fail_next_propose`](MemoryEngine::fail_next_propose) and
//!   [`fail_next_read`](MemoryEngine::fail_next_read) queue engine errors,
//! - [`set_propose_delay`](MemoryEngine::set_propose_delay) stalls proposals
//!   before they are appended,
//! - [`reads`](MemoryEngine::reads) records which read path served each read.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::raft::engine::{ConsensusEngine, EngineError, EngineSession, PartitionQuery};
use crate::raft::state_machine::ReplicatedStateMachine;
use crate::types::PartitionId;

/// Which path served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    /// `sync_read`.
    Linearizable,
    /// `stale_read`.
    Stale,
}

/// Single-replica engine for one shard.
pub struct MemoryEngine {
    shard: PartitionId,
    state_machine: Arc<dyn ReplicatedStateMachine>,
    log: tokio::sync::Mutex<Vec<Vec<u8>>>,
    propose_failures: Mutex<VecDeque<EngineError>>,
    read_failures: Mutex<VecDeque<EngineError>>,
    propose_delay: Mutex<Option<Duration>>,
    reads: Mutex<Vec<ReadPath>>,
}

impl MemoryEngine {
    /// An engine for `shard` applying to `state_machine`.
    pub fn new(shard: PartitionId, state_machine: Arc<dyn ReplicatedStateMachine>) -> Self {
        Self {
            shard,
            state_machine,
            log: tokio::sync::Mutex::new(Vec::new()),
            propose_failures: Mutex::new(VecDeque::new()),
            read_failures: Mutex::new(VecDeque::new()),
            propose_delay: Mutex::new(None),
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next proposal with `err` instead of committing it.
    pub fn fail_next_propose(&self, err: EngineError) {
        self.propose_failures.lock().push_back(err);
    }

    /// Fail the next read (either path) with `err`.
    pub fn fail_next_read(&self, err: EngineError) {
        self.read_failures.lock().push_back(err);
    }

    /// Stall every proposal for `delay` before it is appended.
    pub fn set_propose_delay(&self, delay: Option<Duration>) {
        *self.propose_delay.lock() = delay;
    }

    /// Read paths taken so far, in order.
    pub fn reads(&self) -> Vec<ReadPath> {
        self.reads.lock().clone()
    }

    /// Committed entries, in log order.
    pub async fn entries(&self) -> Vec<Vec<u8>> {
        self.log.lock().await.clone()
    }

    fn check_shard(&self, shard: PartitionId) -> Result<(), EngineError> {
        if shard != self.shard {
            return Err(EngineError::ShardNotFound);
        }
        Ok(())
    }

    fn read(
        &self,
        path: ReadPath,
        shard: PartitionId,
        query: PartitionQuery,
    ) -> Result<(), EngineError> {
        self.check_shard(shard)?;
        if let Some(err) = self.read_failures.lock().pop_front() {
            return Err(err);
        }
        self.reads.lock().push(path);
        self.state_machine.lookup(query);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("shard", &self.shard)
            .finish()
    }
}

#[async_trait]
impl ConsensusEngine for MemoryEngine {
    fn no_op_session(&self, shard: PartitionId) -> EngineSession {
        EngineSession { shard, no_op: true }
    }

    async fn sync_propose(
        &self,
        session: &EngineSession,
        command: Vec<u8>,
    ) -> Result<u64, EngineError> {
        self.check_shard(session.shard)?;
        let failure = self.propose_failures.lock().pop_front();
        if let Some(err) = failure {
            debug!(shard = %self.shard, error = %err, "injected proposal failure");
            return Err(err);
        }
        let delay = *self.propose_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut log = self.log.lock().await;
        log.push(command);
        let index = log.len() as u64;
        if let Err(err) = self.state_machine.update(index, &log[log.len() - 1]) {
            warn!(shard = %self.shard, index = index, error = %err, "entry skipped");
        }
        Ok(index)
    }

    async fn sync_read(
        &self,
        shard: PartitionId,
        query: PartitionQuery,
    ) -> Result<(), EngineError> {
        self.read(ReadPath::Linearizable, shard, query)
    }

    async fn stale_read(
        &self,
        shard: PartitionId,
        query: PartitionQuery,
    ) -> Result<(), EngineError> {
        self.read(ReadPath::Stale, shard, query)
    }
}
