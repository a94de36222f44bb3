//! Consensus-backed partition executor.
//!
//! [`RaftPartition`] is the [`Executor`] of a partition replicated by a
//! [`ConsensusEngine`]. Proposals are only accepted by the leader:
//!
//! ```text
//!  propose(input, stream)
//!    │
//!    ├─ leader snapshot: (term, leader) ── leader != me ──> Unavailable("not the leader")
//!    │
//!    ├─ register stream under (term, seq)            ─┐
//!    ├─ RaftProposal { term, seq, data } ──> engine   │ registration dropped on
//!    └─ Ok once the engine committed the entry       ─┘ error, timeout or cancel
//!
//!  apply (term, seq) ──> registry.remove ──> stream   (out of band)
//! ```
//!
//! A committed entry keeps its registration: the output reaches the caller
//! when the entry is applied, which may happen after `sync_propose` returned.
//!
//! The leader snapshot is one `(term, leader)` value published through a
//! `tokio::sync::watch` channel, so a proposer can never pair a term with the
//! wrong leader. Updates carrying an older term are ignored.
//!
//! Proposals are never retried here: a failure is returned to the client,
//! whose channel decides.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::codec::{JsonCodec, MessageCodec};
use crate::config::NodeConfig;
use crate::error::{Result, RsmError};
use crate::node::executor::Executor;
use crate::node::partition::Partition;
use crate::raft::engine::{wrap_error, ConsensusEngine, PartitionQuery};
use crate::raft::registry::StreamRegistry;
use crate::stream::WriteStream;
use crate::types::{
    LeaderState, MemberId, PartitionId, ProposalInput, ProposalOutput, QueryInput, QueryOutput,
    RaftProposal, ReadConsistency, Term,
};

/// A partition replica driven by a consensus engine.
pub struct RaftPartition {
    id: PartitionId,
    config: NodeConfig,
    leader: watch::Sender<LeaderState>,
    ready: AtomicBool,
    registry: Arc<StreamRegistry>,
    engine: Arc<dyn ConsensusEngine>,
    codec: JsonCodec,
}

impl RaftPartition {
    /// A replica of partition `id` run by `config.member_id`.
    ///
    /// `registry` must be the one the partition's
    /// [`RaftStateMachine`](crate::raft::RaftStateMachine) delivers through.
    pub fn new(
        id: PartitionId,
        config: NodeConfig,
        engine: Arc<dyn ConsensusEngine>,
        registry: Arc<StreamRegistry>,
    ) -> Self {
        let (leader, _) = watch::channel(LeaderState::default());
        Self {
            id,
            config,
            leader,
            ready: AtomicBool::new(false),
            registry,
            engine,
            codec: JsonCodec,
        }
    }

    /// The partition id.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// This replica's member id.
    pub fn member_id(&self) -> MemberId {
        self.config.member_id
    }

    /// Pending proposal streams.
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Whether a leadership update was received.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Current leadership snapshot.
    pub fn leader_state(&self) -> LeaderState {
        *self.leader.borrow()
    }

    /// Watch leadership snapshots.
    pub fn subscribe_leader(&self) -> watch::Receiver<LeaderState> {
        self.leader.subscribe()
    }

    /// Record a leadership change. Returns whether the snapshot changed;
    /// updates for older terms are ignored.
    pub fn set_leader(&self, term: Term, leader: Option<MemberId>) -> bool {
        self.ready.store(true, Ordering::Release);
        let next = LeaderState::new(term, leader);
        let changed = self.leader.send_if_modified(|state| {
            if term < state.term || *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            info!(partition = %self.id, leader = %next, "leader changed");
        } else {
            debug!(partition = %self.id, update = %next, "ignoring leader update");
        }
        changed
    }

    /// Request-handling view of this replica.
    pub fn as_partition(self: &Arc<Self>) -> Partition {
        Partition::new(self.id, Arc::clone(self) as Arc<dyn Executor>)
    }
}

impl std::fmt::Debug for RaftPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftPartition")
            .field("id", &self.id)
            .field("member_id", &self.config.member_id)
            .field("leader", &self.leader_state())
            .finish()
    }
}

#[async_trait]
impl Executor for RaftPartition {
    async fn propose(
        &self,
        input: ProposalInput,
        stream: Arc<dyn WriteStream<ProposalOutput>>,
    ) -> Result<()> {
        let leader = self.leader_state();
        if !leader.is_leader(self.config.member_id) {
            debug!(partition = %self.id, leader = %leader, "rejecting proposal");
            return Err(RsmError::unavailable("not the leader"));
        }

        let data = self.codec.encode(&input)?;
        let registration = self.registry.register_guarded(leader.term, stream);
        let proposal = RaftProposal {
            term: registration.term(),
            sequence_num: registration.sequence_num(),
            data,
        };
        let bytes = self.codec.encode(&proposal)?;

        let session = self.engine.no_op_session(self.id);
        let submitted =
            tokio::time::timeout(self.config.propose_timeout, self.engine.sync_propose(&session, bytes))
                .await;
        match submitted {
            Ok(Ok(index)) => {
                registration.keep();
                trace!(
                    partition = %self.id,
                    term = %proposal.term,
                    sequence = %proposal.sequence_num,
                    index = index,
                    "proposal committed"
                );
                Ok(())
            }
            Ok(Err(err)) => Err(wrap_error(err)),
            Err(_) => Err(RsmError::timeout(format!(
                "proposal {} of {} not applied within {:?}",
                proposal.sequence_num, proposal.term, self.config.propose_timeout
            ))),
        }
    }

    async fn query(
        &self,
        input: QueryInput,
        consistency: ReadConsistency,
        stream: Arc<dyn WriteStream<QueryOutput>>,
    ) -> Result<()> {
        let query = PartitionQuery { input, stream };
        match consistency {
            ReadConsistency::Sync => {
                match tokio::time::timeout(
                    self.config.read_timeout,
                    self.engine.sync_read(self.id, query),
                )
                .await
                {
                    Ok(result) => result.map_err(wrap_error),
                    Err(_) => Err(RsmError::timeout(format!(
                        "linearizable read not served within {:?}",
                        self.config.read_timeout
                    ))),
                }
            }
            ReadConsistency::Stale => self
                .engine
                .stale_read(self.id, query)
                .await
                .map_err(wrap_error),
        }
    }
}
