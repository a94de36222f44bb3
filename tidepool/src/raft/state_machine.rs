//! The state machine a consensus engine drives.
//!
//! [`RaftStateMachine`] is what the engine applies committed entries to. For
//! each entry it:
//!
//! 1. decodes the [`RaftProposal`] envelope,
//! 2. prunes registrations of terms older than the entry's term,
//! 3. takes the caller's stream registered under `(term, sequence)`, if this
//!    replica accepted the proposal,
//! 4. applies the inner [`ProposalInput`](crate::types::ProposalInput)
//!    through the [`SessionStateMachine`], which delivers the result.
//!
//! Followers have no registration for the entry and apply it silently.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::codec::{JsonCodec, MessageCodec};
use crate::error::{Result, RsmError};
use crate::node::state_machine::{PrimitiveStateMachine, SessionStateMachine};
use crate::raft::engine::PartitionQuery;
use crate::raft::registry::StreamRegistry;
use crate::types::{ProposalInput, RaftProposal};

/// Entry point for a consensus engine into a partition's state.
pub trait ReplicatedStateMachine: Send + Sync {
    /// Apply the committed entry at `index`.
    ///
    /// # Errors
    ///
    /// [`RsmError::Internal`] if the entry cannot be decoded. The entry is
    /// skipped; the caller (if any) is failed with the same error.
    fn update(&self, index: u64, entry: &[u8]) -> Result<()>;

    /// Serve a read against the current state.
    fn lookup(&self, query: PartitionQuery);
}

/// Session-aware state machine of one partition.
pub struct RaftStateMachine<P> {
    registry: Arc<StreamRegistry>,
    sessions: Mutex<SessionStateMachine<P>>,
    codec: JsonCodec,
}

impl<P: PrimitiveStateMachine> RaftStateMachine<P> {
    /// Wrap `primitive`, delivering results to callers found in `registry`.
    pub fn new(registry: Arc<StreamRegistry>, primitive: P) -> Self {
        Self {
            registry,
            sessions: Mutex::new(SessionStateMachine::new(primitive)),
            codec: JsonCodec,
        }
    }

    /// Run `f` against the primitive's current state.
    pub fn with_primitive<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        f(self.sessions.lock().primitive())
    }

    /// Index of the last applied entry.
    pub fn last_index(&self) -> u64 {
        self.sessions.lock().last_index()
    }

    /// Ids of the sessions currently open on this replica.
    pub fn sessions(&self) -> Vec<crate::types::SessionId> {
        self.sessions.lock().sessions()
    }
}

impl<P: PrimitiveStateMachine> ReplicatedStateMachine for RaftStateMachine<P> {
    fn update(&self, index: u64, entry: &[u8]) -> Result<()> {
        let proposal: RaftProposal = self.codec.decode(entry).map_err(|err| {
            warn!(index = index, error = %err, "undecodable log entry");
            RsmError::from(err)
        })?;

        self.registry.prune_stale(proposal.term);
        let stream = self.registry.remove(proposal.term, proposal.sequence_num);
        trace!(
            index = index,
            term = %proposal.term,
            sequence = %proposal.sequence_num,
            local = stream.is_some(),
            "applying entry"
        );

        let input: ProposalInput = match self.codec.decode(&proposal.data) {
            Ok(input) => input,
            Err(err) => {
                let err = RsmError::from(err);
                warn!(index = index, error = %err, "undecodable proposal input");
                if let Some(stream) = stream {
                    stream.error(err.clone());
                }
                return Err(err);
            }
        };

        self.sessions.lock().apply(index, input, stream);
        Ok(())
    }

    fn lookup(&self, query: PartitionQuery) {
        self.sessions
            .lock()
            .query(query.input, query.stream.as_ref());
    }
}
