//! The consensus engine seam.
//!
//! The access layer never replicates anything itself. It submits encoded
//! [`RaftProposal`](crate::types::RaftProposal)s and reads through a
//! [`ConsensusEngine`], and learns about leadership from [`LeaderUpdate`]s.
//!
//! Engine failures are mapped onto the crate taxonomy by [`wrap_error`]:
//!
//! | Engine error | Error |
//! |---|---|
//! | `Timeout` | `Timeout` |
//! | `Canceled` | `Canceled` |
//! | `ShardNotReady`, `ShardNotFound`, `ShardClosed`, `SystemBusy`, `Dropped` | `Unavailable` |
//! | `Rejected` | `Forbidden` |
//! | `InvalidSession`, `PayloadTooBig` | `Invalid` |
//! | `Other` | `Unknown` |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RsmError;
use crate::stream::WriteStream;
use crate::types::{MemberId, PartitionId, QueryInput, QueryOutput, Term};

/// Failures reported by a consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The request did not complete before its deadline.
    #[error("request timed out")]
    Timeout,
    /// The request was canceled.
    #[error("request canceled")]
    Canceled,
    /// The shard exists but cannot serve requests yet.
    #[error("shard not ready")]
    ShardNotReady,
    /// The shard is not hosted here.
    #[error("shard not found")]
    ShardNotFound,
    /// The shard was stopped.
    #[error("shard closed")]
    ShardClosed,
    /// Too many pending requests.
    #[error("system busy")]
    SystemBusy,
    /// The request was dropped, usually by a leadership change.
    #[error("request dropped")]
    Dropped,
    /// The request was rejected.
    #[error("request rejected")]
    Rejected,
    /// The client session is not valid for this request.
    #[error("invalid session")]
    InvalidSession,
    /// The payload exceeds the engine's entry size limit.
    #[error("payload too big")]
    PayloadTooBig,
    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Map an engine failure onto the crate's error taxonomy.
pub fn wrap_error(err: EngineError) -> RsmError {
    let message = err.to_string();
    match err {
        EngineError::Timeout => RsmError::Timeout(message),
        EngineError::Canceled => RsmError::Canceled(message),
        EngineError::ShardNotReady
        | EngineError::ShardNotFound
        | EngineError::ShardClosed
        | EngineError::SystemBusy
        | EngineError::Dropped => RsmError::Unavailable(message),
        EngineError::Rejected => RsmError::Forbidden(message),
        EngineError::InvalidSession | EngineError::PayloadTooBig => RsmError::Invalid(message),
        EngineError::Other(_) => RsmError::Unknown(message),
    }
}

/// Engine-level client session used to submit proposals.
///
/// The access layer deduplicates through its own sessions, so it always
/// submits through the engine's no-op session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSession {
    /// Shard the session belongs to.
    pub shard: PartitionId,
    /// Whether the engine skips its own deduplication.
    pub no_op: bool,
}

/// A read handed to the engine, answered by the state machine's lookup.
pub struct PartitionQuery {
    /// The read.
    pub input: QueryInput,
    /// Where outputs go.
    pub stream: Arc<dyn WriteStream<QueryOutput>>,
}

impl fmt::Debug for PartitionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionQuery")
            .field("input", &self.input)
            .finish()
    }
}

/// Leadership change reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderUpdate {
    /// Affected partition.
    pub partition: PartitionId,
    /// New term.
    pub term: Term,
    /// New leader, `None` during an election.
    pub leader: Option<MemberId>,
}

/// A replicated log with an attached state machine.
#[async_trait]
pub trait ConsensusEngine: Send + Sync {
    /// The engine session that bypasses engine-level deduplication.
    fn no_op_session(&self, shard: PartitionId) -> EngineSession;

    /// Replicate `command`.
    ///
    /// Resolves with the entry's log index once the entry is committed. The
    /// entry may be applied later; its output travels out of band through
    /// the stream registered for it.
    async fn sync_propose(
        &self,
        session: &EngineSession,
        command: Vec<u8>,
    ) -> Result<u64, EngineError>;

    /// Linearizable read.
    async fn sync_read(&self, shard: PartitionId, query: PartitionQuery)
        -> Result<(), EngineError>;

    /// Read from local state without consulting the leader.
    async fn stale_read(
        &self,
        shard: PartitionId,
        query: PartitionQuery,
    ) -> Result<(), EngineError>;
}
