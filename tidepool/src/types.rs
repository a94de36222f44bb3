//! Core types for the session/partition protocol.
//!
//! - Identifiers: [`PartitionId`], [`Term`], [`MemberId`], [`SessionId`],
//!   [`SequenceNum`]
//! - Wire headers: [`PartitionRequestHeaders`], [`ProposalRequestHeaders`],
//!   [`QueryRequestHeaders`], [`CallResponseHeaders`] and [`Status`]
//! - Executor payloads: [`ProposalInput`]/[`ProposalOutput`],
//!   [`QueryInput`]/[`QueryOutput`]
//! - The replicated envelope: [`RaftProposal`]
//! - Leadership: [`LeaderState`]
//! - Read semantics: [`ReadConsistency`]

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{error_from_status, RsmError};

/// Identifier of a partition (a shard of the keyspace).
///
/// Stable for the partition's lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition({})", self.0)
    }
}

/// Consensus epoch.
///
/// Never decreases for a given partition. A proposal is only valid under the
/// term it was issued in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Term(pub u64);

impl Term {
    /// No term observed yet.
    pub const ZERO: Self = Self(0);

    /// Create a new term.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "term({})", self.0)
    }
}

/// Identifier of a replica within a partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member({})", self.0)
    }
}

/// Server-issued session identifier.
///
/// Minted by the state machine from the log index of the entry that opened
/// the session, so it is identical on every replica.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session({})", self.0)
    }
}

/// Monotonically increasing sequence number.
///
/// Used twice with different scopes: per session on the client (duplicate
/// detection) and per term in the stream registry (response correlation).
/// The first sequence number handed out is `1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SequenceNum(pub u64);

impl SequenceNum {
    /// Sentinel meaning "nothing issued yet".
    pub const ZERO: Self = Self(0);

    /// Create a new sequence number.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// The following sequence number.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq({})", self.0)
    }
}

/// Outcome code carried in [`CallResponseHeaders`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    /// Success.
    #[default]
    Ok,
    /// Generic error.
    Error,
    /// Unclassified failure.
    Unknown,
    /// Canceled by the caller.
    Canceled,
    /// Target not found.
    NotFound,
    /// Target already exists.
    AlreadyExists,
    /// Not authenticated.
    Unauthorized,
    /// Not allowed.
    Forbidden,
    /// Conflicting state.
    Conflict,
    /// Malformed request.
    Invalid,
    /// Transiently unreachable.
    Unavailable,
    /// Operation not supported.
    NotSupported,
    /// Deadline exceeded.
    Timeout,
    /// State machine fault.
    Fault,
    /// Local defect.
    Internal,
}

/// Consistency level requested for a query.
///
/// Attached explicitly to [`QueryRequestHeaders`]; absence of a choice means
/// [`ReadConsistency::Stale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReadConsistency {
    /// Served from the local replica's current state. May lag the leader.
    #[default]
    Stale,
    /// Linearizable: observes every proposal committed before the read was
    /// issued. Goes through the consensus engine's read path.
    Sync,
}

/// Headers present on every partition-scoped request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartitionRequestHeaders {
    /// Target partition.
    pub partition_id: PartitionId,
}

/// Headers for a proposal issued on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProposalRequestHeaders {
    /// Target partition.
    pub partition: PartitionRequestHeaders,
    /// Session issuing the proposal.
    pub session_id: SessionId,
    /// Per-session sequence number of this proposal.
    pub sequence_num: SequenceNum,
}

/// Headers for a query issued on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryRequestHeaders {
    /// Target partition.
    pub partition: PartitionRequestHeaders,
    /// Session issuing the query.
    pub session_id: SessionId,
    /// Requested consistency.
    pub consistency: ReadConsistency,
}

/// Headers present on every response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallResponseHeaders {
    /// Outcome of the call.
    pub status: Status,
    /// Failure detail, empty on success.
    pub message: String,
}

impl CallResponseHeaders {
    /// Successful response headers.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Response headers describing a failure.
    pub fn from_error(err: &RsmError) -> Self {
        Self {
            status: err.status(),
            message: err.message().to_string(),
        }
    }

    /// The typed error these headers describe, if any.
    pub fn error(&self) -> Option<RsmError> {
        error_from_status(self.status, self.message.clone())
    }
}

/// A session operation as submitted through the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Open a new session that expires after `timeout` without keepalive.
    OpenSession {
        /// Session timeout.
        timeout: Duration,
    },
    /// Refresh a session and acknowledge completed proposals.
    KeepAlive {
        /// Session being refreshed.
        session_id: SessionId,
        /// Every proposal up to and including this sequence number has been
        /// received by the client; cached outputs may be dropped.
        ack: SequenceNum,
    },
    /// Close a session.
    CloseSession {
        /// Session being closed.
        session_id: SessionId,
    },
    /// A primitive proposal issued on a session.
    Proposal {
        /// Issuing session.
        session_id: SessionId,
        /// Per-session sequence number.
        sequence_num: SequenceNum,
        /// Primitive-encoded input.
        payload: Vec<u8>,
    },
}

/// One mutating operation as handed to the [`Executor`](crate::node::Executor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalInput {
    /// Wall-clock milliseconds stamped by the node that accepted the call.
    ///
    /// Replicated with the entry so session expiry is deterministic.
    pub timestamp: u64,
    /// The operation to apply.
    pub operation: Operation,
}

/// Result of applying a [`ProposalInput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalResult {
    /// A session was opened.
    SessionOpened(SessionId),
    /// The keepalive was applied.
    KeptAlive,
    /// The session was closed.
    SessionClosed,
    /// Primitive output.
    Output(Vec<u8>),
    /// The state machine rejected the operation.
    Failed(RsmError),
}

/// One output produced by the state machine for a proposal.
///
/// Unary proposals produce exactly one; streaming proposals may produce many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalOutput {
    /// Log index of the entry that produced this output.
    pub index: u64,
    /// The result.
    pub result: ProposalResult,
}

/// One read operation as handed to the [`Executor`](crate::node::Executor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryInput {
    /// Issuing session.
    pub session_id: SessionId,
    /// Primitive-encoded input.
    pub payload: Vec<u8>,
}

/// One output produced by the state machine for a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOutput {
    /// Primitive output, or the reason the query was rejected.
    pub result: Result<Vec<u8>, RsmError>,
}

/// A proposal as submitted to the consensus log.
///
/// `(term, sequence_num)` is the key under which the proposing node registered
/// its response stream; the apply path uses it to find the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftProposal {
    /// Term the proposal was issued in.
    pub term: Term,
    /// Registry sequence number within `term`.
    pub sequence_num: SequenceNum,
    /// Encoded [`ProposalInput`].
    pub data: Vec<u8>,
}

/// Snapshot of a partition's leadership.
///
/// Published as one immutable value so `(term, leader)` can never be observed
/// torn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LeaderState {
    /// Current term.
    pub term: Term,
    /// Current leader, if one is known.
    pub leader: Option<MemberId>,
}

impl LeaderState {
    /// Create a snapshot.
    pub fn new(term: Term, leader: Option<MemberId>) -> Self {
        Self { term, leader }
    }

    /// Whether `member` leads the partition in this snapshot.
    pub fn is_leader(&self, member: MemberId) -> bool {
        self.leader == Some(member)
    }
}

impl fmt::Display for LeaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.leader {
            Some(leader) => write!(f, "{} led by {}", self.term, leader),
            None => write!(f, "{} without leader", self.term),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_num_next() {
        assert_eq!(SequenceNum::ZERO.next(), SequenceNum::new(1));
        assert!(SequenceNum::new(2) > SequenceNum::new(1));
    }

    #[test]
    fn test_leader_state() {
        let state = LeaderState::new(Term::new(5), Some(MemberId(1)));
        assert!(state.is_leader(MemberId(1)));
        assert!(!state.is_leader(MemberId(2)));
        assert!(!LeaderState::default().is_leader(MemberId(0)));
        assert_eq!(state.to_string(), "term(5) led by member(1)");
    }

    #[test]
    fn test_response_headers_error() {
        assert_eq!(CallResponseHeaders::ok().error(), None);

        let headers = CallResponseHeaders::from_error(&RsmError::not_found("no such key"));
        assert_eq!(headers.status, Status::NotFound);
        assert_eq!(headers.error(), Some(RsmError::not_found("no such key")));
    }

    #[test]
    fn test_read_consistency_defaults_to_stale() {
        assert_eq!(ReadConsistency::default(), ReadConsistency::Stale);
        assert_eq!(
            QueryRequestHeaders::default().consistency,
            ReadConsistency::Stale
        );
    }
}
