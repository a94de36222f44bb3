//! Apply-side session bookkeeping.
//!
//! [`SessionStateMachine`] is the deterministic core every replica runs for
//! each committed [`ProposalInput`]. It owns the sessions of one partition
//! and wraps the primitive's [`PrimitiveStateMachine`]:
//!
//! | Operation | Effect | Result |
//! |---|---|---|
//! | `OpenSession { timeout }` | new session keyed by the entry's index | `SessionOpened(id)` |
//! | `KeepAlive { id, ack }` | refresh liveness, drop cached outputs `<= ack` | `KeptAlive` |
//! | `CloseSession { id }` | remove the session | `SessionClosed` |
//! | `Proposal { id, seq, payload }` | apply once, cache the output | `Output(bytes)` |
//!
//! # Exactly-once
//!
//! Each session remembers the outputs of the proposals it applied. A proposal
//! whose sequence number was already applied is answered from that cache
//! instead of being applied again, which makes client retries safe. The cache
//! is pruned by the acknowledgements carried on keepalives; a duplicate of a
//! pruned proposal is answered with [`RsmError::Fault`].
//!
//! # Expiry
//!
//! Time only advances through the timestamps stamped on proposals, so every
//! replica expires the same sessions at the same log position.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, RsmError};
use crate::stream::{StreamClosed, WriteStream};
use crate::types::{
    Operation, ProposalInput, ProposalOutput, ProposalResult, QueryInput, QueryOutput,
    SequenceNum, SessionId,
};

/// Business logic of a primitive (counter, map, set, ...).
///
/// Must be deterministic: replicas apply the same inputs in the same order
/// and have to reach the same state.
pub trait PrimitiveStateMachine: Send + 'static {
    /// Apply a mutating input. The returned bytes are the proposal's first
    /// output; `Err` is reported to the caller as an application failure.
    fn propose(&mut self, context: &mut ProposalContext, input: &[u8]) -> Result<Vec<u8>>;

    /// Serve a read. Outputs are emitted through `context`; `Err` is reported
    /// to the caller as an application failure.
    fn query(&self, context: &QueryContext<'_>, input: &[u8]) -> Result<()>;

    /// A session closed or expired.
    fn session_closed(&mut self, _session_id: SessionId) {}
}

/// Per-proposal context handed to [`PrimitiveStateMachine::propose`].
pub struct ProposalContext {
    index: u64,
    timestamp: u64,
    session_id: SessionId,
    sequence_num: SequenceNum,
    stream: Option<Arc<dyn WriteStream<ProposalOutput>>>,
    retained: bool,
}

impl ProposalContext {
    /// Log index of the entry being applied.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Timestamp of the entry being applied.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Session that issued the proposal.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Sequence number of the proposal within its session.
    pub fn sequence_num(&self) -> SequenceNum {
        self.sequence_num
    }

    /// Keep the caller's stream open after this proposal, for primitives
    /// that push later outputs (watches, event feeds).
    ///
    /// `None` on replicas where no caller is attached.
    pub fn retain_stream(&mut self) -> Option<OutputStream> {
        let stream = self.stream.clone()?;
        self.retained = true;
        Some(OutputStream { stream })
    }
}

/// A caller's stream retained by a primitive.
#[derive(Clone)]
pub struct OutputStream {
    stream: Arc<dyn WriteStream<ProposalOutput>>,
}

impl OutputStream {
    /// Push an output produced while applying entry `index`.
    ///
    /// # Errors
    ///
    /// [`StreamClosed`] once the caller went away; drop the handle then.
    pub fn send(&self, index: u64, output: Vec<u8>) -> std::result::Result<(), StreamClosed> {
        self.stream.value(ProposalOutput {
            index,
            result: ProposalResult::Output(output),
        })
    }

    /// End the stream.
    pub fn close(&self) {
        self.stream.close();
    }
}

/// Per-query context handed to [`PrimitiveStateMachine::query`].
pub struct QueryContext<'a> {
    session_id: SessionId,
    stream: &'a dyn WriteStream<QueryOutput>,
}

impl QueryContext<'_> {
    /// Session that issued the query.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Emit one output.
    ///
    /// # Errors
    ///
    /// [`StreamClosed`] once the caller went away.
    pub fn emit(&self, output: Vec<u8>) -> std::result::Result<(), StreamClosed> {
        self.stream.value(QueryOutput { result: Ok(output) })
    }
}

#[derive(Debug)]
struct Session {
    timeout: Duration,
    last_active: u64,
    /// Every sequence number up to here has been applied.
    watermark: SequenceNum,
    /// Applied sequence numbers above the watermark.
    applied: BTreeMap<SequenceNum, ProposalResult>,
    /// Outputs at or below the watermark not yet acknowledged.
    cached: BTreeMap<SequenceNum, ProposalResult>,
}

impl Session {
    fn new(timeout: Duration, timestamp: u64) -> Self {
        Self {
            timeout,
            last_active: timestamp,
            watermark: SequenceNum::ZERO,
            applied: BTreeMap::new(),
            cached: BTreeMap::new(),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.last_active) > self.timeout.as_millis() as u64
    }

    /// The recorded result of `sequence_num`, if it was applied.
    fn replay(&self, sequence_num: SequenceNum) -> Option<ProposalResult> {
        if let Some(result) = self
            .applied
            .get(&sequence_num)
            .or_else(|| self.cached.get(&sequence_num))
        {
            return Some(result.clone());
        }
        (sequence_num <= self.watermark).then(|| {
            ProposalResult::Failed(RsmError::Fault(format!(
                "output of {} was already acknowledged",
                sequence_num
            )))
        })
    }

    fn record(&mut self, sequence_num: SequenceNum, result: ProposalResult) {
        self.applied.insert(sequence_num, result);
        while let Some(result) = self.applied.remove(&self.watermark.next()) {
            self.watermark = self.watermark.next();
            self.cached.insert(self.watermark, result);
        }
    }

    fn acknowledge(&mut self, ack: SequenceNum) {
        self.cached.retain(|sequence_num, _| *sequence_num > ack);
        self.applied.retain(|sequence_num, _| *sequence_num > ack);
        if ack > self.watermark {
            self.watermark = ack;
        }
    }
}

/// Sessions of one partition wrapped around its primitive.
pub struct SessionStateMachine<P> {
    primitive: P,
    sessions: BTreeMap<SessionId, Session>,
    last_index: u64,
}

impl<P: PrimitiveStateMachine> SessionStateMachine<P> {
    /// Wrap `primitive` with no open sessions.
    pub fn new(primitive: P) -> Self {
        Self {
            primitive,
            sessions: BTreeMap::new(),
            last_index: 0,
        }
    }

    /// The wrapped primitive.
    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    /// Ids of the open sessions.
    pub fn sessions(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Index of the last applied entry.
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    /// Apply the committed entry at `index`.
    ///
    /// When `stream` is attached (the replica that accepted the call), the
    /// result is pushed into it and the stream is closed, unless the
    /// primitive retained it.
    pub fn apply(
        &mut self,
        index: u64,
        input: ProposalInput,
        stream: Option<Arc<dyn WriteStream<ProposalOutput>>>,
    ) -> ProposalResult {
        self.last_index = index;
        self.expire(input.timestamp);

        let mut retained = false;
        let result = match input.operation {
            Operation::OpenSession { timeout } => {
                let session_id = SessionId(index);
                self.sessions
                    .insert(session_id, Session::new(timeout, input.timestamp));
                info!(session = %session_id, timeout_ms = timeout.as_millis() as u64, "session opened");
                ProposalResult::SessionOpened(session_id)
            }
            Operation::KeepAlive { session_id, ack } => match self.sessions.get_mut(&session_id) {
                Some(session) => {
                    session.last_active = input.timestamp;
                    session.acknowledge(ack);
                    ProposalResult::KeptAlive
                }
                None => unknown_session(session_id),
            },
            Operation::CloseSession { session_id } => {
                if self.sessions.remove(&session_id).is_some() {
                    self.primitive.session_closed(session_id);
                    info!(session = %session_id, "session closed");
                    ProposalResult::SessionClosed
                } else {
                    unknown_session(session_id)
                }
            }
            Operation::Proposal {
                session_id,
                sequence_num,
                payload,
            } => {
                let (result, kept) = self.propose(
                    index,
                    input.timestamp,
                    session_id,
                    sequence_num,
                    &payload,
                    stream.clone(),
                );
                retained = kept;
                result
            }
        };

        if let Some(stream) = stream {
            let _ = stream.value(ProposalOutput {
                index,
                result: result.clone(),
            });
            if !retained {
                stream.close();
            }
        }
        result
    }

    fn propose(
        &mut self,
        index: u64,
        timestamp: u64,
        session_id: SessionId,
        sequence_num: SequenceNum,
        payload: &[u8],
        stream: Option<Arc<dyn WriteStream<ProposalOutput>>>,
    ) -> (ProposalResult, bool) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return (unknown_session(session_id), false);
        };
        session.last_active = timestamp;
        if let Some(result) = session.replay(sequence_num) {
            debug!(session = %session_id, sequence = %sequence_num, "replaying duplicate proposal");
            return (result, false);
        }

        let mut context = ProposalContext {
            index,
            timestamp,
            session_id,
            sequence_num,
            stream,
            retained: false,
        };
        let result = match self.primitive.propose(&mut context, payload) {
            Ok(output) => ProposalResult::Output(output),
            Err(err) => ProposalResult::Failed(err),
        };
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.record(sequence_num, result.clone());
        }
        (result, context.retained)
    }

    fn expire(&mut self, now: u64) {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_expired(now))
            .map(|(id, _)| *id)
            .collect();
        for session_id in expired {
            self.sessions.remove(&session_id);
            self.primitive.session_closed(session_id);
            info!(session = %session_id, "session expired");
        }
    }

    /// Serve a read without mutating state. Outputs are pushed into `stream`,
    /// which is closed afterwards.
    pub fn query(&self, input: QueryInput, stream: &dyn WriteStream<QueryOutput>) {
        if !self.sessions.contains_key(&input.session_id) {
            let _ = stream.value(QueryOutput {
                result: Err(RsmError::not_found(format!("{} not found", input.session_id))),
            });
            stream.close();
            return;
        }
        let context = QueryContext {
            session_id: input.session_id,
            stream,
        };
        if let Err(err) = self.primitive.query(&context, &input.payload) {
            let _ = stream.value(QueryOutput { result: Err(err) });
        }
        stream.close();
    }
}

fn unknown_session(session_id: SessionId) -> ProposalResult {
    ProposalResult::Failed(RsmError::not_found(format!("{} not found", session_id)))
}
