//! Client side of a session.
//!
//! A [`SessionClient`] owns one server-issued [`SessionId`] and numbers every
//! proposal it sends:
//!
//! ```text
//!  propose(a) ── seq 1 ──┐
//!  propose(b) ── seq 2 ──┼──> Channel ──> leader ──> session state machine
//!  propose(c) ── seq 3 ──┘                              (dedup by seq)
//!
//!  keepalive(ack = 2) ──> "responses 1..=2 received, drop them"
//! ```
//!
//! Sequence numbers come from an atomic counter starting at 1. Completed
//! sequence numbers are tracked so keepalives can acknowledge the contiguous
//! prefix that no caller will ever resend. A background task sends keepalives
//! at [`ClientConfig::keep_alive_interval`]; it holds only a weak reference
//! and stops when the session is closed or dropped.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, RsmError};
use crate::service::{
    CloseSessionRequest, KeepAliveRequest, OpenSessionRequest, PartitionService, ProposalRequest,
    ProposalResponse, QueryRequest, QueryResponse,
};
use crate::stream::{buffered_stream, StreamReader, WriteStream};
use crate::types::{
    CallResponseHeaders, PartitionId, PartitionRequestHeaders, ProposalRequestHeaders,
    QueryRequestHeaders, ReadConsistency, SequenceNum, SessionId,
};

/// Tracks which sequence numbers have completed.
#[derive(Debug, Default)]
struct CompletionTracker {
    watermark: SequenceNum,
    pending: BTreeSet<u64>,
}

impl CompletionTracker {
    fn complete(&mut self, sequence_num: SequenceNum) {
        if sequence_num <= self.watermark {
            return;
        }
        self.pending.insert(sequence_num.0);
        while self.pending.remove(&(self.watermark.0 + 1)) {
            self.watermark = self.watermark.next();
        }
    }
}

/// Marks a sequence number complete when dropped, whatever the outcome.
struct Completion {
    tracker: Arc<Mutex<CompletionTracker>>,
    sequence_num: SequenceNum,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.tracker.lock().complete(self.sequence_num);
    }
}

fn check(headers: &CallResponseHeaders) -> Result<()> {
    match headers.error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// An open session on one partition.
pub struct SessionClient {
    partition_id: PartitionId,
    session_id: SessionId,
    timeout: Duration,
    service: Arc<dyn PartitionService>,
    sequence: AtomicU64,
    completed: Arc<Mutex<CompletionTracker>>,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SessionClient {
    /// Open a session through `service` and start its keepalive task.
    ///
    /// # Errors
    ///
    /// [`RsmError::Unavailable`] if no member is reachable, or the error the
    /// partition returned.
    pub async fn open(
        service: Arc<dyn PartitionService>,
        partition_id: PartitionId,
        config: &ClientConfig,
    ) -> Result<Arc<Self>> {
        let response = service
            .open_session(OpenSessionRequest {
                headers: PartitionRequestHeaders { partition_id },
                timeout: config.session_timeout,
            })
            .await?;
        check(&response.headers)?;

        let session = Arc::new(Self {
            partition_id,
            session_id: response.session_id,
            timeout: config.session_timeout,
            service,
            sequence: AtomicU64::new(0),
            completed: Arc::new(Mutex::new(CompletionTracker::default())),
            keep_alive: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let task = spawn_keep_alive(Arc::downgrade(&session), config.keep_alive_interval());
        *session.keep_alive.lock() = Some(task);

        info!(
            partition = %partition_id,
            session = %session.session_id,
            timeout_ms = config.session_timeout.as_millis() as u64,
            "session opened"
        );
        Ok(session)
    }

    /// Server-issued id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Partition the session lives on.
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Session timeout requested at open.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Last sequence number handed out.
    pub fn last_sequence_num(&self) -> SequenceNum {
        SequenceNum(self.sequence.load(Ordering::Acquire))
    }

    /// Every sequence number up to this one has completed.
    pub fn completed_watermark(&self) -> SequenceNum {
        self.completed.lock().watermark
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RsmError::unavailable(format!(
                "{} is closed",
                self.session_id
            )));
        }
        Ok(())
    }

    fn next_sequence(&self) -> Completion {
        let sequence_num = SequenceNum(self.sequence.fetch_add(1, Ordering::AcqRel) + 1);
        Completion {
            tracker: Arc::clone(&self.completed),
            sequence_num,
        }
    }

    fn proposal(&self, sequence_num: SequenceNum, payload: Vec<u8>) -> ProposalRequest {
        ProposalRequest {
            headers: ProposalRequestHeaders {
                partition: PartitionRequestHeaders {
                    partition_id: self.partition_id,
                },
                session_id: self.session_id,
                sequence_num,
            },
            payload,
        }
    }

    fn query_request(&self, payload: Vec<u8>, consistency: ReadConsistency) -> QueryRequest {
        QueryRequest {
            headers: QueryRequestHeaders {
                partition: PartitionRequestHeaders {
                    partition_id: self.partition_id,
                },
                session_id: self.session_id,
                consistency,
            },
            payload,
        }
    }

    /// Submit a proposal and wait for its output.
    ///
    /// # Errors
    ///
    /// Infrastructure failures from the channel, or the application error the
    /// state machine reported.
    pub async fn propose(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let completion = self.next_sequence();
        debug!(
            session = %self.session_id,
            sequence = %completion.sequence_num,
            "proposing"
        );
        let response = self
            .service
            .propose(self.proposal(completion.sequence_num, payload))
            .await?;
        check(&response.headers)?;
        Ok(response.payload)
    }

    /// Run a query at the requested consistency.
    ///
    /// # Errors
    ///
    /// Infrastructure failures from the channel, or the application error the
    /// state machine reported.
    pub async fn query(&self, payload: Vec<u8>, consistency: ReadConsistency) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let response = self
            .service
            .query(self.query_request(payload, consistency))
            .await?;
        check(&response.headers)?;
        Ok(response.payload)
    }

    /// Submit a proposal whose outputs arrive as a stream.
    ///
    /// The sequence number completes when the stream ends.
    ///
    /// # Errors
    ///
    /// Failures establishing the stream. Later failures arrive as stream
    /// errors.
    pub async fn stream_propose(&self, payload: Vec<u8>) -> Result<StreamReader<Vec<u8>>> {
        self.ensure_open()?;
        let completion = self.next_sequence();
        let inner = self
            .service
            .stream_propose(self.proposal(completion.sequence_num, payload))
            .await?;
        Ok(forward(inner, completion, |r: ProposalResponse| {
            (r.headers, r.payload)
        }))
    }

    /// Run a query whose outputs arrive as a stream.
    ///
    /// # Errors
    ///
    /// Failures establishing the stream. Later failures arrive as stream
    /// errors.
    pub async fn stream_query(
        &self,
        payload: Vec<u8>,
        consistency: ReadConsistency,
    ) -> Result<StreamReader<Vec<u8>>> {
        self.ensure_open()?;
        let inner = self
            .service
            .stream_query(self.query_request(payload, consistency))
            .await?;
        Ok(forward(inner, (), |r: QueryResponse| (r.headers, r.payload)))
    }

    /// Refresh the session and acknowledge completed proposals.
    ///
    /// # Errors
    ///
    /// Infrastructure failures, or `NotFound` if the session expired.
    pub async fn keep_alive(&self) -> Result<()> {
        self.ensure_open()?;
        let ack = self.completed_watermark();
        let response = self
            .service
            .keep_alive(KeepAliveRequest {
                headers: PartitionRequestHeaders {
                    partition_id: self.partition_id,
                },
                session_id: self.session_id,
                ack,
            })
            .await?;
        check(&response.headers)?;
        debug!(session = %self.session_id, ack = %ack, "session kept alive");
        Ok(())
    }

    /// Close the session. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// The failure of the close call itself. The session is considered
    /// closed locally either way.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_keep_alive();
        let response = self
            .service
            .close_session(CloseSessionRequest {
                headers: PartitionRequestHeaders {
                    partition_id: self.partition_id,
                },
                session_id: self.session_id,
            })
            .await?;
        check(&response.headers)?;
        info!(partition = %self.partition_id, session = %self.session_id, "session closed");
        Ok(())
    }

    fn stop_keep_alive(&self) {
        if let Some(task) = self.keep_alive.lock().take() {
            task.abort();
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.stop_keep_alive();
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("partition_id", &self.partition_id)
            .field("session_id", &self.session_id)
            .field("timeout", &self.timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn spawn_keep_alive(session: Weak<SessionClient>, interval: Duration) -> JoinHandle<()> {
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(session) = session.upgrade() else {
                break;
            };
            if session.is_closed() {
                break;
            }
            if let Err(err) = session.keep_alive().await {
                warn!(session = %session.session_id, error = %err, "keepalive failed");
            }
        }
    })
}

/// Unwrap response headers into payloads, holding `guard` until the stream ends.
fn forward<R, G, F>(mut inner: StreamReader<R>, guard: G, unpack: F) -> StreamReader<Vec<u8>>
where
    R: Send + 'static,
    G: Send + 'static,
    F: Fn(R) -> (CallResponseHeaders, Vec<u8>) + Send + 'static,
{
    let (writer, reader) = buffered_stream();
    tokio::spawn(async move {
        let _guard = guard;
        while let Some(item) = inner.receive().await {
            let (headers, payload) = match item {
                Ok(response) => unpack(response),
                Err(err) => {
                    warn!(error = %err, "stream failed");
                    writer.error(err);
                    return;
                }
            };
            if let Err(err) = check(&headers) {
                writer.error(err);
                return;
            }
            if writer.value(payload).is_err() {
                return;
            }
        }
        writer.close();
    });
    reader
}
