//! Typed request dispatch on a node.
//!
//! A [`Handler<I, O>`] sits between a primitive's service and the partition
//! executors. It owns the primitive's [`Codec<I, O>`]:
//!
//! ```text
//!  input: I ──encode──> Operation::Proposal ──> Executor::propose ──┐
//!                                                                   │ stream
//!  (O, CallResponseHeaders) <──decode── ProposalOutput <────────────┘
//! ```
//!
//! Application failures reported by the state machine come back in the
//! response headers with a default output. Infrastructure failures (unknown
//! partition, not the leader, timeout) are returned as `Err`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::codec::Codec;
use crate::error::{Result, RsmError};
use crate::logging::Trunc;
use crate::node::partition::Partition;
use crate::node::protocol::Protocol;
use crate::stream::{buffered_stream, StreamReader, WriteStream};
use crate::types::{
    CallResponseHeaders, Operation, PartitionId, ProposalInput, ProposalOutput,
    ProposalRequestHeaders, ProposalResult, QueryInput, QueryOutput, QueryRequestHeaders,
};

/// Wall-clock milliseconds used to stamp proposals.
pub fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// One decoded output of a streaming call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamResponse<O> {
    /// Outcome of this output.
    pub headers: CallResponseHeaders,
    /// Decoded output (default when the headers carry a failure).
    pub output: O,
}

/// Dispatches typed proposals and queries to partition executors.
pub struct Handler<I, O> {
    protocol: Arc<dyn Protocol>,
    codec: Codec<I, O>,
}

impl<I, O> Clone for Handler<I, O> {
    fn clone(&self) -> Self {
        Self {
            protocol: Arc::clone(&self.protocol),
            codec: self.codec.clone(),
        }
    }
}

impl<I, O> Handler<I, O>
where
    I: Send + Sync + 'static,
    O: Default + Send + 'static,
{
    /// A handler resolving partitions through `protocol`.
    pub fn new(protocol: Arc<dyn Protocol>, codec: Codec<I, O>) -> Self {
        Self { protocol, codec }
    }

    fn partition(&self, id: PartitionId) -> Result<Partition> {
        self.protocol
            .partition(id)
            .ok_or_else(|| RsmError::not_found(format!("{} not found", id)))
    }

    fn proposal_output(&self, output: ProposalOutput) -> Result<(O, CallResponseHeaders)> {
        match output.result {
            ProposalResult::Output(bytes) => {
                Ok((self.codec.decode(&bytes)?, CallResponseHeaders::ok()))
            }
            ProposalResult::Failed(err) => Ok((O::default(), CallResponseHeaders::from_error(&err))),
            other => Err(RsmError::internal(format!(
                "unexpected proposal result {:?}",
                other
            ))),
        }
    }

    fn query_output(&self, output: QueryOutput) -> Result<(O, CallResponseHeaders)> {
        match output.result {
            Ok(bytes) => Ok((self.codec.decode(&bytes)?, CallResponseHeaders::ok())),
            Err(err) => Ok((O::default(), CallResponseHeaders::from_error(&err))),
        }
    }

    async fn submit_proposal(
        &self,
        input: &I,
        headers: &ProposalRequestHeaders,
    ) -> Result<StreamReader<ProposalOutput>> {
        let partition = self.partition(headers.partition.partition_id)?;
        let payload = self.codec.encode(input)?;
        debug!(
            partition = %partition.id(),
            session = %headers.session_id,
            sequence = %headers.sequence_num,
            payload = %Trunc(&payload),
            "proposing"
        );
        let input = ProposalInput {
            timestamp: timestamp(),
            operation: Operation::Proposal {
                session_id: headers.session_id,
                sequence_num: headers.sequence_num,
                payload,
            },
        };
        let (writer, reader) = buffered_stream();
        partition.executor().propose(input, Arc::new(writer)).await?;
        Ok(reader)
    }

    async fn submit_query(
        &self,
        input: &I,
        headers: &QueryRequestHeaders,
    ) -> Result<StreamReader<QueryOutput>> {
        let partition = self.partition(headers.partition.partition_id)?;
        let payload = self.codec.encode(input)?;
        debug!(
            partition = %partition.id(),
            session = %headers.session_id,
            consistency = ?headers.consistency,
            payload = %Trunc(&payload),
            "querying"
        );
        let input = QueryInput {
            session_id: headers.session_id,
            payload,
        };
        let (writer, reader) = buffered_stream();
        partition
            .executor()
            .query(input, headers.consistency, Arc::new(writer))
            .await?;
        Ok(reader)
    }

    /// Propose `input` and wait for its output.
    ///
    /// # Errors
    ///
    /// [`RsmError::NotFound`] for an unknown partition,
    /// [`RsmError::Internal`] for codec failures, or the executor's error.
    pub async fn propose(
        &self,
        input: &I,
        headers: &ProposalRequestHeaders,
    ) -> Result<(O, CallResponseHeaders)> {
        let mut reader = self.submit_proposal(input, headers).await?;
        match reader.receive().await {
            Some(Ok(output)) => self.proposal_output(output),
            Some(Err(err)) => {
                warn!(session = %headers.session_id, error = %err, "proposal failed");
                Err(err)
            }
            None => Err(RsmError::internal("proposal completed without output")),
        }
    }

    /// Query with `input` and wait for its output.
    ///
    /// # Errors
    ///
    /// [`RsmError::NotFound`] for an unknown partition,
    /// [`RsmError::Internal`] for codec failures, or the executor's error.
    pub async fn query(
        &self,
        input: &I,
        headers: &QueryRequestHeaders,
    ) -> Result<(O, CallResponseHeaders)> {
        let mut reader = self.submit_query(input, headers).await?;
        match reader.receive().await {
            Some(Ok(output)) => self.query_output(output),
            Some(Err(err)) => {
                warn!(session = %headers.session_id, error = %err, "query failed");
                Err(err)
            }
            None => Err(RsmError::internal("query completed without output")),
        }
    }

    /// Propose `input` and push every output into `sink` until the source
    /// ends. `sink` is closed on a normal end; on `Err` the caller decides.
    ///
    /// # Errors
    ///
    /// As for [`propose`](Self::propose), plus any error terminating the
    /// source stream.
    pub async fn stream_propose(
        &self,
        input: &I,
        headers: &ProposalRequestHeaders,
        sink: &dyn WriteStream<StreamResponse<O>>,
    ) -> Result<()> {
        let mut reader = self.submit_proposal(input, headers).await?;
        while let Some(item) = reader.receive().await {
            let (output, headers) = self.proposal_output(item?)?;
            if sink.value(StreamResponse { headers, output }).is_err() {
                debug!("stream consumer went away");
                return Ok(());
            }
        }
        sink.close();
        Ok(())
    }

    /// Query with `input` and push every output into `sink` until the source
    /// ends. `sink` is closed on a normal end; on `Err` the caller decides.
    ///
    /// # Errors
    ///
    /// As for [`query`](Self::query), plus any error terminating the source
    /// stream.
    pub async fn stream_query(
        &self,
        input: &I,
        headers: &QueryRequestHeaders,
        sink: &dyn WriteStream<StreamResponse<O>>,
    ) -> Result<()> {
        let mut reader = self.submit_query(input, headers).await?;
        while let Some(item) = reader.receive().await {
            let (output, headers) = self.query_output(item?)?;
            if sink.value(StreamResponse { headers, output }).is_err() {
                debug!("stream consumer went away");
                return Ok(());
            }
        }
        sink.close();
        Ok(())
    }
}
