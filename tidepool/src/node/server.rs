//! The partition service exposed by a node.
//!
//! [`NodeServer`] turns [`PartitionService`] calls into executor operations.
//! Session management calls become session proposals; primitive calls go
//! through a raw-bytes [`Handler`], since payloads are already encoded by the
//! client.
//!
//! Streaming calls are established before they are returned: the first
//! output (or the failure that replaces it) is awaited, so "not the leader"
//! surfaces as an `Err` the client can retry instead of a stream error.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::error::{Result, RsmError};
use crate::logging::Trunc;
use crate::node::handler::{timestamp, Handler, StreamResponse};
use crate::node::protocol::Protocol;
use crate::service::{
    CloseSessionRequest, CloseSessionResponse, KeepAliveRequest, KeepAliveResponse,
    OpenSessionRequest, OpenSessionResponse, PartitionService, ProposalRequest, ProposalResponse,
    QueryRequest, QueryResponse,
};
use crate::stream::{buffered_stream, StreamClosed, StreamReader, StreamWriter, WriteStream};
use crate::types::{
    CallResponseHeaders, Operation, PartitionId, ProposalInput, ProposalResult, SessionId,
};

/// Adapts handler outputs into wire responses.
struct ResponseSink<R> {
    writer: StreamWriter<R>,
    wrap: fn(StreamResponse<Vec<u8>>) -> R,
}

impl<R: Send> WriteStream<StreamResponse<Vec<u8>>> for ResponseSink<R> {
    fn value(&self, value: StreamResponse<Vec<u8>>) -> std::result::Result<(), StreamClosed> {
        self.writer.value((self.wrap)(value))
    }

    fn error(&self, error: RsmError) {
        self.writer.error(error);
    }

    fn close(&self) {
        self.writer.close();
    }
}

/// Wait for the first item of `reader`; a leading error fails the call.
async fn establish<R: Send + 'static>(mut reader: StreamReader<R>) -> Result<StreamReader<R>> {
    let first = match reader.receive().await {
        Some(Err(err)) => return Err(err),
        Some(Ok(first)) => first,
        None => {
            let (writer, empty) = buffered_stream();
            writer.close();
            return Ok(empty);
        }
    };
    let (writer, established) = buffered_stream();
    let _ = writer.value(first);
    tokio::spawn(async move {
        while let Some(item) = reader.receive().await {
            match item {
                Ok(value) => {
                    if writer.value(value).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    writer.error(err);
                    return;
                }
            }
        }
        writer.close();
    });
    Ok(established)
}

/// [`PartitionService`] implementation backed by a node's partitions.
pub struct NodeServer {
    protocol: Arc<dyn Protocol>,
    handler: Handler<Vec<u8>, Vec<u8>>,
}

impl NodeServer {
    /// Serve the partitions of `protocol`.
    pub fn new(protocol: Arc<dyn Protocol>) -> Self {
        let handler = Handler::new(Arc::clone(&protocol), Codec::raw());
        Self { protocol, handler }
    }

    async fn session_operation(
        &self,
        partition_id: PartitionId,
        operation: Operation,
    ) -> Result<ProposalResult> {
        let partition = self
            .protocol
            .partition(partition_id)
            .ok_or_else(|| RsmError::not_found(format!("{} not found", partition_id)))?;
        let (writer, mut reader) = buffered_stream();
        partition
            .executor()
            .propose(
                ProposalInput {
                    timestamp: timestamp(),
                    operation,
                },
                Arc::new(writer),
            )
            .await?;
        match reader.receive().await {
            Some(Ok(output)) => Ok(output.result),
            Some(Err(err)) => Err(err),
            None => Err(RsmError::internal("session operation completed without output")),
        }
    }
}

/// Headers for a session operation that is expected to yield `expected`.
fn session_headers(result: ProposalResult, expected: &str) -> Result<CallResponseHeaders> {
    match result {
        ProposalResult::Failed(err) => Ok(CallResponseHeaders::from_error(&err)),
        ProposalResult::SessionOpened(_) | ProposalResult::KeptAlive | ProposalResult::SessionClosed => {
            Ok(CallResponseHeaders::ok())
        }
        other => Err(RsmError::internal(format!(
            "expected {}, got {:?}",
            expected, other
        ))),
    }
}

#[async_trait]
impl PartitionService for NodeServer {
    async fn open_session(&self, request: OpenSessionRequest) -> Result<OpenSessionResponse> {
        debug!(partition = %request.headers.partition_id, "open session");
        let result = self
            .session_operation(
                request.headers.partition_id,
                Operation::OpenSession {
                    timeout: request.timeout,
                },
            )
            .await?;
        let session_id = match result {
            ProposalResult::SessionOpened(session_id) => session_id,
            _ => SessionId::default(),
        };
        Ok(OpenSessionResponse {
            headers: session_headers(result, "an opened session")?,
            session_id,
        })
    }

    async fn keep_alive(&self, request: KeepAliveRequest) -> Result<KeepAliveResponse> {
        let result = self
            .session_operation(
                request.headers.partition_id,
                Operation::KeepAlive {
                    session_id: request.session_id,
                    ack: request.ack,
                },
            )
            .await?;
        Ok(KeepAliveResponse {
            headers: session_headers(result, "a keepalive")?,
        })
    }

    async fn close_session(&self, request: CloseSessionRequest) -> Result<CloseSessionResponse> {
        debug!(session = %request.session_id, "close session");
        let result = self
            .session_operation(
                request.headers.partition_id,
                Operation::CloseSession {
                    session_id: request.session_id,
                },
            )
            .await?;
        Ok(CloseSessionResponse {
            headers: session_headers(result, "a closed session")?,
        })
    }

    async fn propose(&self, request: ProposalRequest) -> Result<ProposalResponse> {
        debug!(request = %Trunc(&request), "propose");
        match self.handler.propose(&request.payload, &request.headers).await {
            Ok((payload, headers)) => {
                let response = ProposalResponse { headers, payload };
                debug!(response = %Trunc(&response), "propose");
                Ok(response)
            }
            Err(err) => {
                warn!(request = %Trunc(&request), error = %err, "propose");
                Err(err)
            }
        }
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        debug!(request = %Trunc(&request), "query");
        match self.handler.query(&request.payload, &request.headers).await {
            Ok((payload, headers)) => {
                let response = QueryResponse { headers, payload };
                debug!(response = %Trunc(&response), "query");
                Ok(response)
            }
            Err(err) => {
                warn!(request = %Trunc(&request), error = %err, "query");
                Err(err)
            }
        }
    }

    async fn stream_propose(
        &self,
        request: ProposalRequest,
    ) -> Result<StreamReader<ProposalResponse>> {
        debug!(request = %Trunc(&request), "stream propose");
        let (writer, reader) = buffered_stream();
        let sink = ResponseSink {
            writer,
            wrap: |response| ProposalResponse {
                headers: response.headers,
                payload: response.output,
            },
        };
        let handler = self.handler.clone();
        tokio::spawn(async move {
            if let Err(err) = handler
                .stream_propose(&request.payload, &request.headers, &sink)
                .await
            {
                warn!(request = %Trunc(&request), error = %err, "stream propose");
                sink.error(err);
            }
        });
        establish(reader).await
    }

    async fn stream_query(&self, request: QueryRequest) -> Result<StreamReader<QueryResponse>> {
        debug!(request = %Trunc(&request), "stream query");
        let (writer, reader) = buffered_stream();
        let sink = ResponseSink {
            writer,
            wrap: |response| QueryResponse {
                headers: response.headers,
                payload: response.output,
            },
        };
        let handler = self.handler.clone();
        tokio::spawn(async move {
            if let Err(err) = handler
                .stream_query(&request.payload, &request.headers, &sink)
                .await
            {
                warn!(request = %Trunc(&request), error = %err, "stream query");
                sink.error(err);
            }
        });
        establish(reader).await
    }
}
