//! The partition RPC surface.
//!
//! [`PartitionService`] is what a node exposes and what a client channel
//! calls. It is transport-agnostic: [`NodeServer`](crate::node::NodeServer)
//! implements it on the node, [`Channel`](crate::client::Channel) implements
//! it on the client by routing to a resolved member.
//!
//! # Error contract
//!
//! - `Err(RsmError)` is an infrastructure failure (not the leader, no route,
//!   timeout). `Unavailable` errors are retried by the client channel.
//! - `Ok(response)` with a non-`Ok` status in
//!   [`CallResponseHeaders`] is an application outcome produced by the state
//!   machine; the session client converts it with
//!   [`error_from_status`](crate::error::error_from_status).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::stream::StreamReader;
use crate::types::{
    CallResponseHeaders, PartitionRequestHeaders, ProposalRequestHeaders, QueryRequestHeaders,
    SequenceNum, SessionId,
};

/// Open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    /// Target partition.
    pub headers: PartitionRequestHeaders,
    /// Requested session timeout.
    pub timeout: Duration,
}

/// Session opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    /// Outcome.
    pub headers: CallResponseHeaders,
    /// The minted session id (meaningful when the status is `Ok`).
    pub session_id: SessionId,
}

/// Refresh a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    /// Target partition.
    pub headers: PartitionRequestHeaders,
    /// Session being refreshed.
    pub session_id: SessionId,
    /// Highest sequence number below which every response was received.
    pub ack: SequenceNum,
}

/// Keepalive outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    /// Outcome.
    pub headers: CallResponseHeaders,
}

/// Close a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    /// Target partition.
    pub headers: PartitionRequestHeaders,
    /// Session being closed.
    pub session_id: SessionId,
}

/// Close outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    /// Outcome.
    pub headers: CallResponseHeaders,
}

/// A primitive proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRequest {
    /// Partition, session and sequence number.
    pub headers: ProposalRequestHeaders,
    /// Primitive-encoded input.
    pub payload: Vec<u8>,
}

/// Output of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResponse {
    /// Outcome.
    pub headers: CallResponseHeaders,
    /// Primitive-encoded output.
    pub payload: Vec<u8>,
}

/// A primitive query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Partition, session and consistency.
    pub headers: QueryRequestHeaders,
    /// Primitive-encoded input.
    pub payload: Vec<u8>,
}

/// Output of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Outcome.
    pub headers: CallResponseHeaders,
    /// Primitive-encoded output.
    pub payload: Vec<u8>,
}

/// RPC surface of a partition member.
#[async_trait]
pub trait PartitionService: Send + Sync {
    /// Open a session.
    async fn open_session(&self, request: OpenSessionRequest) -> Result<OpenSessionResponse>;

    /// Refresh a session.
    async fn keep_alive(&self, request: KeepAliveRequest) -> Result<KeepAliveResponse>;

    /// Close a session.
    async fn close_session(&self, request: CloseSessionRequest) -> Result<CloseSessionResponse>;

    /// Submit a unary proposal.
    async fn propose(&self, request: ProposalRequest) -> Result<ProposalResponse>;

    /// Submit a unary query.
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse>;

    /// Submit a proposal whose outputs arrive as a stream.
    async fn stream_propose(
        &self,
        request: ProposalRequest,
    ) -> Result<StreamReader<ProposalResponse>>;

    /// Submit a query whose outputs arrive as a stream.
    async fn stream_query(&self, request: QueryRequest) -> Result<StreamReader<QueryResponse>>;
}
