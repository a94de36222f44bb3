//! The seam between request handling and replication.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::stream::WriteStream;
use crate::types::{ProposalInput, ProposalOutput, QueryInput, QueryOutput, ReadConsistency};

/// Executes operations against a partition's replicated state.
///
/// Results never come back through the return value: they are pushed into
/// `stream`, possibly after the call returned and possibly more than once.
/// `Err` means the operation was not accepted (not the leader, timeout,
/// engine failure) and nothing will be pushed.
///
/// Implementations are shared across tasks and called concurrently.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Replicate and apply a mutating operation.
    async fn propose(
        &self,
        input: ProposalInput,
        stream: Arc<dyn WriteStream<ProposalOutput>>,
    ) -> Result<()>;

    /// Read the state at the requested consistency.
    async fn query(
        &self,
        input: QueryInput,
        consistency: ReadConsistency,
        stream: Arc<dyn WriteStream<QueryOutput>>,
    ) -> Result<()>;
}
