//! Counter primitive, node builder and a response-dropping service wrapper.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tidepool::node::{PrimitiveStateMachine, ProposalContext, QueryContext};
use tidepool::raft::{RaftStateMachine, StreamRegistry};
use tidepool::service::{
    CloseSessionRequest, CloseSessionResponse, KeepAliveRequest, KeepAliveResponse,
    OpenSessionRequest, OpenSessionResponse, PartitionService, ProposalRequest, ProposalResponse,
    QueryRequest, QueryResponse,
};
use tidepool::stream::StreamReader;
use tidepool::{
    ClientConfig, DialOptions, LocalNetwork, MemberId, MemoryEngine, NodeConfig, NodeServer,
    PartitionId, RaftPartition, RaftProtocol, Result, RetryPolicy, RsmError, Term,
};

/// The partition every node hosts.
pub const PARTITION: PartitionId = PartitionId(1);

/// Address a member binds under.
pub fn address(member: u64) -> String {
    format!("node-{}", member)
}

/// Writes understood by [`Counter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CounterCommand {
    /// Add to the value and return the new value.
    Add(i64),
    /// Reject with a conflict.
    Fail,
}

/// Reads understood by [`Counter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CounterQuery {
    /// The current value.
    Get,
    /// Every value the counter took, oldest first, one output each.
    History,
}

/// Encode a command as a proposal payload.
pub fn command(command: CounterCommand) -> Vec<u8> {
    serde_json::to_vec(&command).expect("encode command")
}

/// Encode a query payload.
pub fn query(query: CounterQuery) -> Vec<u8> {
    serde_json::to_vec(&query).expect("encode query")
}

/// Decode a counter output.
pub fn value(output: &[u8]) -> i64 {
    serde_json::from_slice(output).expect("decode value")
}

/// An integer register that counts how often it was actually applied.
#[derive(Debug, Default)]
pub struct Counter {
    pub value: i64,
    pub history: Vec<i64>,
    pub applied: usize,
}

fn encode(value: i64) -> Result<Vec<u8>> {
    serde_json::to_vec(&value).map_err(|err| RsmError::internal(err.to_string()))
}

impl PrimitiveStateMachine for Counter {
    fn propose(&mut self, _: &mut ProposalContext, input: &[u8]) -> Result<Vec<u8>> {
        let command: CounterCommand =
            serde_json::from_slice(input).map_err(|err| RsmError::invalid(err.to_string()))?;
        self.applied += 1;
        match command {
            CounterCommand::Add(delta) => {
                self.value += delta;
                self.history.push(self.value);
                encode(self.value)
            }
            CounterCommand::Fail => Err(RsmError::Conflict("counter refused".to_string())),
        }
    }

    fn query(&self, context: &QueryContext<'_>, input: &[u8]) -> Result<()> {
        let query: CounterQuery =
            serde_json::from_slice(input).map_err(|err| RsmError::invalid(err.to_string()))?;
        match query {
            CounterQuery::Get => {
                let _ = context.emit(encode(self.value)?);
            }
            CounterQuery::History => {
                for value in &self.history {
                    if context.emit(encode(*value)?).is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// One replica and everything it is built from.
pub struct Node {
    pub member: MemberId,
    pub address: String,
    pub registry: Arc<StreamRegistry>,
    pub machine: Arc<RaftStateMachine<Counter>>,
    pub engine: Arc<MemoryEngine>,
    pub partition: Arc<RaftPartition>,
    pub protocol: Arc<RaftProtocol>,
    pub server: Arc<NodeServer>,
}

impl Node {
    /// Build member `member` and bind its server on `network`. The node is
    /// not ready until it learns a leader.
    pub fn start(network: &LocalNetwork, member: u64, config: NodeConfig) -> Self {
        let member = MemberId(member);
        let registry = Arc::new(StreamRegistry::new());
        let machine = Arc::new(RaftStateMachine::new(
            Arc::clone(&registry),
            Counter::default(),
        ));
        let engine = Arc::new(MemoryEngine::new(PARTITION, machine.clone()));
        let partition = Arc::new(RaftPartition::new(
            PARTITION,
            config,
            engine.clone(),
            Arc::clone(&registry),
        ));
        let protocol = Arc::new(RaftProtocol::new());
        protocol.add_partition(Arc::clone(&partition));
        let server = Arc::new(NodeServer::new(protocol.clone()));

        let address = address(member.0);
        network.bind(address.clone(), server.clone());
        Self {
            member,
            address,
            registry,
            machine,
            engine,
            partition,
            protocol,
            server,
        }
    }

    /// Build a node that already leads term 1.
    pub fn leader(network: &LocalNetwork, member: u64) -> Self {
        let node = Self::start(network, member, NodeConfig::for_member(MemberId(member)));
        node.partition.set_leader(Term(1), Some(node.member));
        node
    }

    /// The primitive's current value.
    pub fn value(&self) -> i64 {
        self.machine.with_primitive(|counter| counter.value)
    }

    /// How many proposals reached the primitive.
    pub fn applied(&self) -> usize {
        self.machine.with_primitive(|counter| counter.applied)
    }
}

/// Client configuration with short, deterministic-enough retries.
pub fn client_config() -> ClientConfig {
    ClientConfig::default()
        .with_session_timeout(Duration::from_secs(10))
        .with_dial(DialOptions::default().with_retry(RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }))
}

/// Forwards to an inner service, losing the next `n` proposal responses
/// after the proposal was applied.
pub struct Lossy {
    inner: Arc<dyn PartitionService>,
    drop_responses: AtomicUsize,
    proposals: AtomicUsize,
}

impl Lossy {
    pub fn new(inner: Arc<dyn PartitionService>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            drop_responses: AtomicUsize::new(0),
            proposals: AtomicUsize::new(0),
        })
    }

    pub fn lose_next(&self, n: usize) {
        self.drop_responses.store(n, Ordering::SeqCst);
    }

    pub fn proposals(&self) -> usize {
        self.proposals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PartitionService for Lossy {
    async fn open_session(&self, request: OpenSessionRequest) -> Result<OpenSessionResponse> {
        self.inner.open_session(request).await
    }

    async fn keep_alive(&self, request: KeepAliveRequest) -> Result<KeepAliveResponse> {
        self.inner.keep_alive(request).await
    }

    async fn close_session(&self, request: CloseSessionRequest) -> Result<CloseSessionResponse> {
        self.inner.close_session(request).await
    }

    async fn propose(&self, request: ProposalRequest) -> Result<ProposalResponse> {
        self.proposals.fetch_add(1, Ordering::SeqCst);
        let response = self.inner.propose(request).await?;
        let lose = self
            .drop_responses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lose {
            return Err(RsmError::unavailable("response lost"));
        }
        Ok(response)
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        self.inner.query(request).await
    }

    async fn stream_propose(
        &self,
        request: ProposalRequest,
    ) -> Result<StreamReader<ProposalResponse>> {
        self.inner.stream_propose(request).await
    }

    async fn stream_query(&self, request: QueryRequest) -> Result<StreamReader<QueryResponse>> {
        self.inner.stream_query(request).await
    }
}
