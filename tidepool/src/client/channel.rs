//! Resolver-routed channel to one partition.
//!
//! A [`Channel`] is what the session layer talks to. It implements
//! [`PartitionService`] itself, so sessions never see addresses:
//!
//! ```text
//!  SessionClient ──> Channel ──pick()──> PartitionResolver
//!                      │
//!                      ├── dial (cached per address) ──> Network ──> member
//!                      │
//!                      └── Unavailable? report, drop connection, backoff, retry
//! ```
//!
//! The channel watches the resolver. When a new configuration is published,
//! cached connections to addresses that left the partition are dropped before
//! the next attempt.
//!
//! # Retry interceptor
//!
//! Every unary call, and the establishment of every streaming call, runs
//! through the same loop: up to [`RetryPolicy::max_attempts`] attempts, only
//! [`RsmError::Unavailable`] is retried, delays grow exponentially with a
//! small random jitter. Once a stream is established, items are forwarded
//! as-is and never retried.
//!
//! # Size cap
//!
//! Responses whose payload exceeds [`DialOptions::max_recv_message_size`] are
//! rejected with [`RsmError::Invalid`]. Oversize is not retried.
//!
//! [`RetryPolicy::max_attempts`]: crate::config::RetryPolicy::max_attempts

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::resolver::{PartitionResolver, ResolvedState};
use crate::config::DialOptions;
use crate::error::{Result, RsmError};
use crate::network::Network;
use crate::service::{
    CloseSessionRequest, CloseSessionResponse, KeepAliveRequest, KeepAliveResponse,
    OpenSessionRequest, OpenSessionResponse, PartitionService, ProposalRequest, ProposalResponse,
    QueryRequest, QueryResponse,
};
use crate::stream::{buffered_stream, StreamReader, WriteStream};

/// Responses carrying a primitive payload subject to the size cap.
trait Payload {
    fn payload_len(&self) -> usize;
}

impl Payload for ProposalResponse {
    fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

impl Payload for QueryResponse {
    fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Add up to a quarter of `delay` as random jitter.
fn jittered(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    let jitter = rand::thread_rng().gen_range(0..=millis / 4);
    delay + Duration::from_millis(jitter)
}

/// Connection to one partition, routed through its resolver.
pub struct Channel {
    network: Arc<dyn Network>,
    resolver: Arc<PartitionResolver>,
    options: DialOptions,
    updates: Mutex<watch::Receiver<Arc<ResolvedState>>>,
    connections: Mutex<HashMap<String, Arc<dyn PartitionService>>>,
}

impl Channel {
    /// Build a channel. Nothing is dialed until the first call.
    pub fn new(
        network: Arc<dyn Network>,
        resolver: Arc<PartitionResolver>,
        options: DialOptions,
    ) -> Self {
        let updates = Mutex::new(resolver.subscribe());
        Self {
            network,
            resolver,
            options,
            updates,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// The resolver this channel routes through.
    pub fn resolver(&self) -> &Arc<PartitionResolver> {
        &self.resolver
    }

    /// Dial policy in effect.
    pub fn options(&self) -> &DialOptions {
        &self.options
    }

    /// Drop every cached connection.
    pub fn disconnect(&self) {
        self.connections.lock().clear();
    }

    /// The resolver's current snapshot, pruning connections to addresses
    /// that are no longer members if it changed since the last call.
    fn refresh(&self) -> Arc<ResolvedState> {
        let mut updates = self.updates.lock();
        if !updates.has_changed().unwrap_or(false) {
            return Arc::clone(&updates.borrow());
        }
        let state = Arc::clone(&updates.borrow_and_update());
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|address, _| state.addresses.contains(address));
        if connections.len() < before {
            debug!(
                partition = %state.partition_id,
                version = state.version,
                pruned = before - connections.len(),
                "dropped connections to departed members"
            );
        }
        state
    }

    async fn dial(&self, address: &str) -> Result<Arc<dyn PartitionService>> {
        let cached = self.connections.lock().get(address).cloned();
        if let Some(service) = cached {
            return Ok(service);
        }
        debug!(address = %address, target = %self.resolver.target(), "dialing member");
        let service = self.network.connect(address).await?;
        self.connections
            .lock()
            .insert(address.to_string(), Arc::clone(&service));
        Ok(service)
    }

    fn check_size<R: Payload>(&self, response: &R) -> Result<()> {
        let len = response.payload_len();
        if len > self.options.max_recv_message_size {
            return Err(RsmError::invalid(format!(
                "received message larger than max ({} vs. {})",
                len, self.options.max_recv_message_size
            )));
        }
        Ok(())
    }

    /// Run `call` against the current pick, retrying `Unavailable` failures.
    async fn invoke<R, F, Fut>(&self, method: &'static str, call: F) -> Result<R>
    where
        F: Fn(Arc<dyn PartitionService>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let policy = &self.options.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.attempt(&call).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= max_attempts {
                warn!(
                    method = method,
                    partition = %self.resolver.partition_id(),
                    attempt = attempt,
                    error = %err,
                    "call failed"
                );
                return Err(err);
            }
            let delay = jittered(policy.backoff(attempt));
            debug!(
                method = method,
                partition = %self.resolver.partition_id(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying unavailable call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt<R, F, Fut>(&self, call: &F) -> Result<R>
    where
        F: Fn(Arc<dyn PartitionService>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let state = self.refresh();
        let address = self.resolver.pick(&state).ok_or_else(|| {
            RsmError::unavailable(format!("no members for {}", state.partition_id))
        })?;
        let result = match self.dial(&address).await {
            Ok(service) => call(service).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            if err.is_retryable() {
                self.connections.lock().remove(&address);
                self.resolver.report_unavailable(&address);
            }
        }
        result
    }

    /// Forward an established stream, enforcing the size cap per item.
    fn capped<R: Payload + Send + 'static>(&self, mut inner: StreamReader<R>) -> StreamReader<R> {
        let (writer, reader) = buffered_stream();
        let max = self.options.max_recv_message_size;
        tokio::spawn(async move {
            while let Some(item) = inner.receive().await {
                match item {
                    Ok(response) if response.payload_len() > max => {
                        writer.error(RsmError::invalid(format!(
                            "received message larger than max ({} vs. {})",
                            response.payload_len(),
                            max
                        )));
                        return;
                    }
                    Ok(response) => {
                        if writer.value(response).is_err() {
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
        reader
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("target", &self.resolver.target())
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl PartitionService for Channel {
    async fn open_session(&self, request: OpenSessionRequest) -> Result<OpenSessionResponse> {
        self.invoke("open_session", |service| {
            let request = request.clone();
            async move { service.open_session(request).await }
        })
        .await
    }

    async fn keep_alive(&self, request: KeepAliveRequest) -> Result<KeepAliveResponse> {
        self.invoke("keep_alive", |service| {
            let request = request.clone();
            async move { service.keep_alive(request).await }
        })
        .await
    }

    async fn close_session(&self, request: CloseSessionRequest) -> Result<CloseSessionResponse> {
        self.invoke("close_session", |service| {
            let request = request.clone();
            async move { service.close_session(request).await }
        })
        .await
    }

    async fn propose(&self, request: ProposalRequest) -> Result<ProposalResponse> {
        let response = self
            .invoke("propose", |service| {
                let request = request.clone();
                async move { service.propose(request).await }
            })
            .await?;
        self.check_size(&response)?;
        Ok(response)
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let response = self
            .invoke("query", |service| {
                let request = request.clone();
                async move { service.query(request).await }
            })
            .await?;
        self.check_size(&response)?;
        Ok(response)
    }

    async fn stream_propose(
        &self,
        request: ProposalRequest,
    ) -> Result<StreamReader<ProposalResponse>> {
        let inner = self
            .invoke("stream_propose", |service| {
                let request = request.clone();
                async move { service.stream_propose(request).await }
            })
            .await?;
        Ok(self.capped(inner))
    }

    async fn stream_query(&self, request: QueryRequest) -> Result<StreamReader<QueryResponse>> {
        let inner = self
            .invoke("stream_query", |service| {
                let request = request.clone();
                async move { service.stream_query(request).await }
            })
            .await?;
        Ok(self.capped(inner))
    }
}
