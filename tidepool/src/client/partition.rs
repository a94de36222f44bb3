//! Client handle for one partition.
//!
//! A [`PartitionClient`] owns the partition's channel and at most one
//! session. Sessions are opened lazily by [`get_session`] with single-flight
//! semantics:
//!
//! ```text
//!  get_session() ──read lock──> Some(session)? ──> return it          (fast path)
//!        │
//!        └─ None ──> creation lock ──> re-check ──> open ──> publish ──> return
//! ```
//!
//! The slot only ever holds a fully opened session, so the fast path never
//! observes one under construction. Concurrent callers queue on the creation
//! lock and find the published session on re-check.
//!
//! [`get_session`]: PartitionClient::get_session

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::client::channel::Channel;
use crate::client::resolver::PartitionResolver;
use crate::client::session::SessionClient;
use crate::config::{ClientConfig, PartitionConfig};
use crate::error::{Result, RsmError};
use crate::network::Network;
use crate::types::PartitionId;

/// Client handle for one partition.
pub struct PartitionClient {
    id: PartitionId,
    network: Arc<dyn Network>,
    config: ClientConfig,
    channel: RwLock<Option<Arc<Channel>>>,
    session: RwLock<Option<Arc<SessionClient>>>,
    creating: tokio::sync::Mutex<()>,
}

impl PartitionClient {
    /// A disconnected client for partition `id`.
    pub fn new(id: PartitionId, network: Arc<dyn Network>, config: ClientConfig) -> Self {
        Self {
            id,
            network,
            config,
            channel: RwLock::new(None),
            session: RwLock::new(None),
            creating: tokio::sync::Mutex::new(()),
        }
    }

    /// The partition served.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Whether [`connect`](Self::connect) succeeded.
    pub fn is_connected(&self) -> bool {
        self.channel.read().is_some()
    }

    /// The resolver of the current connection.
    pub fn resolver(&self) -> Option<Arc<PartitionResolver>> {
        self.channel
            .read()
            .as_ref()
            .map(|channel| Arc::clone(channel.resolver()))
    }

    fn connected_channel(&self) -> Result<Arc<Channel>> {
        self.channel
            .read()
            .clone()
            .ok_or_else(|| RsmError::unavailable("not connected"))
    }

    /// Establish the channel to the partition's members.
    ///
    /// Connecting twice is a no-op: lost connections are re-dialed by the
    /// channel on demand.
    ///
    /// # Errors
    ///
    /// [`RsmError::Invalid`] if `config` describes another partition.
    pub async fn connect(&self, config: &PartitionConfig) -> Result<()> {
        if config.partition_id != self.id {
            return Err(RsmError::invalid(format!(
                "cannot connect {} with configuration of {}",
                self.id, config.partition_id
            )));
        }
        let mut slot = self.channel.write();
        if slot.is_some() {
            debug!(partition = %self.id, "already connected");
            return Ok(());
        }
        let resolver = Arc::new(PartitionResolver::new(config));
        info!(
            partition = %self.id,
            target = %resolver.target(),
            members = config.members.len(),
            "connecting partition"
        );
        *slot = Some(Arc::new(Channel::new(
            Arc::clone(&self.network),
            resolver,
            self.config.dial.clone(),
        )));
        Ok(())
    }

    /// Push new membership to the resolver. The channel stays up.
    ///
    /// # Errors
    ///
    /// [`RsmError::Unavailable`] if never connected, [`RsmError::Invalid`]
    /// if `config` describes another partition.
    pub async fn configure(&self, config: &PartitionConfig) -> Result<()> {
        let channel = self.connected_channel()?;
        channel.resolver().update(config)
    }

    /// The partition's session, opening it on first use.
    ///
    /// # Errors
    ///
    /// [`RsmError::Unavailable`] if not connected or no member answers, or
    /// the error the partition returned for the open call.
    pub async fn get_session(&self) -> Result<Arc<SessionClient>> {
        let existing = self.session.read().clone();
        if let Some(session) = existing {
            return Ok(session);
        }

        let _creating = self.creating.lock().await;
        let existing = self.session.read().clone();
        if let Some(session) = existing {
            return Ok(session);
        }

        let channel = self.connected_channel()?;
        let session = SessionClient::open(channel, self.id, &self.config).await?;
        *self.session.write() = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Close the active session, if any.
    ///
    /// Waits for a session being opened and closes it too. The next
    /// [`get_session`](Self::get_session) opens a fresh one.
    ///
    /// # Errors
    ///
    /// The failure of the session's close call.
    pub async fn close(&self) -> Result<()> {
        let _creating = self.creating.lock().await;
        let session = self.session.write().take();
        match session {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for PartitionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionClient")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .field("session", &self.session.read().as_ref().map(|s| s.session_id()))
            .finish()
    }
}
