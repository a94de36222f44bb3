//! Dialing partition members by address.
//!
//! The client channel never builds connections itself; it asks a [`Network`]
//! to turn an address into a [`PartitionService`] handle. [`LocalNetwork`] is
//! the in-process implementation: nodes `bind` their server under an address
//! and clients dial it directly. Unbinding an address makes it unreachable,
//! which is how tests model a crashed member.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, RsmError};
use crate::service::PartitionService;

/// Turns member addresses into service handles.
#[async_trait]
pub trait Network: Send + Sync {
    /// Dial `address`.
    ///
    /// # Errors
    ///
    /// [`RsmError::Unavailable`] when nothing is reachable at `address`.
    async fn connect(&self, address: &str) -> Result<Arc<dyn PartitionService>>;
}

/// In-process network keyed by address.
#[derive(Default, Clone)]
pub struct LocalNetwork {
    services: Arc<RwLock<HashMap<String, Arc<dyn PartitionService>>>>,
}

impl LocalNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `service` reachable at `address`, replacing any previous binding.
    pub fn bind(&self, address: impl Into<String>, service: Arc<dyn PartitionService>) {
        let address = address.into();
        debug!(address = %address, "binding service");
        self.services.write().insert(address, service);
    }

    /// Make `address` unreachable.
    pub fn unbind(&self, address: &str) {
        debug!(address = %address, "unbinding service");
        self.services.write().remove(address);
    }

    /// Addresses currently bound.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.services.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("addresses", &self.addresses())
            .finish()
    }
}

#[async_trait]
impl Network for LocalNetwork {
    async fn connect(&self, address: &str) -> Result<Arc<dyn PartitionService>> {
        self.services
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| RsmError::unavailable(format!("no route to {}", address)))
    }
}
