//! Client for every partition of one store.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::client::partition::PartitionClient;
use crate::config::{ClientConfig, ProtocolConfig};
use crate::error::{Result, RsmError};
use crate::network::Network;
use crate::types::PartitionId;

/// Hash used to route keys to partitions.
///
/// XXH3 with the default seed; the routing of a key never changes across
/// builds or processes.
pub fn hash_key(key: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(key)
}

/// Owns one [`PartitionClient`] per configured partition.
pub struct ProtocolClient {
    network: Arc<dyn Network>,
    config: ClientConfig,
    partitions: RwLock<BTreeMap<PartitionId, Arc<PartitionClient>>>,
}

impl ProtocolClient {
    /// A client with no partitions yet.
    pub fn new(network: Arc<dyn Network>, config: ClientConfig) -> Self {
        Self {
            network,
            config,
            partitions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create and connect a client for every configured partition.
    ///
    /// Partitions already known are left connected.
    ///
    /// # Errors
    ///
    /// The first partition that fails to connect.
    pub async fn connect(&self, config: &ProtocolConfig) -> Result<()> {
        for partition in &config.partitions {
            let client = Arc::clone(
                self.partitions
                    .write()
                    .entry(partition.partition_id)
                    .or_insert_with(|| {
                        Arc::new(PartitionClient::new(
                            partition.partition_id,
                            Arc::clone(&self.network),
                            self.config.clone(),
                        ))
                    }),
            );
            client.connect(partition).await?;
        }
        info!(partitions = config.partitions.len(), "protocol connected");
        Ok(())
    }

    /// Every partition, ordered by id.
    pub fn partitions(&self) -> Vec<Arc<PartitionClient>> {
        self.partitions.read().values().cloned().collect()
    }

    /// The partition with the given id.
    ///
    /// # Errors
    ///
    /// [`RsmError::NotFound`] for an unknown id.
    pub fn partition(&self, id: PartitionId) -> Result<Arc<PartitionClient>> {
        self.partitions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RsmError::not_found(format!("{} not found", id)))
    }

    /// The partition owning `key`.
    ///
    /// # Errors
    ///
    /// [`RsmError::Unavailable`] when no partition is configured.
    pub fn partition_by(&self, key: &[u8]) -> Result<Arc<PartitionClient>> {
        let partitions = self.partitions.read();
        if partitions.is_empty() {
            return Err(RsmError::unavailable("no partitions configured"));
        }
        let index = (hash_key(key) % partitions.len() as u64) as usize;
        partitions
            .values()
            .nth(index)
            .cloned()
            .ok_or_else(|| RsmError::internal("partition index out of range"))
    }

    /// Forward new membership to every configured partition.
    ///
    /// # Errors
    ///
    /// [`RsmError::NotFound`] for a partition that was never connected, or
    /// the partition's own configure failure.
    pub async fn configure(&self, config: &ProtocolConfig) -> Result<()> {
        for partition in &config.partitions {
            self.partition(partition.partition_id)?
                .configure(partition)
                .await?;
        }
        Ok(())
    }

    /// Close every partition's session.
    ///
    /// Every partition is closed even if one fails; the first failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// The first close failure.
    pub async fn close(&self) -> Result<()> {
        let mut first = None;
        for partition in self.partitions() {
            if let Err(err) = partition.close().await {
                warn!(partition = %partition.id(), error = %err, "failed to close partition");
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("partitions", &self.partitions.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
