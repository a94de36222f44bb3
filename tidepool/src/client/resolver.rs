//! Partition resolver: the current member addresses of one partition.
//!
//! The resolver is the channel's only source of topology. It holds an
//! immutable [`ResolvedState`] snapshot published through a
//! `tokio::sync::watch` channel:
//!
//! ```text
//!  configure(config) ──> PartitionResolver ──watch──> Channel
//!                          │  Arc<ResolvedState>       │ pick() per call
//!                          │  cursor                   │ report_unavailable()
//!                                                      │ prune departed members
//! ```
//!
//! Updates swap the whole snapshot. A call that already took a snapshot keeps
//! using it, so reconfiguration never drops in-flight calls.
//!
//! # Picking
//!
//! Addresses are ordered leader first. A cursor selects the address to use
//! and advances when that address reports `Unavailable` (for instance "not
//! the leader"), so retries walk the member list until the leader is found.
//! A new configuration resets the cursor to the configured leader.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::PartitionConfig;
use crate::error::{Result, RsmError};
use crate::types::PartitionId;

/// URI scheme of partition dial targets: `rsm:///<partition-id>`.
pub const RESOLVER_SCHEME: &str = "rsm";

/// Immutable view of a partition's reachable members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedState {
    /// Resolved partition.
    pub partition_id: PartitionId,
    /// Leader address, when known.
    pub leader: Option<String>,
    /// Every member address, leader first, without duplicates.
    pub addresses: Vec<String>,
    /// Bumped on every update.
    pub version: u64,
}

impl ResolvedState {
    fn from_config(config: &PartitionConfig, version: u64) -> Self {
        let mut addresses: Vec<String> = Vec::with_capacity(config.members.len() + 1);
        if let Some(leader) = &config.leader {
            addresses.push(leader.clone());
        }
        for member in &config.members {
            if !addresses.contains(member) {
                addresses.push(member.clone());
            }
        }
        Self {
            partition_id: config.partition_id,
            leader: config.leader.clone(),
            addresses,
            version,
        }
    }
}

/// Render the dial target of a partition.
pub fn target_for(partition_id: PartitionId) -> String {
    format!("{}:///{}", RESOLVER_SCHEME, partition_id.0)
}

/// Parse a dial target produced by [`target_for`].
///
/// # Errors
///
/// [`RsmError::Invalid`] for any other scheme or a non-numeric id.
pub fn parse_target(target: &str) -> Result<PartitionId> {
    let prefix = format!("{}:///", RESOLVER_SCHEME);
    let id = target
        .strip_prefix(&prefix)
        .ok_or_else(|| RsmError::invalid(format!("unsupported target {}", target)))?;
    id.parse::<u32>()
        .map(PartitionId)
        .map_err(|e| RsmError::invalid(format!("bad partition id in {}: {}", target, e)))
}

/// Resolver for one partition.
#[derive(Debug)]
pub struct PartitionResolver {
    partition_id: PartitionId,
    state: watch::Sender<Arc<ResolvedState>>,
    cursor: AtomicUsize,
}

impl PartitionResolver {
    /// Build a resolver from the initial partition configuration.
    pub fn new(config: &PartitionConfig) -> Self {
        let (state, _) = watch::channel(Arc::new(ResolvedState::from_config(config, 0)));
        Self {
            partition_id: config.partition_id,
            state,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The resolved partition.
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// The dial target, encoding the partition id.
    pub fn target(&self) -> String {
        target_for(self.partition_id)
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<ResolvedState> {
        Arc::clone(&self.state.borrow())
    }

    /// Watch snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ResolvedState>> {
        self.state.subscribe()
    }

    /// Replace the address set.
    ///
    /// # Errors
    ///
    /// [`RsmError::Invalid`] if `config` describes another partition.
    pub fn update(&self, config: &PartitionConfig) -> Result<()> {
        if config.partition_id != self.partition_id {
            return Err(RsmError::invalid(format!(
                "resolver for {} cannot accept configuration of {}",
                self.partition_id, config.partition_id
            )));
        }
        let version = self.state.borrow().version + 1;
        let next = Arc::new(ResolvedState::from_config(config, version));
        info!(
            partition = %self.partition_id,
            leader = ?next.leader,
            members = next.addresses.len(),
            version = version,
            "partition configuration updated"
        );
        self.cursor.store(0, Ordering::Release);
        self.state.send_replace(next);
        Ok(())
    }

    /// The address the next call should use, from `state`.
    pub fn pick(&self, state: &ResolvedState) -> Option<String> {
        if state.addresses.is_empty() {
            return None;
        }
        let index = self.cursor.load(Ordering::Acquire) % state.addresses.len();
        Some(state.addresses[index].clone())
    }

    /// Move past `address` after it failed with `Unavailable`.
    ///
    /// Only advances if `address` is still the current pick, so concurrent
    /// failures on the same member advance the cursor once.
    pub fn report_unavailable(&self, address: &str) {
        let state = self.state();
        if state.addresses.is_empty() {
            return;
        }
        let current = self.cursor.load(Ordering::Acquire);
        if state.addresses[current % state.addresses.len()] == address
            && self
                .cursor
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            debug!(
                partition = %self.partition_id,
                address = %address,
                "member unavailable, advancing"
            );
        }
    }
}
