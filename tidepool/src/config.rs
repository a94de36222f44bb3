//! Configuration for clients, channels and nodes.
//!
//! Every structure has sensible defaults, `with_*` setters, and can be loaded
//! from JSON (missing fields fall back to their defaults):
//!
//! ```rust
//! use std::time::Duration;
//! use tidepool::config::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "session_timeout": { "secs": 10, "nanos": 0 } }"#)
//!     .unwrap();
//! assert_eq!(config.session_timeout, Duration::from_secs(10));
//! assert_eq!(config.dial.max_recv_message_size, 20 * 1024 * 1024);
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RsmError};
use crate::types::{MemberId, PartitionId};

/// Default cap on inbound message size: 20 MiB.
pub const DEFAULT_MAX_RECV_MESSAGE_SIZE: usize = 20 * 1024 * 1024;

/// Default timeout for proposals and linearizable reads on a node.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default session timeout requested by clients.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| RsmError::invalid(format!("invalid config: {}", e)))
}

/// Membership of one partition as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// The partition described.
    pub partition_id: PartitionId,
    /// Address of the current leader, when known.
    pub leader: Option<String>,
    /// Addresses of every member (the leader may or may not be repeated here).
    pub members: Vec<String>,
}

impl PartitionConfig {
    /// Configuration for `partition_id` with the given members and no known leader.
    pub fn new(partition_id: PartitionId, members: Vec<String>) -> Self {
        Self {
            partition_id,
            leader: None,
            members,
        }
    }

    /// Set the leader address.
    pub fn with_leader(mut self, leader: impl Into<String>) -> Self {
        self.leader = Some(leader.into());
        self
    }
}

/// Membership of every partition of a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// One entry per partition.
    pub partitions: Vec<PartitionConfig>,
}

impl ProtocolConfig {
    /// Load from JSON.
    ///
    /// # Errors
    ///
    /// [`RsmError::Invalid`] when the document does not parse.
    pub fn from_json(json: &str) -> Result<Self> {
        from_json(json)
    }
}

/// Retry behavior of the channel's interceptor.
///
/// Only `Unavailable` failures are retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the exponentially growing delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Dial policy applied to every partition connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialOptions {
    /// Largest inbound payload accepted, in bytes.
    pub max_recv_message_size: usize,
    /// Retry policy for unary and streaming calls.
    pub retry: RetryPolicy,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            max_recv_message_size: DEFAULT_MAX_RECV_MESSAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl DialOptions {
    /// Override the inbound size cap.
    pub fn with_max_recv_message_size(mut self, size: usize) -> Self {
        self.max_recv_message_size = size;
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Client-side configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout requested when opening sessions.
    pub session_timeout: Duration,
    /// Keepalive period as a fraction of `session_timeout`.
    pub keep_alive_ratio: f64,
    /// Dial policy.
    pub dial: DialOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            keep_alive_ratio: 0.5,
            dial: DialOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Load from JSON.
    ///
    /// # Errors
    ///
    /// [`RsmError::Invalid`] when the document does not parse.
    pub fn from_json(json: &str) -> Result<Self> {
        from_json(json)
    }

    /// Override the session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Override the dial policy.
    pub fn with_dial(mut self, dial: DialOptions) -> Self {
        self.dial = dial;
        self
    }

    /// Interval between keepalives.
    pub fn keep_alive_interval(&self) -> Duration {
        let ratio = if self.keep_alive_ratio > 0.0 && self.keep_alive_ratio < 1.0 {
            self.keep_alive_ratio
        } else {
            0.5
        };
        self.session_timeout.mul_f64(ratio)
    }
}

/// Node-side configuration for one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This replica's member id.
    pub member_id: MemberId,
    /// Bound on `sync_propose`.
    pub propose_timeout: Duration,
    /// Bound on linearizable reads.
    pub read_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            member_id: MemberId(1),
            propose_timeout: DEFAULT_CLIENT_TIMEOUT,
            read_timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }
}

impl NodeConfig {
    /// Configuration for `member_id` with default timeouts.
    pub fn for_member(member_id: MemberId) -> Self {
        Self {
            member_id,
            ..Self::default()
        }
    }

    /// Load from JSON.
    ///
    /// # Errors
    ///
    /// [`RsmError::Invalid`] when the document does not parse.
    pub fn from_json(json: &str) -> Result<Self> {
        from_json(json)
    }

    /// Override the proposal timeout.
    pub fn with_propose_timeout(mut self, timeout: Duration) -> Self {
        self.propose_timeout = timeout;
        self
    }

    /// Override the linearizable read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}
