//! # Tidepool
//!
//! Session and partition access layer for replicated state machines.
//!
//! Tidepool sits between clients and a replicated log. Clients open a
//! session on each partition and submit proposals (writes) and queries
//! (reads) through it; nodes turn those calls into log entries, apply them
//! through a per-partition session state machine, and route each output back
//! to the caller that issued it. Sessions give every proposal a sequence
//! number so that a retried write is applied at most once and answered from
//! cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ client                                                       │
//! │   ProtocolClient ─> PartitionClient ─> SessionClient         │
//! │                                           │                  │
//! │                   PartitionResolver <─ Channel (retry)       │
//! ├───────────────────────────────────────────┼──────────────────┤
//! │ network: PartitionService over LocalNetwork                  │
//! ├───────────────────────────────────────────┼──────────────────┤
//! │ node                                      v                  │
//! │   NodeServer ─> Handler ─> Protocol ─> Partition (Executor)  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ raft                                                         │
//! │   RaftPartition ─> StreamRegistry + ConsensusEngine          │
//! │   RaftStateMachine ─> SessionStateMachine ─> primitive       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`client`] | Client stack: protocol, partition, session, channel, resolver |
//! | [`node`] | Server stack: handler, protocol lookup, session state machine |
//! | [`raft`] | Consensus-backed partitions, stream registry, in-memory engine |
//! | [`service`] | The `PartitionService` RPC surface |
//! | [`network`] | Address-to-service connectivity |
//! | [`types`] | Identifiers, headers, log envelopes |
//! | [`error`] | The error taxonomy and wire status codes |
//! | [`stream`] | Out-of-band result streams |
//! | [`codec`] | Payload encoding |
//! | [`config`] | Client, node and membership configuration |
//! | [`logging`] | Tracing setup |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod node;
pub mod raft;
pub mod service;
pub mod stream;
pub mod types;

pub use client::{PartitionClient, ProtocolClient, SessionClient};
pub use config::{ClientConfig, DialOptions, NodeConfig, PartitionConfig, ProtocolConfig, RetryPolicy};
pub use error::{Result, RsmError};
pub use network::{LocalNetwork, Network};
pub use node::NodeServer;
pub use raft::{MemoryEngine, RaftPartition, RaftProtocol};
pub use types::{MemberId, PartitionId, ReadConsistency, SessionId, Status, Term};
