//! Client side of the access layer.
//!
//! ```text
//!  ProtocolClient ──> PartitionClient ──> SessionClient ──> Channel ──> Network
//!   (all partitions)   (one partition,     (session id,      (resolver routing,
//!                       single-flight       sequence nums,    retry on
//!                       session)            keepalive)        Unavailable)
//! ```

pub mod channel;
pub mod partition;
pub mod protocol;
pub mod resolver;
pub mod session;

pub use channel::Channel;
pub use partition::PartitionClient;
pub use protocol::{hash_key, ProtocolClient};
pub use resolver::{parse_target, target_for, PartitionResolver, ResolvedState, RESOLVER_SCHEME};
pub use session::SessionClient;
