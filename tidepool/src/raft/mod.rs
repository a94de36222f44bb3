//! Consensus-backed node side.
//!
//! ```text
//!  NodeServer ──> RaftProtocol ──> RaftPartition ──┬──> StreamRegistry  (term, seq) -> caller stream
//!                                                  └──> ConsensusEngine ──> RaftStateMachine
//!                                                                             │ prune older terms
//!                                                                             │ take registration
//!                                                                             └──> SessionStateMachine
//! ```
//!
//! A proposal is registered before it is submitted. Every replica applies the
//! entry; only the replica holding the registration (the one that received
//! the call) delivers the output.

pub mod engine;
pub mod memory;
pub mod partition;
pub mod protocol;
pub mod registry;
pub mod state_machine;

pub use engine::{
    wrap_error, ConsensusEngine, EngineError, EngineSession, LeaderUpdate, PartitionQuery,
};
pub use memory::{MemoryEngine, ReadPath};
pub use partition::RaftPartition;
pub use protocol::RaftProtocol;
pub use registry::{Registration, StreamRegistry};
pub use state_machine::{RaftStateMachine, ReplicatedStateMachine};
