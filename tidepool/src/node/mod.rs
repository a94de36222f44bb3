//! Node side of the access layer.
//!
//! ```text
//!  PartitionService ──> NodeServer ──> Handler<I, O> ──> Protocol ──> Partition
//!                                       (codec)           (lookup)      │
//!                                                                       v
//!                                         SessionStateMachine <── Executor
//!                                         (applied by the engine)
//! ```

pub mod executor;
pub mod handler;
pub mod partition;
pub mod protocol;
pub mod server;
pub mod state_machine;

pub use executor::Executor;
pub use handler::{timestamp, Handler, StreamResponse};
pub use partition::Partition;
pub use protocol::Protocol;
pub use server::NodeServer;
pub use state_machine::{
    OutputStream, PrimitiveStateMachine, ProposalContext, QueryContext, SessionStateMachine,
};
