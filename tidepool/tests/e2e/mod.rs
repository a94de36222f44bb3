//! Shared fixtures for the end-to-end tests.
//!
//! A [`Node`] is one replica hosting partition [`PARTITION`] with a
//! [`Counter`] primitive on top of its own [`MemoryEngine`]. Nodes do not
//! replicate to each other; multi-node tests only exercise routing.

pub mod fixtures;
pub mod tests;

pub use fixtures::*;
