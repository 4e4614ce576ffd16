//! Contracts for the collaborators a brick map relies on, plus in-memory and
//! filesystem implementations.
//!
//! [`BrickStorage`] stores immutable bricks and hands back references to
//! them. [`AnchoringBackend`] keeps one append-only chain of signed versions
//! per anchor id and refuses appends whose previous pointer is stale.

pub mod anchoring;
pub mod brick;
pub mod error;
pub mod fs;
pub mod memory;

#[cfg(test)]
mod tests;

pub use anchoring::AnchoringBackend;
pub use brick::{brick_ref, verify, verify_link, BrickStorage};
pub use error::{AnchoringError, StorageError};
pub use fs::FsBrickStorage;
pub use memory::{MemoryAnchoringBackend, MemoryBrickStorage};
