//! File-level access to an archive kept as a brick map.
//!
//! An [`Archive`] splits file content into bricks, records them in the brick
//! map through a [`bricks_controller::BrickMapController`], and streams them
//! back on read. Paths under a mount point are served by the mounted
//! archive, and batches hold back anchoring until they are committed.

pub mod archive;
pub mod error;
pub mod mount;

#[cfg(test)]
mod tests;

pub use archive::{Archive, ArchiveBuilder, ContentStream};
pub use error::{Error, Result};
pub use mount::{Manifest, Mount, MountTable};
