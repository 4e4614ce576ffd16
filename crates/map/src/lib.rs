//! Versioned brick map trees.
//!
//! A [`BrickMap`] is one snapshot of an archive's file tree: directories,
//! files made of brick references, and small files embedded inline. A
//! [`BrickMapDiff`] records the operations applied since the last anchored
//! version so they can be replayed deterministically onto another map.
//!
//! Both implement [`TreeMutator`], which is how writers apply the same
//! logical mutation to the working map and to the pending diff.

pub mod diff;
pub mod error;
pub mod map;
pub mod mutator;
pub mod node;
pub mod path;
pub mod record;
pub mod walk;

mod compare;
mod serde_base64;


pub use diff::{BrickMapDiff, OpData, OpKind, Operation};
pub use error::{Error, Result};
pub use map::{BrickMap, MapMetadata, Stat};
pub use mutator::TreeMutator;
pub use node::{Directory, EmbeddedFile, File, Metadata, Node, NodeKind, Timestamp};
pub use path::TreePath;
pub use record::BrickMapRecord;
pub use walk::{Walk, WalkMode};

/// Serialization format version written into every brick map record.
pub const BRICK_MAP_VERSION: u32 = 1;

/// Top-level entry holding the append-only metadata log. It is never part
/// of a version diff.
pub const METADATA_LOG_PATH: &str = "dsu-metadata-log";
