use bricks_primitives::{AnchorId, HashLink};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("brick `{0}` not found")]
    NotFound(HashLink),

    #[error("brick `{0}` does not match its checksum, the brick store may be corrupt")]
    ChecksumMismatch(HashLink),

    #[error(transparent)]
    Io(eyre::Report),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnchoringError {
    #[error("stale version: expected previous {expected:?}, backend has {actual:?}")]
    StaleVersion {
        expected: Option<HashLink>,
        actual: Option<HashLink>,
    },

    #[error("anchor `{0}` already exists")]
    AlreadyExists(AnchorId),

    #[error("anchor `{0}` not found")]
    NotFound(AnchorId),

    #[error("value appended to anchor `{0}` is not signed by its owner")]
    InvalidSignature(AnchorId),

    #[error(transparent)]
    Backend(eyre::Report),
}

impl AnchoringError {
    /// Whether the append was refused only because the caller's view of the
    /// chain is out of date.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleVersion { .. })
    }
}
