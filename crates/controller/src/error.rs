use bricks_primitives::AnchorId;
use bricks_store::{AnchoringError, StorageError};
use thiserror::Error;

use crate::conflict::ConflictError;
use crate::validator::WriteOp;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Map(#[from] bricks_map::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Anchoring(#[from] AnchoringError),

    #[error("`{op}` on `{path}` rejected: {reason}")]
    ValidationFailed {
        op: WriteOp,
        path: String,
        reason: eyre::Report,
    },

    #[error("nothing has been anchored under `{0}`")]
    NotAnchored(AnchorId),

    #[error("operation already in progress")]
    AlreadyInProgress,

    #[error("failed to persist brick map")]
    PersistBrickMap(#[source] Box<Error>),

    #[error("failed to anchor new version")]
    AnchorVersion(#[source] AnchoringError),

    #[error("new version was anchored but the local state could not follow: {0}")]
    BrickMapUpdate(String),

    #[error(transparent)]
    Conflict(Box<ConflictError>),
}

impl Error {
    /// Stable status code of the anchoring failures callers may branch on.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::PersistBrickMap(_) => Some("PERSIST_BRICKMAP_ERR"),
            Self::AnchorVersion(_) => Some("ANCHOR_VERSION_ERR"),
            Self::BrickMapUpdate(_) => Some("BRICKMAP_UPDATE_ERR"),
            Self::Conflict(_) => Some("ANCHORING_CONFLICT_ERR"),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<ConflictError> for Error {
    fn from(conflict: ConflictError) -> Self {
        Self::Conflict(Box::new(conflict))
    }
}
