use thiserror::Error;

use crate::node::NodeKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid path: `{0}`")]
    InvalidPath(String),

    #[error("`{path}` is a {found}, expected a {expected}")]
    TypeConflict {
        path: String,
        expected: NodeKind,
        found: NodeKind,
    },

    #[error("path not found: `{0}`")]
    NotFound(String),

    #[error("corrupt diff: {0}")]
    CorruptDiff(String),

    #[error("unsupported brick map version {0}")]
    UnsupportedVersion(u32),

    #[error("failed to (de)serialize brick map")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(path: impl ToString) -> Self {
        Self::NotFound(path.to_string())
    }

    pub(crate) fn type_conflict(path: impl ToString, expected: NodeKind, found: NodeKind) -> Self {
        Self::TypeConflict {
            path: path.to_string(),
            expected,
            found,
        }
    }
}
