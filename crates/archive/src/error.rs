use bricks_store::StorageError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Controller(#[from] bricks_controller::Error),

    #[error(transparent)]
    Map(#[from] bricks_map::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("no batch has been started")]
    BatchNotStarted,

    #[error("a batch is already in progress")]
    BatchInProgress,

    #[error("`{src}` and `{dst}` live in different archives")]
    CrossArchive { src: String, dst: String },
}

impl Error {
    /// Stable status code of anchoring failures, wherever they surfaced.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::Controller(err) => err.code(),
            _ => None,
        }
    }
}
