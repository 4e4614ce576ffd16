use std::fmt;

use bricks_map::{BrickMap, TreePath};

/// The write operations a controller exposes, as named to validators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum WriteOp {
    AddFile,
    AppendToFile,
    Truncate,
    Delete,
    Rename,
    Clone,
    CreateFolder,
    CreateFile,
    Embed,
    AppendToEmbed,
    ReplaceFirstBrick,
    UpdateBigFileLastBrick,
    AppendBigFile,
}

impl WriteOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddFile => "addFile",
            Self::AppendToFile => "appendToFile",
            Self::Truncate => "truncate",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::Clone => "clone",
            Self::CreateFolder => "createFolder",
            Self::CreateFile => "createFile",
            Self::Embed => "embed",
            Self::AppendToEmbed => "appendToEmbed",
            Self::ReplaceFirstBrick => "replaceFirstBrick",
            Self::UpdateBigFileLastBrick => "updateBigFileLastBrick",
            Self::AppendBigFile => "appendBigFile",
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationStage {
    /// Before a write touches the working map.
    PreWrite,
}

/// What a validator gets to look at.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct WriteRequest<'a> {
    pub op: WriteOp,
    pub path: &'a TreePath,
    /// Destination of a rename or clone.
    pub target: Option<&'a TreePath>,
}

impl<'a> WriteRequest<'a> {
    #[must_use]
    pub const fn new(op: WriteOp, path: &'a TreePath) -> Self {
        Self {
            op,
            path,
            target: None,
        }
    }

    #[must_use]
    pub const fn with_target(mut self, target: &'a TreePath) -> Self {
        self.target = Some(target);
        self
    }
}

/// Rules a write must pass before it is applied. A rejection aborts the
/// write with no state change.
pub trait Validator: Send + Sync + fmt::Debug {
    fn validate(
        &self,
        stage: ValidationStage,
        map: &BrickMap,
        request: &WriteRequest<'_>,
    ) -> eyre::Result<()>;
}

/// Accepts every write.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Validator for AllowAll {
    fn validate(
        &self,
        _stage: ValidationStage,
        _map: &BrickMap,
        _request: &WriteRequest<'_>,
    ) -> eyre::Result<()> {
        Ok(())
    }
}
