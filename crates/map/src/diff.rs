use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use bricks_primitives::{BrickRef, Hash};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

use crate::error::{Error, Result};
use crate::map::{BrickMap, MapMetadata};
use crate::mutator::TreeMutator;
use crate::node::Timestamp;
use crate::path::TreePath;
use crate::record::BrickMapRecord;
use crate::serde_base64;

/// Kind of a logged operation, serialized under its camelCase name.
///
/// Names this version does not know are kept as [`OpKind::Unknown`] so a
/// record written by a newer writer still parses; replaying it fails.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Append,
    Truncate,
    Delete,
    Copy,
    CreateFolder,
    CreateFile,
    ReplaceFirstBrick,
    ReplaceLastBrick,
    Embed,
    AppendToEmbed,
    Unknown(String),
}

impl OpKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Append => "append",
            Self::Truncate => "truncate",
            Self::Delete => "delete",
            Self::Copy => "copy",
            Self::CreateFolder => "createFolder",
            Self::CreateFile => "createFile",
            Self::ReplaceFirstBrick => "replaceFirstBrick",
            Self::ReplaceLastBrick => "replaceLastBrick",
            Self::Embed => "embed",
            Self::AppendToEmbed => "appendToEmbed",
            Self::Unknown(name) => name,
        }
    }
}

impl FromStr for OpKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "add" => Self::Add,
            "append" => Self::Append,
            "truncate" => Self::Truncate,
            "delete" => Self::Delete,
            "copy" => Self::Copy,
            "createFolder" => Self::CreateFolder,
            "createFile" => Self::CreateFile,
            "replaceFirstBrick" => Self::ReplaceFirstBrick,
            "replaceLastBrick" => Self::ReplaceLastBrick,
            "embed" => Self::Embed,
            "appendToEmbed" => Self::AppendToEmbed,
            other => Self::Unknown(other.to_owned()),
        })
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for OpKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OpKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;

        match name.parse() {
            Ok(kind) => Ok(kind),
            Err(never) => match never {},
        }
    }
}

/// Payload of a logged operation.
///
/// `Text` holds the destination path of a copy, or the base64 content of an
/// embed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpData {
    Bricks(Vec<BrickRef>),
    Brick(BrickRef),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub op: OpKind,
    pub path: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OpData>,
}

impl Operation {
    fn malformed(&self) -> Error {
        Error::CorruptDiff(format!(
            "malformed data for `{}` operation on `{}`",
            self.op, self.path
        ))
    }

    fn bricks(&self) -> Result<Vec<BrickRef>> {
        match &self.data {
            Some(OpData::Bricks(bricks)) => Ok(bricks.clone()),
            _ => Err(self.malformed()),
        }
    }

    fn brick(&self) -> Result<BrickRef> {
        match &self.data {
            Some(OpData::Brick(brick)) => Ok(brick.clone()),
            _ => Err(self.malformed()),
        }
    }

    fn target(&self) -> Result<TreePath> {
        match &self.data {
            Some(OpData::Text(target)) => {
                TreePath::parse_entry(target).map_err(|_| self.malformed())
            }
            _ => Err(self.malformed()),
        }
    }

    fn content(&self) -> Result<Vec<u8>> {
        match &self.data {
            Some(OpData::Text(encoded)) => {
                serde_base64::decode(encoded).ok_or_else(|| self.malformed())
            }
            _ => Err(self.malformed()),
        }
    }
}

/// The operations applied to a working map since its last anchored version.
///
/// A diff never holds a tree of its own. Its header chains it to the diff
/// anchored before it. Serialized, a diff carries an empty root directory
/// and no embedded files; only `metadata.log` is read back on replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrickMapDiff {
    pub(crate) metadata: MapMetadata,
    pub(crate) log: Vec<Operation>,
}

impl BrickMapDiff {
    #[must_use]
    pub fn new(prev_diff_hash_link: Option<Hash>, at: Timestamp) -> Self {
        let mut metadata = MapMetadata::new(at);
        metadata.prev_diff_hash_link = prev_diff_hash_link;

        Self {
            metadata,
            log: Vec::new(),
        }
    }

    #[must_use]
    pub const fn metadata(&self) -> &MapMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn prev_diff_hash_link(&self) -> Option<&Hash> {
        self.metadata.prev_diff_hash_link.as_ref()
    }

    #[must_use]
    pub fn log(&self) -> &[Operation] {
        &self.log
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.log.len()
    }

    /// Content hash of the serialized record. This is the diff's identity
    /// once it leaves the pending queue.
    pub fn content_hash(&self) -> Result<Hash> {
        Ok(Hash::new(&self.to_bytes()?))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        BrickMapRecord::encode_diff(self)
    }

    fn record(&mut self, op: OpKind, path: &TreePath, at: Timestamp, data: Option<OpData>) {
        trace!(%op, %path, "recording operation");

        self.log.push(Operation {
            op,
            path: path.to_string(),
            timestamp: at,
            data,
        });
        self.metadata.updated_at = Some(at);
    }
}

impl TreeMutator for BrickMapDiff {
    fn add_file_entry(
        &mut self,
        path: &TreePath,
        bricks: Vec<BrickRef>,
        at: Timestamp,
    ) -> Result<()> {
        self.record(OpKind::Add, path, at, Some(OpData::Bricks(bricks)));
        Ok(())
    }

    fn append_bricks(
        &mut self,
        path: &TreePath,
        bricks: Vec<BrickRef>,
        at: Timestamp,
    ) -> Result<()> {
        self.record(OpKind::Append, path, at, Some(OpData::Bricks(bricks)));
        Ok(())
    }

    fn truncate(&mut self, path: &TreePath, at: Timestamp) -> Result<()> {
        self.record(OpKind::Truncate, path, at, None);
        Ok(())
    }

    fn replace_first_brick(
        &mut self,
        path: &TreePath,
        brick: BrickRef,
        at: Timestamp,
    ) -> Result<()> {
        self.record(OpKind::ReplaceFirstBrick, path, at, Some(OpData::Brick(brick)));
        Ok(())
    }

    fn replace_last_brick(
        &mut self,
        path: &TreePath,
        brick: BrickRef,
        at: Timestamp,
    ) -> Result<()> {
        self.record(OpKind::ReplaceLastBrick, path, at, Some(OpData::Brick(brick)));
        Ok(())
    }

    fn delete(&mut self, path: &TreePath, at: Timestamp) -> Result<()> {
        self.record(OpKind::Delete, path, at, None);
        Ok(())
    }

    fn copy(&mut self, src: &TreePath, dst: &TreePath, at: Timestamp) -> Result<()> {
        self.record(OpKind::Copy, src, at, Some(OpData::Text(dst.to_string())));
        Ok(())
    }

    fn create_folder(&mut self, path: &TreePath, at: Timestamp) -> Result<()> {
        self.record(OpKind::CreateFolder, path, at, None);
        Ok(())
    }

    fn create_file(&mut self, path: &TreePath, at: Timestamp) -> Result<()> {
        self.record(OpKind::CreateFile, path, at, None);
        Ok(())
    }

    fn put_embedded(&mut self, path: &TreePath, content: Vec<u8>, at: Timestamp) -> Result<()> {
        let content = serde_base64::encode(&content);
        self.record(OpKind::Embed, path, at, Some(OpData::Text(content)));
        Ok(())
    }

    fn append_embedded(
        &mut self,
        path: &TreePath,
        content: Vec<u8>,
        at: Timestamp,
    ) -> Result<()> {
        let content = serde_base64::encode(&content);
        self.record(OpKind::AppendToEmbed, path, at, Some(OpData::Text(content)));
        Ok(())
    }
}

impl BrickMap {
    /// Replays every logged operation of `diff`, in order.
    ///
    /// An empty log or an operation this version cannot interpret is
    /// rejected as a corrupt diff. The map ends up chained to `diff` and
    /// stamped with the time of its last operation.
    pub fn apply_diff(&mut self, diff: &BrickMapDiff) -> Result<()> {
        let Some(last) = diff.log.last() else {
            return Err(Error::CorruptDiff(
                "diff carries an empty operation log".to_owned(),
            ));
        };

        for op in &diff.log {
            self.replay(op)?;
        }

        self.metadata.prev_diff_hash_link = diff.metadata.prev_diff_hash_link;
        self.touch(last.timestamp);

        Ok(())
    }

    /// Applies a stored record: a diff is replayed, a full map is merged.
    pub fn apply(&mut self, record: &BrickMapRecord) -> Result<()> {
        match record {
            BrickMapRecord::Map(map) => {
                self.merge(map);
                Ok(())
            }
            BrickMapRecord::Diff(diff) => self.apply_diff(diff),
        }
    }

    fn replay(&mut self, op: &Operation) -> Result<()> {
        let path = TreePath::parse_entry(&op.path).map_err(|_| {
            Error::CorruptDiff(format!("invalid path `{}` in `{}` operation", op.path, op.op))
        })?;
        let at = op.timestamp;

        match &op.op {
            OpKind::Add => self.add_file_entry(&path, op.bricks()?, at),
            OpKind::Append => self.append_bricks(&path, op.bricks()?, at),
            OpKind::Truncate => self.truncate(&path, at),
            OpKind::Delete => self.delete(&path, at),
            OpKind::Copy => self.copy(&path, &op.target()?, at),
            OpKind::CreateFolder => self.create_folder(&path, at),
            OpKind::CreateFile => self.create_file(&path, at),
            OpKind::ReplaceFirstBrick => self.replace_first_brick(&path, op.brick()?, at),
            OpKind::ReplaceLastBrick => self.replace_last_brick(&path, op.brick()?, at),
            OpKind::Embed => self.put_embedded(&path, op.content()?, at),
            OpKind::AppendToEmbed => self.append_embedded(&path, op.content()?, at),
            OpKind::Unknown(name) => Err(Error::CorruptDiff(format!(
                "unknown operation `{name}` on `{}`",
                op.path
            ))),
        }
    }
}
