use std::collections::BTreeMap;
use std::fmt;

use bricks_primitives::BrickRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

/// Bookkeeping shared by every tree entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl Metadata {
    #[must_use]
    pub const fn new(at: Timestamp) -> Self {
        Self {
            created_at: at,
            updated_at: None,
            deleted_at: None,
        }
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn touch(&mut self, at: Timestamp) {
        self.updated_at = Some(at);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Directory,
    File,
    Embedded,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Directory => "directory",
            Self::File => "file",
            Self::Embedded => "embedded file",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub metadata: Metadata,
    #[serde(default)]
    pub items: BTreeMap<String, Node>,
}

impl Directory {
    #[must_use]
    pub const fn new(at: Timestamp) -> Self {
        Self {
            metadata: Metadata::new(at),
            items: BTreeMap::new(),
        }
    }

    /// Live entries, skipping soft-deleted ones.
    pub fn live_items(&self) -> impl DoubleEndedIterator<Item = (&String, &Node)> {
        self.items.iter().filter(|(_, node)| !node.is_deleted())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub metadata: Metadata,
    #[serde(default)]
    pub hash_links: Vec<BrickRef>,
}

impl File {
    #[must_use]
    pub const fn new(at: Timestamp) -> Self {
        Self {
            metadata: Metadata::new(at),
            hash_links: Vec::new(),
        }
    }

    /// Total size of the file, when every brick reports its size.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.hash_links.iter().map(|brick| brick.size).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    Directory(Directory),
    File(File),
}

impl Node {
    /// A fresh node of the given kind. Embedded entries are not tree nodes
    /// and map to a file.
    #[must_use]
    pub const fn new(kind: NodeKind, at: Timestamp) -> Self {
        match kind {
            NodeKind::Directory => Self::Directory(Directory::new(at)),
            NodeKind::File | NodeKind::Embedded => Self::File(File::new(at)),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Directory(_) => NodeKind::Directory,
            Self::File(_) => NodeKind::File,
        }
    }

    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        match self {
            Self::Directory(dir) => &dir.metadata,
            Self::File(file) => &file.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            Self::Directory(dir) => &mut dir.metadata,
            Self::File(file) => &mut file.metadata,
        }
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.metadata().is_deleted()
    }

    #[must_use]
    pub const fn as_dir(&self) -> Option<&Directory> {
        match self {
            Self::Directory(dir) => Some(dir),
            Self::File(_) => None,
        }
    }

    #[must_use]
    pub const fn as_file(&self) -> Option<&File> {
        match self {
            Self::File(file) => Some(file),
            Self::Directory(_) => None,
        }
    }
}

/// A small file stored inline in the map instead of in bricks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedFile {
    #[serde(with = "crate::serde_base64")]
    pub content: Vec<u8>,
    pub metadata: Metadata,
}

impl EmbeddedFile {
    #[must_use]
    pub const fn new(content: Vec<u8>, at: Timestamp) -> Self {
        Self {
            content,
            metadata: Metadata::new(at),
        }
    }
}
