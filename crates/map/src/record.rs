use std::collections::BTreeMap;

use bricks_primitives::Hash;
use serde::{Deserialize, Serialize};

use crate::diff::{BrickMapDiff, Operation};
use crate::error::{Error, Result};
use crate::map::{BrickMap, MapMetadata};
use crate::node::{Directory, EmbeddedFile, Timestamp};
use crate::BRICK_MAP_VERSION;

/// A stored brick map record. Records whose metadata carries an operation
/// log are diffs; everything else is a full map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrickMapRecord {
    Map(BrickMap),
    Diff(BrickMapDiff),
}

#[derive(Serialize)]
struct WireRef<'a> {
    v: u32,
    items: &'a Directory,
    metadata: WireMetadataRef<'a>,
    embedded: &'a BTreeMap<String, EmbeddedFile>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireMetadataRef<'a> {
    created_at: &'a Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<&'a Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_diff_hash_link: Option<&'a Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<&'a [Operation]>,
}

impl<'a> WireMetadataRef<'a> {
    fn new(metadata: &'a MapMetadata, log: Option<&'a [Operation]>) -> Self {
        Self {
            created_at: &metadata.created_at,
            updated_at: metadata.updated_at.as_ref(),
            prev_diff_hash_link: metadata.prev_diff_hash_link.as_ref(),
            log,
        }
    }
}

#[derive(Deserialize)]
struct Wire {
    v: u32,
    items: Directory,
    metadata: WireMetadata,
    #[serde(default)]
    embedded: BTreeMap<String, EmbeddedFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMetadata {
    created_at: Timestamp,
    #[serde(default)]
    updated_at: Option<Timestamp>,
    #[serde(default)]
    prev_diff_hash_link: Option<Hash>,
    #[serde(default)]
    log: Option<Vec<Operation>>,
}

impl BrickMapRecord {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let wire: Wire = serde_json::from_slice(bytes)?;

        if wire.v != BRICK_MAP_VERSION {
            return Err(Error::UnsupportedVersion(wire.v));
        }

        let metadata = MapMetadata {
            created_at: wire.metadata.created_at,
            updated_at: wire.metadata.updated_at,
            prev_diff_hash_link: wire.metadata.prev_diff_hash_link,
        };

        Ok(match wire.metadata.log {
            Some(log) => Self::Diff(BrickMapDiff { metadata, log }),
            None => Self::Map(BrickMap::from_parts(
                wire.v,
                wire.items,
                metadata,
                wire.embedded,
            )),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Map(map) => map.to_bytes(),
            Self::Diff(diff) => Self::encode_diff(diff),
        }
    }

    /// Writes a diff in the map layout. `items` is always an empty
    /// directory since a diff holds no partial tree; the operation log in
    /// the metadata is all that replay needs.
    pub(crate) fn encode_diff(diff: &BrickMapDiff) -> Result<Vec<u8>> {
        let items = Directory::new(diff.metadata.created_at);
        let embedded = BTreeMap::new();

        let wire = WireRef {
            v: BRICK_MAP_VERSION,
            items: &items,
            metadata: WireMetadataRef::new(&diff.metadata, Some(&diff.log)),
            embedded: &embedded,
        };

        Ok(serde_json::to_vec(&wire)?)
    }
}

impl BrickMap {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = WireRef {
            v: self.version,
            items: &self.root,
            metadata: WireMetadataRef::new(&self.metadata, None),
            embedded: &self.embedded,
        };

        Ok(serde_json::to_vec(&wire)?)
    }

    /// Parses a full map record. Diff records are rejected; replay them onto
    /// a map with [`BrickMap::apply_diff`] instead.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match BrickMapRecord::from_bytes(bytes)? {
            BrickMapRecord::Map(map) => Ok(map),
            BrickMapRecord::Diff(_) => Err(Error::CorruptDiff(
                "expected a full brick map, found a diff record".to_owned(),
            )),
        }
    }

    /// Content hash of the serialized map.
    pub fn content_hash(&self) -> Result<Hash> {
        Ok(Hash::new(&self.to_bytes()?))
    }
}
