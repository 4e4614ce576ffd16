use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{Error as HashError, Hash};

/// Address of a stored brick, as handed out by the brick storage.
#[derive(Eq, Copy, Hash, Clone, Debug, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashLink(Hash);

impl HashLink {
    /// The link of a brick holding `data` under `domain`. The domain is part
    /// of the address so the same bytes stored for two archives living in
    /// different domains never share a brick.
    #[must_use]
    pub fn of(domain: &str, data: &[u8]) -> Self {
        Self(Hash::of_parts(&[domain.as_bytes(), data]))
    }

    #[must_use]
    pub const fn hash(&self) -> &Hash {
        &self.0
    }
}

impl From<Hash> for HashLink {
    fn from(hash: Hash) -> Self {
        Self(hash)
    }
}

impl From<[u8; 32]> for HashLink {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.into())
    }
}

impl Deref for HashLink {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for HashLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct InvalidHashLink(HashError);

impl FromStr for HashLink {
    type Err = InvalidHashLink;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse().map_err(InvalidHashLink)?))
    }
}

/// Reference to one immutable brick. The core never looks inside the
/// referenced bytes; it only stores, compares and hands these values back.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BrickRef {
    pub hash_link: HashLink,
    pub check_sum: Hash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl BrickRef {
    #[must_use]
    pub const fn new(hash_link: HashLink, check_sum: Hash) -> Self {
        Self {
            hash_link,
            check_sum,
            size: None,
            key: None,
        }
    }

    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}
