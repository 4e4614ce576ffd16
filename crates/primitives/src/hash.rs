#[cfg(test)]
#[path = "tests/hash.rs"]
mod tests;

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use sha2::Digest;
use thiserror::Error;

const BYTES_LEN: usize = 32;

/// A SHA-256 digest, rendered as base58 in text and JSON.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Hash {
    bytes: [u8; BYTES_LEN],
}

impl Hash {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BYTES_LEN] {
        &self.bytes
    }

    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self {
            bytes: sha2::Sha256::digest(data).into(),
        }
    }

    /// Hashes several byte strings as one message, length-prefixing each
    /// part so that `["ab", "c"]` and `["a", "bc"]` never collide.
    #[must_use]
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = sha2::Sha256::default();

        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }

        Self {
            bytes: hasher.finalize().into(),
        }
    }

    #[must_use]
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.bytes).into_string()
    }
}

impl From<[u8; BYTES_LEN]> for Hash {
    fn from(bytes: [u8; BYTES_LEN]) -> Self {
        Self { bytes }
    }
}

impl From<Hash> for [u8; BYTES_LEN] {
    fn from(hash: Hash) -> Self {
        hash.bytes
    }
}

impl Deref for Hash {
    type Target = [u8; BYTES_LEN];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl std::hash::Hash for Hash {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.to_base58())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.to_base58()).finish()
    }
}

#[derive(Clone, Copy, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid hash length")]
    InvalidLength,

    #[error("invalid base58")]
    DecodeError(#[from] bs58::decode::Error),
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; BYTES_LEN];

        match bs58::decode(s).onto(&mut bytes) {
            Ok(len) if len == BYTES_LEN => Ok(Self { bytes }),
            Ok(_) | Err(bs58::decode::Error::BufferTooSmall) => Err(Error::InvalidLength),
            Err(err) => Err(Error::DecodeError(err)),
        }
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HashVisitor;

        impl serde::de::Visitor<'_> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a base58 encoded hash")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match v.parse() {
                    Ok(hash) => Ok(hash),
                    Err(Error::InvalidLength) => Err(E::invalid_length(v.len(), &self)),
                    Err(err) => Err(E::custom(err)),
                }
            }
        }

        deserializer.deserialize_str(HashVisitor)
    }
}
