use std::fmt;

use async_trait::async_trait;
use bricks_primitives::{BrickRef, Hash, HashLink};

use crate::error::StorageError;

/// Storage for immutable, content-addressed bricks.
///
/// Storage hands back raw bytes. Callers holding a [`BrickRef`] check them
/// with [`verify`]; callers holding only a link use [`verify_link`].
#[async_trait]
pub trait BrickStorage: Send + Sync + fmt::Debug {
    /// Stores `data` under `domain` and returns a reference to it. Storing
    /// the same bytes twice yields the same reference.
    async fn put(&self, domain: &str, data: &[u8]) -> Result<BrickRef, StorageError>;

    async fn get(&self, link: &HashLink) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, link: &HashLink) -> Result<bool, StorageError>;
}

/// The reference a brick holding `data` gets under `domain`.
#[must_use]
pub fn brick_ref(domain: &str, data: &[u8]) -> BrickRef {
    BrickRef::new(HashLink::of(domain, data), Hash::new(data)).with_size(data.len() as u64)
}

/// Checks `data` against the checksum recorded in `brick`.
pub fn verify(brick: &BrickRef, data: Vec<u8>) -> Result<Vec<u8>, StorageError> {
    if Hash::new(&data) != brick.check_sum {
        return Err(StorageError::ChecksumMismatch(brick.hash_link));
    }

    Ok(data)
}

/// Checks that `data` is what `link` addresses under `domain`.
pub fn verify_link(domain: &str, link: &HashLink, data: Vec<u8>) -> Result<Vec<u8>, StorageError> {
    if HashLink::of(domain, &data) != *link {
        return Err(StorageError::ChecksumMismatch(*link));
    }

    Ok(data)
}
