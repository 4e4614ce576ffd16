use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bricks_primitives::{AnchorId, AnchorValue, BrickRef, HashLink};
use parking_lot::RwLock;
use tracing::debug;

use crate::anchoring::AnchoringBackend;
use crate::brick::{brick_ref, BrickStorage};
use crate::error::{AnchoringError, StorageError};

/// Bricks kept in memory. Clones share the same store.
#[derive(Clone, Debug, Default)]
pub struct MemoryBrickStorage {
    bricks: Arc<RwLock<HashMap<HashLink, Arc<[u8]>>>>,
}

impl MemoryBrickStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bricks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bricks.read().is_empty()
    }

    /// Drops a brick, leaving every reference to it dangling.
    pub fn remove(&self, link: &HashLink) -> bool {
        self.bricks.write().remove(link).is_some()
    }
}

#[async_trait]
impl BrickStorage for MemoryBrickStorage {
    async fn put(&self, domain: &str, data: &[u8]) -> Result<BrickRef, StorageError> {
        let brick = brick_ref(domain, data);

        let _ = self
            .bricks
            .write()
            .entry(brick.hash_link)
            .or_insert_with(|| data.into());

        Ok(brick)
    }

    async fn get(&self, link: &HashLink) -> Result<Vec<u8>, StorageError> {
        self.bricks
            .read()
            .get(link)
            .map(|data| data.to_vec())
            .ok_or(StorageError::NotFound(*link))
    }

    async fn exists(&self, link: &HashLink) -> Result<bool, StorageError> {
        Ok(self.bricks.read().contains_key(link))
    }
}

#[derive(Debug, Default)]
struct Chains {
    versions: HashMap<AnchorId, Vec<AnchorValue>>,
    recovering: HashSet<AnchorId>,
}

/// Anchor chains kept in memory. Every value must be signed by the key its
/// anchor id derives from. Clones share the same chains.
#[derive(Clone, Debug, Default)]
pub struct MemoryAnchoringBackend {
    chains: Arc<RwLock<Chains>>,
}

impl MemoryAnchoringBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags `id` as recovering, so writers take their previous pointer
    /// from the backend.
    pub fn set_recovery(&self, id: &AnchorId, recovering: bool) {
        let mut chains = self.chains.write();

        if recovering {
            chains.recovering.insert(id.clone());
        } else {
            chains.recovering.remove(id);
        }
    }

    fn check_signature(id: &AnchorId, value: &AnchorValue) -> Result<(), AnchoringError> {
        if !value.verify() || value.signer().as_ref() != Some(id) {
            return Err(AnchoringError::InvalidSignature(id.clone()));
        }

        Ok(())
    }
}

#[async_trait]
impl AnchoringBackend for MemoryAnchoringBackend {
    async fn get_last_version(
        &self,
        id: &AnchorId,
    ) -> Result<Option<AnchorValue>, AnchoringError> {
        Ok(self
            .chains
            .read()
            .versions
            .get(id)
            .and_then(|chain| chain.last().cloned()))
    }

    async fn get_all_versions(&self, id: &AnchorId) -> Result<Vec<AnchorValue>, AnchoringError> {
        Ok(self
            .chains
            .read()
            .versions
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create(&self, id: &AnchorId, value: AnchorValue) -> Result<(), AnchoringError> {
        Self::check_signature(id, &value)?;

        let mut chains = self.chains.write();

        if chains.versions.contains_key(id) {
            return Err(AnchoringError::AlreadyExists(id.clone()));
        }

        debug!(%id, version = %value.hash_link, "created anchor");

        chains.versions.insert(id.clone(), vec![value]);

        Ok(())
    }

    async fn append(&self, id: &AnchorId, value: AnchorValue) -> Result<(), AnchoringError> {
        Self::check_signature(id, &value)?;

        let mut chains = self.chains.write();

        let chain = chains
            .versions
            .get_mut(id)
            .ok_or_else(|| AnchoringError::NotFound(id.clone()))?;

        let actual = chain.last().map(|head| head.hash_link);

        if value.previous != actual {
            return Err(AnchoringError::StaleVersion {
                expected: value.previous,
                actual,
            });
        }

        debug!(%id, version = %value.hash_link, length = chain.len() + 1, "appended anchor");

        chain.push(value);

        Ok(())
    }

    async fn is_in_recovery(&self, id: &AnchorId) -> Result<bool, AnchoringError> {
        Ok(self.chains.read().recovering.contains(id))
    }
}
