use std::io::ErrorKind;

use async_trait::async_trait;
use bricks_primitives::{BrickRef, HashLink};
use camino::{Utf8Path, Utf8PathBuf};
use tokio::fs;

use crate::brick::{brick_ref, BrickStorage};
use crate::error::StorageError;

/// Bricks stored as one file each under a root directory, named after
/// their hash link.
#[derive(Clone, Debug)]
pub struct FsBrickStorage {
    root: Utf8PathBuf,
}

impl FsBrickStorage {
    pub async fn new(root: &Utf8Path) -> eyre::Result<Self> {
        fs::create_dir_all(root).await?;

        Ok(Self {
            root: root.to_owned(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path(&self, link: &HashLink) -> Utf8PathBuf {
        self.root.join(link.to_string())
    }
}

#[async_trait]
impl BrickStorage for FsBrickStorage {
    async fn put(&self, domain: &str, data: &[u8]) -> Result<BrickRef, StorageError> {
        let brick = brick_ref(domain, data);

        fs::write(self.path(&brick.hash_link), data)
            .await
            .map_err(|err| StorageError::Io(err.into()))?;

        Ok(brick)
    }

    async fn get(&self, link: &HashLink) -> Result<Vec<u8>, StorageError> {
        match fs::read(self.path(link)).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(*link)),
            Err(err) => Err(StorageError::Io(err.into())),
        }
    }

    async fn exists(&self, link: &HashLink) -> Result<bool, StorageError> {
        fs::try_exists(self.path(link))
            .await
            .map_err(|err| StorageError::Io(err.into()))
    }
}
