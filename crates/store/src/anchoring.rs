use std::fmt;

use async_trait::async_trait;
use bricks_primitives::{AnchorId, AnchorValue};

use crate::error::AnchoringError;

/// An append-only chain of signed versions per anchor id.
///
/// Appends are compare-and-swap: a value is accepted only if its previous
/// pointer names the chain's current head.
#[async_trait]
pub trait AnchoringBackend: Send + Sync + fmt::Debug {
    async fn get_last_version(&self, id: &AnchorId)
        -> Result<Option<AnchorValue>, AnchoringError>;

    /// Every version of the chain, oldest first.
    async fn get_all_versions(&self, id: &AnchorId) -> Result<Vec<AnchorValue>, AnchoringError>;

    /// Starts a new chain with `value` as its first version.
    async fn create(&self, id: &AnchorId, value: AnchorValue) -> Result<(), AnchoringError>;

    /// Appends `value`, failing with [`AnchoringError::StaleVersion`] if
    /// `value.previous` is not the chain's head.
    async fn append(&self, id: &AnchorId, value: AnchorValue) -> Result<(), AnchoringError>;

    /// Whether the backend asks writers of `id` to take the previous pointer
    /// from the backend instead of from their own view of the chain.
    async fn is_in_recovery(&self, id: &AnchorId) -> Result<bool, AnchoringError>;
}
