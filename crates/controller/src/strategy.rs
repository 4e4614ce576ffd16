use std::collections::HashSet;
use std::sync::Arc;

use bricks_config::{AnchoringConfig, ConflictPolicy};
use bricks_map::BrickMap;
use bricks_primitives::{AnchorId, Hash, HashLink};
use bricks_store::{verify_link, AnchoringBackend, AnchoringError, BrickStorage};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::BrickMapCache;
use crate::conflict::{detect_conflicts, ConflictError, ConflictResolver, Resolution};
use crate::error::{Error, Result};
use crate::state::{ControllerState, PreparedDiff};

/// Anchors whatever the local state folds into, always on top of the latest
/// version in the chain.
#[derive(Debug)]
pub struct LatestVersionStrategy {
    domain: String,
    storage: Arc<dyn BrickStorage>,
    backend: Arc<dyn AnchoringBackend>,
    cache: BrickMapCache,
    config: AnchoringConfig,
    resolver: Option<Arc<dyn ConflictResolver>>,
}

/// What reconciliation hands back to the anchoring loop.
///
/// Nothing here is the anchored state yet: it becomes so only once a
/// version built on `merged` is appended after `remote`.
#[derive(Debug)]
pub struct Reconciled {
    /// The remote version local changes were merged onto.
    pub remote: HashLink,
    /// The remote version with every local change merged on top.
    pub merged: BrickMap,
    /// Diffs already folded into `merged`.
    pub folded: HashSet<Hash>,
}

impl LatestVersionStrategy {
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        storage: Arc<dyn BrickStorage>,
        backend: Arc<dyn AnchoringBackend>,
        cache: BrickMapCache,
        config: AnchoringConfig,
        resolver: Option<Arc<dyn ConflictResolver>>,
    ) -> Self {
        Self {
            domain: domain.into(),
            storage,
            backend,
            cache,
            config,
            resolver,
        }
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn BrickStorage> {
        &self.storage
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn AnchoringBackend> {
        &self.backend
    }

    #[must_use]
    pub const fn config(&self) -> &AnchoringConfig {
        &self.config
    }

    /// The latest anchored version of `id` and its hash link.
    pub async fn load(&self, id: &AnchorId) -> Result<(BrickMap, HashLink)> {
        let Some(last) = self.backend.get_last_version(id).await? else {
            return Err(Error::NotAnchored(id.clone()));
        };

        let map = self.load_version(&last.hash_link).await?;

        info!(anchor_id=%id, version=%last.hash_link, "Loaded brick map");

        Ok((map, last.hash_link))
    }

    pub async fn load_version(&self, version: &HashLink) -> Result<BrickMap> {
        if let Some(map) = self.cache.get(version) {
            return Ok(map);
        }

        let bytes = self.storage.get(version).await?;
        let bytes = verify_link(&self.domain, version, bytes)?;
        let map = BrickMap::from_bytes(&bytes)?;

        self.cache.insert(*version, map.clone());

        Ok(map)
    }

    /// Every anchored version of `id`, oldest first.
    pub async fn load_history(&self, id: &AnchorId) -> Result<Vec<(HashLink, BrickMap)>> {
        let versions = self.backend.get_all_versions(id).await?;

        let mut history = Vec::with_capacity(versions.len());

        for value in versions {
            let map = self.load_version(&value.hash_link).await?;
            history.push((value.hash_link, map));
        }

        Ok(history)
    }

    /// Stores `map` as a brick and returns its hash link.
    pub async fn persist(&self, map: &BrickMap) -> Result<HashLink> {
        let bytes = map.to_bytes()?;
        let brick = self.storage.put(&self.domain, &bytes).await?;

        debug!(version=%brick.hash_link, size=bytes.len(), "Persisted brick map");

        Ok(brick.hash_link)
    }

    /// Remembers a version this process anchored itself.
    pub(crate) fn remember(&self, version: HashLink, map: BrickMap) {
        self.cache.insert(version, map);
    }

    /// The previous pointer for the next append: the caller's own view of
    /// the chain, or the backend's head while in recovery.
    pub async fn previous_version(
        &self,
        id: &AnchorId,
        ours: Option<HashLink>,
    ) -> Result<Option<HashLink>, AnchoringError> {
        if !self.config.recovery_mode && !self.backend.is_in_recovery(id).await? {
            return Ok(ours);
        }

        let last = self.backend.get_last_version(id).await?;

        debug!(anchor_id=%id, "Taking previous version from backend");

        Ok(last.map(|value| value.hash_link))
    }

    #[must_use]
    pub fn if_changes_should_be_anchored(&self, state: &ControllerState) -> bool {
        !state.anchoring_suspended
            && self.config.auto_anchor
            && state.pending_operations() >= self.config.min_pending_operations.max(1)
    }

    /// Moves every new diff to the anchoring queue, then folds each queued
    /// diff not in `folded` onto `base`, or onto the anchored map if there
    /// is no base. Returns the folded map and the diffs it consumed.
    ///
    /// On failure the queue is left as it was.
    pub fn compact_diffs(
        &self,
        state: &mut ControllerState,
        base: Option<BrickMap>,
        folded: &HashSet<Hash>,
    ) -> Result<(BrickMap, Vec<PreparedDiff>)> {
        state.prepare_diffs()?;

        let mut candidate = base.unwrap_or_else(|| state.anchored.clone());

        for prepared in &state.diffs_in_anchoring {
            if folded.contains(&prepared.hash) {
                continue;
            }

            candidate.apply_diff(&prepared.diff)?;
        }

        let consumed = state.take_in_anchoring();

        debug!(diffs = consumed.len(), "Compacted pending diffs");

        Ok((candidate, consumed))
    }

    /// Rebases local changes onto the latest remote version after an append
    /// was refused as stale.
    ///
    /// `origin` is the anchored map the queued diffs were written against.
    /// Only the working map moves onto the merged version; `anchored` stays
    /// put until an append on top of the remote version succeeds.
    /// Unless conflicts are ignored, the remote version is checked against
    /// every queued operation first; conflicts go to the resolver, and
    /// without one (or if it aborts) they are returned as an error with the
    /// state untouched.
    pub async fn reconcile(
        &self,
        id: &AnchorId,
        state: &Mutex<ControllerState>,
        origin: &BrickMap,
    ) -> Result<Reconciled> {
        let (remote, remote_version) = self.load(id).await?;

        if self.config.conflicts.policy == ConflictPolicy::Detect {
            let conflict = {
                let mut state = state.lock().await;

                state.prepare_diffs()?;

                ConflictError {
                    conflicts: detect_conflicts(
                        &remote,
                        state.diffs_in_anchoring.iter().map(|prepared| &prepared.diff),
                    ),
                    ours: state.current_anchored_hash,
                    theirs: Some(remote_version),
                }
            };

            if !conflict.conflicts.is_empty() {
                warn!(
                    anchor_id=%id,
                    conflicts = conflict.conflicts.len(),
                    "Local changes conflict with remote version"
                );

                let resolution = match &self.resolver {
                    Some(resolver) => resolver.resolve(&conflict).await,
                    None => Resolution::Abort,
                };

                if resolution == Resolution::Abort {
                    return Err(conflict.into());
                }
            }
        }

        let mut state = state.lock().await;

        state.prepare_diffs()?;

        let mut ours = origin.clone();
        let mut folded = HashSet::with_capacity(state.diffs_in_anchoring.len());

        for prepared in &state.diffs_in_anchoring {
            ours.apply_diff(&prepared.diff)?;
            folded.insert(prepared.hash);
        }

        let changes = origin.diff(&ours);
        let mut merged = remote;
        let changed = merged.merge(&changes);

        state.dirty = merged.clone();
        state.reconciled = None;

        info!(
            anchor_id=%id,
            version=%remote_version,
            diffs = folded.len(),
            changed,
            "Reconciled local changes with remote version"
        );

        Ok(Reconciled {
            remote: remote_version,
            merged,
            folded,
        })
    }
}
