use std::collections::HashSet;
use std::sync::Arc;

use bricks_config::AnchoringConfig;
use bricks_map::{BrickMap, BrickMapDiff, Timestamp, TreeMutator, TreePath};
use bricks_primitives::{AnchorId, AnchorValue, BrickRef, HashLink, KeySsi};
use bricks_store::{AnchoringBackend, BrickStorage};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::cache::BrickMapCache;
use crate::conflict::ConflictResolver;
use crate::error::{Error, Result};
use crate::events::{AnchorNotice, AnchorOutcome, AnchoringEvent};
use crate::state::ControllerState;
use crate::strategy::LatestVersionStrategy;
use crate::validator::{AllowAll, ValidationStage, Validator, WriteOp, WriteRequest};

const NOTICE_CAPACITY: usize = 16;

#[derive(Debug)]
struct Inner {
    ssi: Arc<dyn KeySsi>,
    anchor_id: AnchorId,
    strategy: LatestVersionStrategy,
    validator: Arc<dyn Validator>,
    state: Mutex<ControllerState>,
    listener: Option<mpsc::UnboundedSender<AnchoringEvent>>,
    notices: broadcast::Sender<AnchorNotice>,
}

/// Mediates every read and write of one archive's brick map and owns its
/// anchoring lifecycle.
///
/// Writes land in the working map and in the pending diff at once, so they
/// are readable immediately while only the diff is later anchored. Clones
/// share the same state.
#[derive(Clone, Debug)]
pub struct BrickMapController {
    inner: Arc<Inner>,
}

#[derive(Debug)]
pub struct ControllerBuilder {
    ssi: Arc<dyn KeySsi>,
    storage: Arc<dyn BrickStorage>,
    backend: Arc<dyn AnchoringBackend>,
    config: AnchoringConfig,
    cache: Option<BrickMapCache>,
    validator: Arc<dyn Validator>,
    resolver: Option<Arc<dyn ConflictResolver>>,
    listener: Option<mpsc::UnboundedSender<AnchoringEvent>>,
}

impl ControllerBuilder {
    #[must_use]
    pub const fn config(mut self, config: AnchoringConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: BrickMapCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Runs anchoring detached from writes and reports each result here.
    #[must_use]
    pub fn listener(mut self, listener: mpsc::UnboundedSender<AnchoringEvent>) -> Self {
        self.listener = Some(listener);
        self
    }

    fn strategy(&mut self) -> LatestVersionStrategy {
        LatestVersionStrategy::new(
            self.ssi.domain(),
            Arc::clone(&self.storage),
            Arc::clone(&self.backend),
            self.cache.take().unwrap_or_default(),
            self.config,
            self.resolver.take(),
        )
    }

    /// Starts a new archive: an empty map, persisted and anchored as the
    /// first version of the chain.
    pub async fn init(mut self) -> Result<BrickMapController> {
        let strategy = self.strategy();
        let anchor_id = self.ssi.anchor_id();

        let map = BrickMap::default();
        let version = strategy.persist(&map).await?;

        let value = AnchorValue::signed(&*self.ssi, version, None);
        strategy.backend().create(&anchor_id, value).await?;
        strategy.remember(version, map.clone());

        info!(%anchor_id, %version, "Initialized brick map");

        Ok(self.build(strategy, anchor_id, ControllerState::new(map, Some(version))))
    }

    /// Opens an existing archive at its latest anchored version.
    pub async fn load(mut self) -> Result<BrickMapController> {
        let strategy = self.strategy();
        let anchor_id = self.ssi.anchor_id();

        let (map, version) = strategy.load(&anchor_id).await?;

        Ok(self.build(strategy, anchor_id, ControllerState::new(map, Some(version))))
    }

    fn build(
        self,
        strategy: LatestVersionStrategy,
        anchor_id: AnchorId,
        state: ControllerState,
    ) -> BrickMapController {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        BrickMapController {
            inner: Arc::new(Inner {
                ssi: self.ssi,
                anchor_id,
                strategy,
                validator: self.validator,
                state: Mutex::new(state),
                listener: self.listener,
                notices,
            }),
        }
    }
}

impl BrickMapController {
    #[must_use]
    pub fn builder(
        ssi: Arc<dyn KeySsi>,
        storage: Arc<dyn BrickStorage>,
        backend: Arc<dyn AnchoringBackend>,
    ) -> ControllerBuilder {
        ControllerBuilder {
            ssi,
            storage,
            backend,
            config: AnchoringConfig::default(),
            cache: None,
            validator: Arc::new(AllowAll),
            resolver: None,
            listener: None,
        }
    }

    #[must_use]
    pub fn anchor_id(&self) -> &AnchorId {
        &self.inner.anchor_id
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        self.inner.strategy.domain()
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn BrickStorage> {
        self.inner.strategy.storage()
    }

    // ===== Writes =====

    pub async fn add_file(&self, path: &TreePath, bricks: Vec<BrickRef>) -> Result<()> {
        self.write(WriteOp::AddFile, path, None, |target, at| {
            target.add_file_entry(path, bricks.clone(), at)
        })
        .await
    }

    pub async fn append_bricks(&self, path: &TreePath, bricks: Vec<BrickRef>) -> Result<()> {
        self.write(WriteOp::AppendToFile, path, None, |target, at| {
            target.append_bricks(path, bricks.clone(), at)
        })
        .await
    }

    pub async fn truncate(&self, path: &TreePath) -> Result<()> {
        self.write(WriteOp::Truncate, path, None, |target, at| {
            target.truncate(path, at)
        })
        .await
    }

    pub async fn delete(&self, path: &TreePath) -> Result<()> {
        self.write(WriteOp::Delete, path, None, |target, at| {
            target.delete(path, at)
        })
        .await
    }

    /// Moves `src` to `dst` as one logged copy followed by a delete.
    pub async fn rename(&self, src: &TreePath, dst: &TreePath) -> Result<()> {
        self.write(WriteOp::Rename, src, Some(dst), |target, at| {
            target.copy(src, dst, at)?;
            target.delete(src, at)
        })
        .await
    }

    pub async fn clone_path(&self, src: &TreePath, dst: &TreePath) -> Result<()> {
        self.write(WriteOp::Clone, src, Some(dst), |target, at| {
            target.copy(src, dst, at)
        })
        .await
    }

    pub async fn create_folder(&self, path: &TreePath) -> Result<()> {
        self.write(WriteOp::CreateFolder, path, None, |target, at| {
            target.create_folder(path, at)
        })
        .await
    }

    pub async fn create_file(&self, path: &TreePath) -> Result<()> {
        self.write(WriteOp::CreateFile, path, None, |target, at| {
            target.create_file(path, at)
        })
        .await
    }

    pub async fn embed(&self, path: &TreePath, content: Vec<u8>) -> Result<()> {
        self.write(WriteOp::Embed, path, None, |target, at| {
            target.put_embedded(path, content.clone(), at)
        })
        .await
    }

    pub async fn append_to_embedded(&self, path: &TreePath, content: Vec<u8>) -> Result<()> {
        self.write(WriteOp::AppendToEmbed, path, None, |target, at| {
            target.append_embedded(path, content.clone(), at)
        })
        .await
    }

    pub async fn replace_first_brick(&self, path: &TreePath, brick: BrickRef) -> Result<()> {
        self.write(WriteOp::ReplaceFirstBrick, path, None, |target, at| {
            target.replace_first_brick(path, brick.clone(), at)
        })
        .await
    }

    pub async fn update_big_file_last_brick(&self, path: &TreePath, brick: BrickRef) -> Result<()> {
        self.write(WriteOp::UpdateBigFileLastBrick, path, None, |target, at| {
            target.replace_last_brick(path, brick.clone(), at)
        })
        .await
    }

    /// Replaces the trailing partial brick, if any, then appends `bricks`,
    /// as one write.
    pub async fn append_big_file(
        &self,
        path: &TreePath,
        last: Option<BrickRef>,
        bricks: Vec<BrickRef>,
    ) -> Result<()> {
        if last.is_none() && bricks.is_empty() {
            return Ok(());
        }

        self.write(WriteOp::AppendBigFile, path, None, |target, at| {
            if let Some(last) = &last {
                target.replace_last_brick(path, last.clone(), at)?;
            }

            if bricks.is_empty() {
                return Ok(());
            }

            target.append_bricks(path, bricks.clone(), at)
        })
        .await
    }

    async fn write<F>(
        &self,
        op: WriteOp,
        path: &TreePath,
        target: Option<&TreePath>,
        mutate: F,
    ) -> Result<()>
    where
        F: Fn(&mut dyn TreeMutator, Timestamp) -> bricks_map::Result<()> + Send,
    {
        {
            let mut state = self.inner.state.lock().await;

            let mut request = WriteRequest::new(op, path);
            if let Some(target) = target {
                request = request.with_target(target);
            }

            self.inner
                .validator
                .validate(ValidationStage::PreWrite, &state.dirty, &request)
                .map_err(|reason| Error::ValidationFailed {
                    op,
                    path: path.to_string(),
                    reason,
                })?;

            let at = Utc::now();

            let dirty: &mut dyn TreeMutator = &mut state.dirty;
            mutate(dirty, at)?;

            let diff: &mut dyn TreeMutator = state.current_diff(at);
            mutate(diff, at)?;

            debug!(anchor_id=%self.inner.anchor_id, %op, %path, "Applied write");
        }

        self.attempt_anchoring().await
    }

    // ===== Reads =====

    /// Runs `f` against the working map, which reflects every write so far.
    pub async fn read_map<R>(&self, f: impl FnOnce(&BrickMap) -> R) -> R {
        let state = self.inner.state.lock().await;

        f(&state.dirty)
    }

    pub async fn anchored_map(&self) -> BrickMap {
        self.inner.state.lock().await.anchored.clone()
    }

    pub async fn current_anchored_hash(&self) -> Option<HashLink> {
        self.inner.state.lock().await.current_anchored_hash
    }

    pub async fn pending_operations(&self) -> usize {
        self.inner.state.lock().await.pending_operations()
    }

    /// Every diff not yet anchored, oldest first.
    pub async fn pending_diffs(&self) -> Vec<BrickMapDiff> {
        self.inner.state.lock().await.pending_diffs().cloned().collect()
    }

    pub async fn is_anchoring(&self) -> bool {
        self.inner.state.lock().await.anchoring_in_progress
    }

    /// Every anchored version, oldest first.
    pub async fn history(&self) -> Result<Vec<(HashLink, BrickMap)>> {
        self.inner.strategy.load_history(&self.inner.anchor_id).await
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AnchorNotice> {
        self.inner.notices.subscribe()
    }

    // ===== Lifecycle =====

    /// Stops writes from triggering anchoring until resumed.
    pub async fn suspend_anchoring(&self) {
        self.inner.state.lock().await.anchoring_suspended = true;
    }

    pub async fn resume_anchoring(&self) {
        self.inner.state.lock().await.anchoring_suspended = false;
    }

    /// Drops every pending change and starts over from the latest anchored
    /// version.
    pub async fn reload(&self) -> Result<()> {
        let (map, version) = self.inner.strategy.load(&self.inner.anchor_id).await?;

        self.inner.state.lock().await.reset(map, version);

        info!(anchor_id=%self.inner.anchor_id, %version, "Reloaded brick map, pending changes dropped");

        Ok(())
    }

    /// Moves to the latest anchored version, keeping pending changes on top
    /// of it.
    pub async fn refresh(&self) -> Result<()> {
        if self.is_anchoring().await {
            return Err(Error::AlreadyInProgress);
        }

        let (map, version) = self.inner.strategy.load(&self.inner.anchor_id).await?;

        let mut state = self.inner.state.lock().await;

        if state.anchoring_in_progress {
            return Err(Error::AlreadyInProgress);
        }

        let pending: Vec<_> = state.pending_diffs().cloned().collect();

        let mut dirty = map.clone();
        for diff in &pending {
            dirty.apply_diff(diff)?;
        }

        state.reset(map, version);
        state.dirty = dirty;
        state.diffs_new = pending;

        info!(
            anchor_id=%self.inner.anchor_id,
            %version,
            pending = state.diffs_new.len(),
            "Refreshed brick map"
        );

        Ok(())
    }

    // ===== Anchoring =====

    async fn attempt_anchoring(&self) -> Result<()> {
        let should_anchor = {
            let state = self.inner.state.lock().await;
            self.inner.strategy.if_changes_should_be_anchored(&state)
        };

        if !should_anchor {
            return Ok(());
        }

        let Some(listener) = &self.inner.listener else {
            return self.anchor_changes().await.map(|_| ());
        };

        let controller = self.clone();
        let listener = listener.clone();

        drop(tokio::spawn(async move {
            let result = controller.anchor_changes().await;

            let event = AnchoringEvent {
                anchor_id: controller.anchor_id().clone(),
                result,
            };

            if let Err(err) = listener.send(event) {
                debug!(anchor_id=%err.0.anchor_id, "Anchoring listener is gone");
            }
        }));

        Ok(())
    }

    /// Anchors every pending change, looping until nothing is left.
    ///
    /// Only one run is active per controller; writes that land meanwhile
    /// are picked up by the same run.
    pub async fn anchor_changes(&self) -> Result<AnchorOutcome> {
        {
            let mut state = self.inner.state.lock().await;

            if state.anchoring_in_progress {
                return Ok(AnchorOutcome::InProgress);
            }

            if !state.has_pending() && state.reconciled.is_none() {
                return Ok(AnchorOutcome::NothingToAnchor);
            }

            state.anchoring_in_progress = true;
        }

        let result = self.run_anchoring().await;

        if result.is_err() {
            self.inner.state.lock().await.anchoring_in_progress = false;
        }

        result
    }

    async fn run_anchoring(&self) -> Result<AnchorOutcome> {
        let inner = &*self.inner;
        let id = &inner.anchor_id;

        // The anchored map the queued diffs were written against. It only
        // moves when a version of ours lands, not when we reconcile.
        let (mut origin, mut reconciled) = {
            let mut state = inner.state.lock().await;
            (state.anchored.clone(), state.reconciled.take())
        };
        let mut last = None;

        loop {
            let (candidate, consumed, epoch, ours) = {
                let mut state = inner.state.lock().await;

                if reconciled.is_none() && !state.has_pending() {
                    state.anchoring_in_progress = false;

                    return Ok(last.map_or(AnchorOutcome::NothingToAnchor, AnchorOutcome::Anchored));
                }

                let compacted = match &reconciled {
                    Some(reconciled) => inner.strategy.compact_diffs(
                        &mut state,
                        Some(reconciled.merged.clone()),
                        &reconciled.folded,
                    ),
                    None => inner.strategy.compact_diffs(&mut state, None, &HashSet::new()),
                };

                let (candidate, consumed) = match compacted {
                    Ok(compacted) => compacted,
                    Err(err) => {
                        state.reconciled = reconciled;
                        return Err(err);
                    }
                };

                let ours = reconciled
                    .as_ref()
                    .map_or(state.current_anchored_hash, |reconciled| {
                        Some(reconciled.remote)
                    });

                (candidate, consumed, state.epoch, ours)
            };

            let version = match inner.strategy.persist(&candidate).await {
                Ok(version) => version,
                Err(err) => {
                    inner.state.lock().await.rollback(epoch, consumed, reconciled);
                    warn!(anchor_id=%id, %err, "Failed to persist brick map, rolled back");
                    return Err(Error::PersistBrickMap(Box::new(err)));
                }
            };

            let appended = match inner.strategy.previous_version(id, ours).await {
                Ok(previous) => {
                    let value = AnchorValue::signed(&*inner.ssi, version, previous);

                    let result = if previous.is_some() {
                        inner.strategy.backend().append(id, value).await
                    } else {
                        inner.strategy.backend().create(id, value).await
                    };

                    result.map(|()| previous)
                }
                Err(err) => Err(err),
            };

            match appended {
                Ok(previous) => {
                    let committed = inner
                        .state
                        .lock()
                        .await
                        .commit_anchor(epoch, candidate.clone(), version);

                    if let Err(reason) = committed {
                        error!(anchor_id=%id, %version, %reason, "Anchored version could not be applied locally");
                        return Err(Error::BrickMapUpdate(reason));
                    }

                    inner.strategy.remember(version, candidate.clone());

                    let notice = AnchorNotice {
                        anchor_id: id.clone(),
                        hash_link: version,
                        previous,
                    };

                    if inner.notices.send(notice).is_err() {
                        trace!(anchor_id=%id, "No anchor subscribers");
                    }

                    info!(anchor_id=%id, %version, diffs = consumed.len(), "Anchored new version");

                    origin = candidate;
                    reconciled = None;
                    last = Some(version);
                }
                Err(err) if err.is_stale() => {
                    inner
                        .state
                        .lock()
                        .await
                        .rollback(epoch, consumed, reconciled.take());
                    warn!(anchor_id=%id, %err, "Anchoring refused as stale, reconciling");

                    reconciled = Some(inner.strategy.reconcile(id, &inner.state, &origin).await?);
                }
                Err(err) => {
                    inner.state.lock().await.rollback(epoch, consumed, reconciled);
                    warn!(anchor_id=%id, %err, "Failed to anchor new version, rolled back");
                    return Err(Error::AnchorVersion(err));
                }
            }
        }
    }
}
