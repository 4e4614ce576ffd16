use std::sync::Arc;

use bricks_config::ConfigFile;
use bricks_controller::{
    AnchorOutcome, AnchoringEvent, BrickMapController, ConflictResolver, ControllerBuilder,
    Validator,
};
use bricks_map::{BrickMap, Stat, TreePath};
use bricks_primitives::{AnchorId, BrickRef, HashLink, KeySsi};
use bricks_store::{verify, AnchoringBackend, BrickStorage};
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mount::{Manifest, MountTable};

/// File content, one brick at a time.
pub type ContentStream = BoxStream<'static, Result<Vec<u8>>>;

#[derive(Debug)]
struct Inner {
    controller: BrickMapController,
    chunk_size: usize,
    manifest: Arc<dyn Manifest>,
    /// Held shared by every operation and exclusively by reloads, so
    /// operations arriving during a reload queue behind it in order.
    gate: RwLock<()>,
    /// Mounted archives touched by the open batch, if any.
    batch: Mutex<Option<Vec<Archive>>>,
}

/// A versioned file tree stored as bricks.
///
/// Paths below a mount point are served by the mounted archive. Clones
/// share the same state.
#[derive(Clone, Debug)]
pub struct Archive {
    inner: Arc<Inner>,
}

#[derive(Debug)]
pub struct ArchiveBuilder {
    controller: ControllerBuilder,
    config: ConfigFile,
    manifest: Option<Arc<dyn Manifest>>,
}

impl ArchiveBuilder {
    #[must_use]
    pub fn config(mut self, config: ConfigFile) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn manifest(mut self, manifest: Arc<dyn Manifest>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.controller = self.controller.validator(validator);
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.controller = self.controller.resolver(resolver);
        self
    }

    #[must_use]
    pub fn listener(mut self, listener: mpsc::UnboundedSender<AnchoringEvent>) -> Self {
        self.controller = self.controller.listener(listener);
        self
    }

    /// Starts a new, empty archive.
    pub async fn create(self) -> Result<Archive> {
        let (controller, rest) = self.split();

        Ok(rest.build(controller.init().await?))
    }

    /// Opens an archive at its latest anchored version.
    pub async fn load(self) -> Result<Archive> {
        let (controller, rest) = self.split();

        Ok(rest.build(controller.load().await?))
    }

    fn split(self) -> (ControllerBuilder, Parts) {
        let controller = self
            .controller
            .config(self.config.anchoring)
            .cache(self.config.cache.into());

        let parts = Parts {
            chunk_size: self.config.chunk_size.max(1),
            manifest: self
                .manifest
                .unwrap_or_else(|| Arc::new(MountTable::new())),
        };

        (controller, parts)
    }
}

struct Parts {
    chunk_size: usize,
    manifest: Arc<dyn Manifest>,
}

impl Parts {
    fn build(self, controller: BrickMapController) -> Archive {
        info!(anchor_id=%controller.anchor_id(), "Opened archive");

        Archive {
            inner: Arc::new(Inner {
                controller,
                chunk_size: self.chunk_size,
                manifest: self.manifest,
                gate: RwLock::new(()),
                batch: Mutex::new(None),
            }),
        }
    }
}

enum Content {
    Embedded(Vec<u8>),
    Bricks(Vec<BrickRef>),
}

/// Where a path is served from.
struct Routed {
    archive: Archive,
    path: TreePath,
    /// Mount point of `archive`, root if the path never left the caller.
    point: TreePath,
}

impl Routed {
    /// Rewrites a path listed by the serving archive into the caller's view.
    fn outer(&self, listed: String) -> String {
        if self.point.is_root() {
            return listed;
        }

        TreePath::parse(&listed)
            .ok()
            .and_then(|path| path.rebase(&TreePath::root(), &self.point))
            .map_or(listed, |path| path.to_string())
    }
}

impl Archive {
    #[must_use]
    pub fn builder(
        ssi: Arc<dyn KeySsi>,
        storage: Arc<dyn BrickStorage>,
        backend: Arc<dyn AnchoringBackend>,
    ) -> ArchiveBuilder {
        ArchiveBuilder {
            controller: BrickMapController::builder(ssi, storage, backend),
            config: ConfigFile::default(),
            manifest: None,
        }
    }

    #[must_use]
    pub fn controller(&self) -> &BrickMapController {
        &self.inner.controller
    }

    #[must_use]
    pub fn anchor_id(&self) -> &AnchorId {
        self.inner.controller.anchor_id()
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    fn is(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Follows mount points down to the archive serving `path`. Mounted
    /// archives reached while a batch is open join the batch.
    async fn route(&self, path: TreePath) -> Routed {
        let mut routed = Routed {
            archive: self.clone(),
            path,
            point: TreePath::root(),
        };
        let mut visited = vec![self.clone()];

        while let Some(mount) = routed.archive.inner.manifest.resolve(&routed.path) {
            if visited.iter().any(|seen| seen.is(&mount.archive)) {
                warn!(point=%mount.point, "Mount cycle, serving path from the mounting archive");
                break;
            }

            routed.point = mount
                .point
                .rebase(&TreePath::root(), &routed.point)
                .unwrap_or(mount.point);
            routed.path = mount.relative;
            routed.archive = mount.archive;
            visited.push(routed.archive.clone());
        }

        if !routed.archive.is(self) {
            self.join_batch(&routed.archive).await;
        }

        routed
    }

    async fn join_batch(&self, mounted: &Self) {
        let joined = {
            let mut batch = self.inner.batch.lock();

            match batch.as_mut() {
                Some(touched) if !touched.iter().any(|seen| seen.is(mounted)) => {
                    touched.push(mounted.clone());
                    true
                }
                _ => false,
            }
        };

        if joined {
            mounted.inner.controller.suspend_anchoring().await;
            debug!(anchor_id=%mounted.anchor_id(), "Mounted archive joined batch");
        }
    }

    async fn store_chunks(&self, data: &[u8]) -> Result<Vec<BrickRef>> {
        let storage = self.inner.controller.storage();
        let domain = self.inner.controller.domain();

        let mut bricks = Vec::with_capacity(data.len().div_ceil(self.inner.chunk_size));

        for chunk in data.chunks(self.inner.chunk_size) {
            bricks.push(storage.put(domain, chunk).await?);
        }

        Ok(bricks)
    }

    // ===== File content =====

    /// Stores `data` as the whole content of the file at `path`.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let archive = &routed.archive;
        let _gate = archive.inner.gate.read().await;

        let bricks = archive.store_chunks(data).await?;
        let count = bricks.len();

        archive.inner.controller.add_file(&routed.path, bricks).await?;

        debug!(path=%routed.path, bricks = count, size = data.len(), "Wrote file");

        Ok(())
    }

    /// Adds `data` to the end of the file at `path` as new bricks.
    pub async fn append_to_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let archive = &routed.archive;
        let _gate = archive.inner.gate.read().await;

        let bricks = archive.store_chunks(data).await?;

        archive
            .inner
            .controller
            .append_bricks(&routed.path, bricks)
            .await?;

        Ok(())
    }

    /// Adds `data` to the end of the file at `path`, first topping up its
    /// last brick if that one is not full.
    pub async fn append_big_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let archive = &routed.archive;
        let _gate = archive.inner.gate.read().await;

        let controller = &archive.inner.controller;
        let chunk_size = archive.inner.chunk_size;
        let full = u64::try_from(chunk_size).unwrap_or(u64::MAX);

        let last = controller
            .read_map(|map| {
                map.bricks_meta(&routed.path)
                    .ok()
                    .and_then(|bricks| bricks.last().cloned())
            })
            .await
            .filter(|last| !matches!(last.size, Some(size) if size >= full));

        let mut rest = data;
        let mut replacement = None;

        if let Some(last) = last {
            let stored = controller.storage().get(&last.hash_link).await?;
            let mut filled = verify(&last, stored)?;

            if filled.len() < chunk_size {
                let (head, tail) = rest.split_at((chunk_size - filled.len()).min(rest.len()));
                filled.extend_from_slice(head);
                rest = tail;

                replacement = Some(controller.storage().put(controller.domain(), &filled).await?);
            }
        }

        let bricks = archive.store_chunks(rest).await?;

        controller
            .append_big_file(&routed.path, replacement, bricks)
            .await?;

        Ok(())
    }

    /// Stores `data` inline in the map instead of in bricks.
    pub async fn embed_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        routed
            .archive
            .inner
            .controller
            .embed(&routed.path, data.to_vec())
            .await?;

        Ok(())
    }

    pub async fn append_to_embedded_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        routed
            .archive
            .inner
            .controller
            .append_to_embedded(&routed.path, data.to_vec())
            .await?;

        Ok(())
    }

    /// Streams the content of the file at `path`. Embedded content comes in
    /// one piece; bricks are fetched lazily and checked against their
    /// checksums.
    pub async fn read_stream(&self, path: &str) -> Result<ContentStream> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let archive = &routed.archive;
        let _gate = archive.inner.gate.read().await;

        let content = archive
            .inner
            .controller
            .read_map(|map| match map.embedded(&routed.path) {
                Some(entry) => Ok(Content::Embedded(entry.content.clone())),
                None => map
                    .bricks_meta(&routed.path)
                    .map(|bricks| Content::Bricks(bricks.to_vec())),
            })
            .await?;

        let bricks = match content {
            Content::Embedded(content) => {
                return Ok(stream::once(async move { Ok::<_, Error>(content) }).boxed())
            }
            Content::Bricks(bricks) => bricks,
        };

        let storage = Arc::clone(archive.inner.controller.storage());

        Ok(stream::iter(bricks)
            .then(move |brick| {
                let storage = Arc::clone(&storage);

                async move {
                    let data = storage.get(&brick.hash_link).await?;
                    verify(&brick, data)
                }
            })
            .map_err(Error::from)
            .boxed())
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.read_stream(path).await?.try_concat().await
    }

    // ===== Tree =====

    pub async fn create_folder(&self, path: &str) -> Result<()> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        routed
            .archive
            .inner
            .controller
            .create_folder(&routed.path)
            .await?;

        Ok(())
    }

    pub async fn create_file(&self, path: &str) -> Result<()> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        routed
            .archive
            .inner
            .controller
            .create_file(&routed.path)
            .await?;

        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        routed.archive.inner.controller.delete(&routed.path).await?;

        Ok(())
    }

    /// Empties the file at `path`, or drops everything below the folder.
    pub async fn truncate(&self, path: &str) -> Result<()> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        routed
            .archive
            .inner
            .controller
            .truncate(&routed.path)
            .await?;

        Ok(())
    }

    pub async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let (from, to) = self.route_pair(src, dst).await?;
        let _gate = from.archive.inner.gate.read().await;

        from.archive
            .inner
            .controller
            .rename(&from.path, &to.path)
            .await?;

        Ok(())
    }

    pub async fn clone_path(&self, src: &str, dst: &str) -> Result<()> {
        let (from, to) = self.route_pair(src, dst).await?;
        let _gate = from.archive.inner.gate.read().await;

        from.archive
            .inner
            .controller
            .clone_path(&from.path, &to.path)
            .await?;

        Ok(())
    }

    async fn route_pair(&self, src: &str, dst: &str) -> Result<(Routed, Routed)> {
        let from = self.route(TreePath::parse_entry(src)?).await;
        let to = self.route(TreePath::parse_entry(dst)?).await;

        if !from.archive.is(&to.archive) {
            return Err(Error::CrossArchive {
                src: src.to_owned(),
                dst: dst.to_owned(),
            });
        }

        Ok((from, to))
    }

    pub async fn list_files(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let routed = self.route(TreePath::parse(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        let files = routed
            .archive
            .inner
            .controller
            .read_map(|map| map.list_files(&routed.path, recursive))
            .await?;

        Ok(files.into_iter().map(|file| routed.outer(file)).collect())
    }

    pub async fn list_folders(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let routed = self.route(TreePath::parse(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        let folders = routed
            .archive
            .inner
            .controller
            .read_map(|map| map.list_folders(&routed.path, recursive))
            .await?;

        Ok(folders
            .into_iter()
            .map(|folder| routed.outer(folder))
            .collect())
    }

    pub async fn stat(&self, path: &str) -> Result<Stat> {
        let routed = self.route(TreePath::parse(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        Ok(routed
            .archive
            .inner
            .controller
            .read_map(|map| map.stat(&routed.path))
            .await?)
    }

    pub async fn get_bricks_meta(&self, path: &str) -> Result<Vec<BrickRef>> {
        let routed = self.route(TreePath::parse_entry(path)?).await;
        let _gate = routed.archive.inner.gate.read().await;

        Ok(routed
            .archive
            .inner
            .controller
            .read_map(|map| map.bricks_meta(&routed.path).map(<[_]>::to_vec))
            .await?)
    }

    // ===== Versions =====

    /// Anchors pending changes now, whatever the anchoring policy says.
    pub async fn anchor(&self) -> Result<AnchorOutcome> {
        let _gate = self.inner.gate.read().await;

        Ok(self.inner.controller.anchor_changes().await?)
    }

    /// Moves to the latest anchored version, keeping pending changes.
    pub async fn refresh(&self) -> Result<()> {
        let _gate = self.inner.gate.write().await;

        self.inner.controller.refresh().await?;

        Ok(())
    }

    /// Drops every pending change.
    pub async fn cancel(&self) -> Result<()> {
        let _gate = self.inner.gate.write().await;

        self.inner.controller.reload().await?;

        Ok(())
    }

    /// Every anchored version, oldest first.
    pub async fn history(&self) -> Result<Vec<(HashLink, BrickMap)>> {
        let _gate = self.inner.gate.read().await;

        Ok(self.inner.controller.history().await?)
    }

    // ===== Batches =====

    /// Holds back anchoring, here and in every mounted archive written to,
    /// until the batch is committed or cancelled.
    pub async fn begin_batch(&self) -> Result<()> {
        {
            let mut batch = self.inner.batch.lock();

            if batch.is_some() {
                return Err(Error::BatchInProgress);
            }

            *batch = Some(Vec::new());
        }

        self.inner.controller.suspend_anchoring().await;

        debug!(anchor_id=%self.anchor_id(), "Batch started");

        Ok(())
    }

    #[must_use]
    pub fn batch_in_progress(&self) -> bool {
        self.inner.batch.lock().is_some()
    }

    /// Anchors everything written during the batch: this archive first,
    /// then each mounted archive it touched, most recent first. A mounted
    /// archive failing to anchor is logged and does not stop the others.
    pub async fn commit_batch(&self) -> Result<AnchorOutcome> {
        let mut touched = self.take_batch()?;

        let outcome = {
            let _gate = self.inner.gate.read().await;

            self.inner.controller.resume_anchoring().await;
            self.inner.controller.anchor_changes().await
        };

        let mounted = touched.len();

        while let Some(archive) = touched.pop() {
            let _gate = archive.inner.gate.read().await;

            archive.inner.controller.resume_anchoring().await;

            if let Err(err) = archive.inner.controller.anchor_changes().await {
                warn!(anchor_id=%archive.anchor_id(), %err, "Failed to anchor mounted archive");
            }
        }

        info!(anchor_id=%self.anchor_id(), mounted, "Batch committed");

        Ok(outcome?)
    }

    /// Drops everything written during the batch, here and in every mounted
    /// archive it touched.
    pub async fn cancel_batch(&self) -> Result<()> {
        let mut touched = self.take_batch()?;

        let reloaded = {
            let _gate = self.inner.gate.write().await;

            let reloaded = self.inner.controller.reload().await;
            self.inner.controller.resume_anchoring().await;
            reloaded
        };

        while let Some(archive) = touched.pop() {
            let _gate = archive.inner.gate.write().await;

            if let Err(err) = archive.inner.controller.reload().await {
                warn!(anchor_id=%archive.anchor_id(), %err, "Failed to reload mounted archive");
            }

            archive.inner.controller.resume_anchoring().await;
        }

        info!(anchor_id=%self.anchor_id(), "Batch cancelled");

        Ok(reloaded?)
    }

    fn take_batch(&self) -> Result<Vec<Self>> {
        self.inner.batch.lock().take().ok_or(Error::BatchNotStarted)
    }
}
