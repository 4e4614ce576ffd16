//! Archive tests over in-memory and filesystem brick storage.
//!
//! Tests cover:
//! - Chunked writes, streamed reads and appends
//! - Embedded files and checksum failures on read
//! - Mount point routing
//! - Batches, including mounted archives they touch
//! - Refreshing and cancelling pending changes, and operations queued behind them
//! - Opening an archive from a saved configuration

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bricks_config::{AnchoringConfig, CacheConfig, ConfigFile, StorageConfig};
use bricks_controller::AnchorOutcome;
use bricks_map::NodeKind;
use bricks_primitives::{AnchorId, AnchorValue, BrickRef, HashLink, SeedSsi};
use bricks_store::{
    AnchoringBackend, AnchoringError, BrickStorage, FsBrickStorage, MemoryAnchoringBackend,
    MemoryBrickStorage, StorageError,
};
use camino::Utf8PathBuf;
use futures_util::TryStreamExt;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use super::*;

/// Log output for a failing test, with `RUST_LOG=bricks_archive=debug`.
fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}

/// Brick storage that can start handing back damaged bricks.
#[derive(Debug, Default)]
struct CorruptingStorage {
    inner: MemoryBrickStorage,
    corrupt: Mutex<bool>,
}

#[async_trait]
impl BrickStorage for CorruptingStorage {
    async fn put(&self, domain: &str, data: &[u8]) -> Result<BrickRef, StorageError> {
        self.inner.put(domain, data).await
    }

    async fn get(&self, link: &HashLink) -> Result<Vec<u8>, StorageError> {
        let mut data = self.inner.get(link).await?;

        if *self.corrupt.lock() {
            if let Some(byte) = data.first_mut() {
                *byte ^= 0xff;
            }
        }

        Ok(data)
    }

    async fn exists(&self, link: &HashLink) -> Result<bool, StorageError> {
        self.inner.exists(link).await
    }
}

/// Anchoring backend that can hold up and count lookups of the latest
/// version, forwarding everything else.
#[derive(Debug, Default)]
struct SlowBackend {
    inner: Arc<MemoryAnchoringBackend>,
    delay: Mutex<Option<Duration>>,
    lookups: Mutex<usize>,
}

impl SlowBackend {
    fn hold_lookups(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
        *self.lookups.lock() = 0;
    }

    fn lookups(&self) -> usize {
        *self.lookups.lock()
    }

    async fn wait_for_lookup(&self) {
        while self.lookups() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl AnchoringBackend for SlowBackend {
    async fn get_last_version(
        &self,
        id: &AnchorId,
    ) -> Result<Option<AnchorValue>, AnchoringError> {
        *self.lookups.lock() += 1;

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.inner.get_last_version(id).await
    }

    async fn get_all_versions(&self, id: &AnchorId) -> Result<Vec<AnchorValue>, AnchoringError> {
        self.inner.get_all_versions(id).await
    }

    async fn create(&self, id: &AnchorId, value: AnchorValue) -> Result<(), AnchoringError> {
        self.inner.create(id, value).await
    }

    async fn append(&self, id: &AnchorId, value: AnchorValue) -> Result<(), AnchoringError> {
        self.inner.append(id, value).await
    }

    async fn is_in_recovery(&self, id: &AnchorId) -> Result<bool, AnchoringError> {
        self.inner.is_in_recovery(id).await
    }
}

struct Harness {
    storage: Arc<CorruptingStorage>,
    backend: Arc<MemoryAnchoringBackend>,
}

impl Harness {
    fn new() -> Self {
        init_tracing();

        Self {
            storage: Arc::default(),
            backend: Arc::default(),
        }
    }

    /// A builder signing with the key derived from `seed`, so archives
    /// opened with the same seed share an anchor id.
    fn builder(&self, seed: u8) -> ArchiveBuilder {
        Archive::builder(
            Arc::new(SeedSsi::from_seed("test", [seed; 32])),
            self.storage.clone(),
            self.backend.clone(),
        )
    }

    /// Like [`Harness::builder`], with head lookups going through `slow`.
    fn slow_builder(&self, seed: u8, slow: &Arc<SlowBackend>) -> ArchiveBuilder {
        Archive::builder(
            Arc::new(SeedSsi::from_seed("test", [seed; 32])),
            self.storage.clone(),
            slow.clone(),
        )
    }

    fn slow_backend(&self) -> Arc<SlowBackend> {
        Arc::new(SlowBackend {
            inner: self.backend.clone(),
            ..SlowBackend::default()
        })
    }

    async fn create(&self, seed: u8, chunk_size: usize) -> Archive {
        self.builder(seed)
            .config(config(chunk_size, AnchoringConfig::default()))
            .create()
            .await
            .unwrap()
    }
}

fn config(chunk_size: usize, anchoring: AnchoringConfig) -> ConfigFile {
    ConfigFile::new(chunk_size, anchoring, CacheConfig::default(), None)
}

async fn versions(archive: &Archive) -> usize {
    archive.history().await.unwrap().len()
}

// ============================================================
// File content
// ============================================================

#[tokio::test]
async fn test_file_is_split_into_bricks_and_read_back() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive
        .write_file("/docs/story.txt", b"hello brick world")
        .await
        .unwrap();

    let bricks = archive.get_bricks_meta("/docs/story.txt").await.unwrap();
    assert_eq!(bricks.len(), 5);
    assert_eq!(bricks[4].size, Some(1));

    let content = archive.read_file("/docs/story.txt").await.unwrap();
    assert_eq!(content, b"hello brick world");

    let chunks: Vec<Vec<u8>> = archive
        .read_stream("/docs/story.txt")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks.first().map(Vec::as_slice), Some(&b"hell"[..]));
}

#[tokio::test]
async fn test_empty_file_has_no_bricks() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.write_file("/empty", b"").await.unwrap();

    assert!(archive.get_bricks_meta("/empty").await.unwrap().is_empty());
    assert!(archive.read_file("/empty").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_append_adds_new_bricks() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.write_file("/log", b"abcdef").await.unwrap();
    archive.append_to_file("/log", b"gh").await.unwrap();

    assert_eq!(archive.get_bricks_meta("/log").await.unwrap().len(), 3);
    assert_eq!(archive.read_file("/log").await.unwrap(), b"abcdefgh");
}

#[tokio::test]
async fn test_big_file_append_fills_last_brick_first() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.write_file("/big", b"abcdef").await.unwrap();
    archive.append_big_file("/big", b"ghij").await.unwrap();

    let sizes: Vec<_> = archive
        .get_bricks_meta("/big")
        .await
        .unwrap()
        .iter()
        .map(|brick| brick.size)
        .collect();
    assert_eq!(sizes, [Some(4), Some(4), Some(2)]);
    assert_eq!(archive.read_file("/big").await.unwrap(), b"abcdefghij");
}

#[tokio::test]
async fn test_big_file_append_to_full_bricks_only_appends() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.write_file("/big", b"abcd").await.unwrap();
    archive.append_big_file("/big", b"ef").await.unwrap();

    let bricks = archive.get_bricks_meta("/big").await.unwrap();
    assert_eq!(bricks.len(), 2);
    assert_eq!(archive.read_file("/big").await.unwrap(), b"abcdef");
}

#[tokio::test]
async fn test_embedded_file_is_read_from_the_map() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.embed_file("/notes", b"short").await.unwrap();
    archive.append_to_embedded_file("/notes", b" note").await.unwrap();

    assert_eq!(archive.read_file("/notes").await.unwrap(), b"short note");

    let stat = archive.stat("/notes").await.unwrap();
    assert_eq!(stat.kind, NodeKind::Embedded);

    let err = archive.get_bricks_meta("/notes").await.unwrap_err();
    assert!(matches!(err, Error::Map(bricks_map::Error::TypeConflict { .. })));
}

#[tokio::test]
async fn test_damaged_brick_fails_the_read() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.write_file("/data", b"payload").await.unwrap();
    *harness.storage.corrupt.lock() = true;

    let err = archive.read_file("/data").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Storage(StorageError::ChecksumMismatch(_))
    ));
}

#[tokio::test]
async fn test_reading_a_folder_fails() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.create_folder("/dir").await.unwrap();

    assert!(archive.read_file("/dir").await.is_err());
    assert!(matches!(
        archive.read_file("/missing").await,
        Err(Error::Map(bricks_map::Error::NotFound(_)))
    ));
}

// ============================================================
// Tree
// ============================================================

#[tokio::test]
async fn test_tree_operations() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.write_file("/a/one.txt", b"one").await.unwrap();
    archive.create_file("/a/two.txt").await.unwrap();
    archive.clone_path("/a", "/b").await.unwrap();
    archive.rename("/a/one.txt", "/a/uno.txt").await.unwrap();
    archive.truncate("/b/one.txt").await.unwrap();
    archive.delete("/a/two.txt").await.unwrap();

    assert_eq!(
        archive.list_files("/", true).await.unwrap(),
        ["/a/uno.txt", "/b/one.txt", "/b/two.txt"]
    );
    assert_eq!(archive.list_folders("/", false).await.unwrap(), ["/a", "/b"]);
    assert!(archive.read_file("/b/one.txt").await.unwrap().is_empty());
    assert_eq!(archive.read_file("/a/uno.txt").await.unwrap(), b"one");

    let stat = archive.stat("/").await.unwrap();
    assert_eq!(stat.kind, NodeKind::Directory);
}

#[tokio::test]
async fn test_malformed_path_is_refused() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    assert!(matches!(
        archive.write_file("/", b"x").await,
        Err(Error::Map(bricks_map::Error::InvalidPath(_)))
    ));
}

// ============================================================
// Mounts
// ============================================================

#[tokio::test]
async fn test_paths_below_mount_point_go_to_mounted_archive() {
    let harness = Harness::new();
    let table = Arc::new(MountTable::new());

    let parent = harness
        .builder(1)
        .manifest(table.clone())
        .create()
        .await
        .unwrap();
    let child = harness.create(2, 4).await;

    assert!(table.mount("/mnt", child.clone()).unwrap().is_none());

    parent.write_file("/own.txt", b"mine").await.unwrap();
    parent
        .write_file("/mnt/docs/theirs.txt", b"theirs")
        .await
        .unwrap();

    assert_eq!(parent.list_files("/", true).await.unwrap(), ["/own.txt"]);
    assert_eq!(
        parent.list_files("/mnt", true).await.unwrap(),
        ["/mnt/docs/theirs.txt"]
    );
    assert_eq!(
        parent.list_folders("/mnt", false).await.unwrap(),
        ["/mnt/docs"]
    );
    assert_eq!(
        child.list_files("/", true).await.unwrap(),
        ["/docs/theirs.txt"]
    );
    assert_eq!(
        parent.read_file("/mnt/docs/theirs.txt").await.unwrap(),
        b"theirs"
    );

    assert!(table.unmount("/mnt").unwrap().is_some());
    assert!(parent.list_files("/mnt", true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deepest_mount_point_wins() {
    let harness = Harness::new();
    let table = Arc::new(MountTable::new());

    let parent = harness
        .builder(1)
        .manifest(table.clone())
        .create()
        .await
        .unwrap();
    let outer = harness.create(2, 4).await;
    let inner = harness.create(3, 4).await;

    table.mount("/mnt", outer.clone()).unwrap();
    table.mount("/mnt/deep", inner.clone()).unwrap();

    parent.write_file("/mnt/deep/file", b"x").await.unwrap();

    assert_eq!(inner.list_files("/", true).await.unwrap(), ["/file"]);
    assert!(outer.list_files("/", true).await.unwrap().is_empty());
    assert_eq!(table.mount_points().len(), 2);
}

#[tokio::test]
async fn test_rename_across_archives_is_refused() {
    let harness = Harness::new();
    let table = Arc::new(MountTable::new());

    let parent = harness
        .builder(1)
        .manifest(table.clone())
        .create()
        .await
        .unwrap();
    table.mount("/mnt", harness.create(2, 4).await).unwrap();

    parent.write_file("/a.txt", b"a").await.unwrap();

    let err = parent.rename("/a.txt", "/mnt/a.txt").await.unwrap_err();
    assert!(matches!(err, Error::CrossArchive { .. }));
    assert_eq!(parent.list_files("/", true).await.unwrap(), ["/a.txt"]);
}

// ============================================================
// Batches
// ============================================================

#[tokio::test]
async fn test_batch_anchors_once_on_commit() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.begin_batch().await.unwrap();
    assert!(archive.batch_in_progress());

    archive.write_file("/one", b"1").await.unwrap();
    archive.write_file("/two", b"2").await.unwrap();
    assert_eq!(versions(&archive).await, 1);

    let outcome = archive.commit_batch().await.unwrap();
    assert!(outcome.anchored().is_some());
    assert!(!archive.batch_in_progress());
    assert_eq!(versions(&archive).await, 2);

    archive.write_file("/three", b"3").await.unwrap();
    assert_eq!(versions(&archive).await, 3);
}

#[tokio::test]
async fn test_batch_misuse_is_refused() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    assert!(matches!(
        archive.commit_batch().await,
        Err(Error::BatchNotStarted)
    ));
    assert!(matches!(
        archive.cancel_batch().await,
        Err(Error::BatchNotStarted)
    ));

    archive.begin_batch().await.unwrap();
    assert!(matches!(
        archive.begin_batch().await,
        Err(Error::BatchInProgress)
    ));
}

#[tokio::test]
async fn test_empty_batch_has_nothing_to_anchor() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.begin_batch().await.unwrap();

    assert_eq!(
        archive.commit_batch().await.unwrap(),
        AnchorOutcome::NothingToAnchor
    );
}

#[tokio::test]
async fn test_cancelled_batch_drops_its_changes() {
    let harness = Harness::new();
    let archive = harness.create(1, 4).await;

    archive.write_file("/kept", b"k").await.unwrap();

    archive.begin_batch().await.unwrap();
    archive.write_file("/dropped", b"d").await.unwrap();
    archive.cancel_batch().await.unwrap();

    assert_eq!(archive.list_files("/", true).await.unwrap(), ["/kept"]);
    assert_eq!(archive.controller().pending_operations().await, 0);

    archive.write_file("/after", b"a").await.unwrap();
    assert_eq!(versions(&archive).await, 3);
}

#[tokio::test]
async fn test_batch_holds_back_mounted_archives_too() {
    let harness = Harness::new();
    let table = Arc::new(MountTable::new());

    let parent = harness
        .builder(1)
        .manifest(table.clone())
        .create()
        .await
        .unwrap();
    let child = harness.create(2, 4).await;
    table.mount("/mnt", child.clone()).unwrap();

    parent.begin_batch().await.unwrap();
    parent.write_file("/own", b"o").await.unwrap();
    parent.write_file("/mnt/one", b"1").await.unwrap();
    parent.write_file("/mnt/two", b"2").await.unwrap();

    assert_eq!(versions(&child).await, 1);
    assert_eq!(child.controller().pending_operations().await, 2);

    parent.commit_batch().await.unwrap();

    assert_eq!(versions(&parent).await, 2);
    assert_eq!(versions(&child).await, 2);
    assert_eq!(
        child.list_files("/", true).await.unwrap(),
        ["/one", "/two"]
    );

    child.write_file("/three", b"3").await.unwrap();
    assert_eq!(versions(&child).await, 3);
}

#[tokio::test]
async fn test_cancelled_batch_drops_mounted_changes() {
    let harness = Harness::new();
    let table = Arc::new(MountTable::new());

    let parent = harness
        .builder(1)
        .manifest(table.clone())
        .create()
        .await
        .unwrap();
    let child = harness.create(2, 4).await;
    table.mount("/mnt", child.clone()).unwrap();

    parent.begin_batch().await.unwrap();
    parent.write_file("/mnt/one", b"1").await.unwrap();
    parent.cancel_batch().await.unwrap();

    assert!(child.list_files("/", true).await.unwrap().is_empty());
    assert_eq!(versions(&child).await, 1);
}

// ============================================================
// Versions
// ============================================================

#[tokio::test]
async fn test_refresh_picks_up_remote_versions() {
    let harness = Harness::new();
    let first = harness.create(1, 4).await;
    let second = harness.builder(1).load().await.unwrap();

    first.write_file("/remote", b"r").await.unwrap();
    assert!(second.list_files("/", true).await.unwrap().is_empty());

    second.refresh().await.unwrap();
    assert_eq!(second.list_files("/", true).await.unwrap(), ["/remote"]);
    assert_eq!(second.read_file("/remote").await.unwrap(), b"r");
}

#[tokio::test]
async fn test_cancel_drops_pending_changes() {
    let harness = Harness::new();

    let mut anchoring = AnchoringConfig::default();
    anchoring.auto_anchor = false;

    let archive = harness
        .builder(1)
        .config(config(4, anchoring))
        .create()
        .await
        .unwrap();

    archive.write_file("/draft", b"d").await.unwrap();
    assert_eq!(archive.controller().pending_operations().await, 1);

    archive.cancel().await.unwrap();
    assert!(archive.list_files("/", true).await.unwrap().is_empty());

    archive.write_file("/final", b"f").await.unwrap();
    assert!(archive.anchor().await.unwrap().anchored().is_some());
    assert_eq!(versions(&archive).await, 2);
}

#[tokio::test]
async fn test_operations_during_refresh_wait_and_see_its_result() {
    let harness = Harness::new();
    let first = harness.create(1, 4).await;
    let slow = harness.slow_backend();
    let second = harness.slow_builder(1, &slow).load().await.unwrap();

    first.write_file("/remote", b"r").await.unwrap();

    slow.hold_lookups(Duration::from_millis(200));

    let refresh = tokio::spawn({
        let second = second.clone();
        async move { second.refresh().await }
    });

    slow.wait_for_lookup().await;

    let (listed, written) = tokio::join!(
        second.list_files("/", true),
        second.write_file("/local", b"l"),
    );
    refresh.await.unwrap().unwrap();

    assert!(listed.unwrap().contains(&"/remote".to_owned()));
    written.unwrap();

    // The write went on top of the refreshed version without a stale retry.
    assert_eq!(slow.lookups(), 1);
    assert_eq!(second.list_files("/", true).await.unwrap(), ["/local", "/remote"]);
    assert_eq!(second.read_file("/remote").await.unwrap(), b"r");
    assert_eq!(versions(&second).await, 3);
}

#[tokio::test]
async fn test_operations_during_cancel_wait_and_see_its_result() {
    let harness = Harness::new();
    let first = harness.create(1, 4).await;
    let slow = harness.slow_backend();

    let mut anchoring = AnchoringConfig::default();
    anchoring.auto_anchor = false;

    let second = harness
        .slow_builder(1, &slow)
        .config(config(4, anchoring))
        .load()
        .await
        .unwrap();

    first.write_file("/remote", b"r").await.unwrap();
    second.write_file("/draft", b"d").await.unwrap();

    slow.hold_lookups(Duration::from_millis(200));

    let cancel = tokio::spawn({
        let second = second.clone();
        async move { second.cancel().await }
    });

    slow.wait_for_lookup().await;

    let (listed, written) = tokio::join!(
        second.list_files("/", true),
        second.write_file("/after", b"a"),
    );
    cancel.await.unwrap().unwrap();

    let listed = listed.unwrap();
    assert!(listed.contains(&"/remote".to_owned()));
    assert!(!listed.contains(&"/draft".to_owned()));
    written.unwrap();

    assert_eq!(second.list_files("/", true).await.unwrap(), ["/after", "/remote"]);
    assert_eq!(second.controller().pending_operations().await, 1);
}

#[tokio::test]
async fn test_opened_from_saved_config_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap();

    let saved = ConfigFile::new(
        8,
        AnchoringConfig::default(),
        CacheConfig::default(),
        Some(StorageConfig::new(root.join("bricks"))),
    );
    saved.save(&root).unwrap();

    let config = ConfigFile::load(&root).unwrap();
    let bricks = config.storage.as_ref().unwrap().path.clone();

    let ssi = Arc::new(SeedSsi::from_seed("test", [9; 32]));
    let backend: Arc<dyn AnchoringBackend> = Arc::new(MemoryAnchoringBackend::default());

    let archive = Archive::builder(
        ssi.clone(),
        Arc::new(FsBrickStorage::new(&bricks).await.unwrap()),
        backend.clone(),
    )
    .config(config.clone())
    .create()
    .await
    .unwrap();
    assert_eq!(archive.chunk_size(), 8);

    archive
        .write_file("/disk/file.bin", b"stored in twenty-two")
        .await
        .unwrap();

    let reopened = Archive::builder(
        ssi,
        Arc::new(FsBrickStorage::new(&bricks).await.unwrap()),
        backend,
    )
    .config(config)
    .load()
    .await
    .unwrap();

    assert_eq!(reopened.anchor_id(), archive.anchor_id());
    assert_eq!(
        reopened.read_file("/disk/file.bin").await.unwrap(),
        b"stored in twenty-two"
    );
}
