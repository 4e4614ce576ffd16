use bricks_primitives::{AnchorValue, HashLink, KeySsi, SeedSsi};
use camino::Utf8Path;

use super::*;

fn version(tag: &str) -> HashLink {
    HashLink::of("test", tag.as_bytes())
}

// ============================================================
// Brick Storage
// ============================================================

#[tokio::test]
async fn test_memory_storage_round_trip() {
    let storage = MemoryBrickStorage::new();

    let brick = storage.put("domain", b"hello").await.unwrap();
    let again = storage.put("domain", b"hello").await.unwrap();

    assert_eq!(brick, again);
    assert_eq!(brick.size, Some(5));
    assert_eq!(storage.len(), 1);
    assert!(storage.exists(&brick.hash_link).await.unwrap());

    let data = storage.get(&brick.hash_link).await.unwrap();
    assert_eq!(verify(&brick, data).unwrap(), b"hello");
}

#[tokio::test]
async fn test_same_bytes_in_other_domain_is_another_brick() {
    let storage = MemoryBrickStorage::new();

    let ours = storage.put("ours", b"data").await.unwrap();
    let theirs = storage.put("theirs", b"data").await.unwrap();

    assert_ne!(ours.hash_link, theirs.hash_link);
    assert_eq!(ours.check_sum, theirs.check_sum);
}

#[tokio::test]
async fn test_memory_storage_missing_brick() {
    let storage = MemoryBrickStorage::new();
    let brick = storage.put("domain", b"gone").await.unwrap();

    assert!(storage.remove(&brick.hash_link));

    assert!(!storage.exists(&brick.hash_link).await.unwrap());
    assert!(matches!(
        storage.get(&brick.hash_link).await,
        Err(StorageError::NotFound(link)) if link == brick.hash_link
    ));
}

#[tokio::test]
async fn test_fs_storage_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap().join("bricks");

    let storage = FsBrickStorage::new(&root).await.unwrap();
    let brick = storage.put("domain", b"on disk").await.unwrap();

    assert!(storage.exists(&brick.hash_link).await.unwrap());
    assert_eq!(storage.get(&brick.hash_link).await.unwrap(), b"on disk");

    let reopened = FsBrickStorage::new(&root).await.unwrap();
    assert_eq!(reopened.get(&brick.hash_link).await.unwrap(), b"on disk");
}

#[tokio::test]
async fn test_fs_storage_detects_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap();

    let storage = FsBrickStorage::new(root).await.unwrap();
    let brick = storage.put("domain", b"original").await.unwrap();

    tokio::fs::write(root.join(brick.hash_link.to_string()), b"tampered")
        .await
        .unwrap();

    let data = storage.get(&brick.hash_link).await.unwrap();

    assert!(matches!(
        verify(&brick, data.clone()),
        Err(StorageError::ChecksumMismatch(_))
    ));
    assert!(matches!(
        verify_link("domain", &brick.hash_link, data),
        Err(StorageError::ChecksumMismatch(_))
    ));
}

// ============================================================
// Anchoring
// ============================================================

#[tokio::test]
async fn test_anchor_chain_appends_in_order() {
    let backend = MemoryAnchoringBackend::new();
    let ssi = SeedSsi::from_seed("domain", [7; 32]);
    let id = ssi.anchor_id();

    backend
        .create(&id, AnchorValue::signed(&ssi, version("v1"), None))
        .await
        .unwrap();
    backend
        .append(
            &id,
            AnchorValue::signed(&ssi, version("v2"), Some(version("v1"))),
        )
        .await
        .unwrap();

    let last = backend.get_last_version(&id).await.unwrap().unwrap();
    assert_eq!(last.hash_link, version("v2"));

    let all = backend.get_all_versions(&id).await.unwrap();
    assert_eq!(
        all.iter().map(|value| value.hash_link).collect::<Vec<_>>(),
        vec![version("v1"), version("v2")]
    );
}

#[tokio::test]
async fn test_append_with_stale_previous_is_refused() {
    let backend = MemoryAnchoringBackend::new();
    let ssi = SeedSsi::from_seed("domain", [7; 32]);
    let id = ssi.anchor_id();

    backend
        .create(&id, AnchorValue::signed(&ssi, version("v1"), None))
        .await
        .unwrap();
    backend
        .append(
            &id,
            AnchorValue::signed(&ssi, version("v2"), Some(version("v1"))),
        )
        .await
        .unwrap();

    let err = backend
        .append(
            &id,
            AnchorValue::signed(&ssi, version("v3"), Some(version("v1"))),
        )
        .await
        .unwrap_err();

    assert!(err.is_stale());
    assert!(matches!(
        err,
        AnchoringError::StaleVersion { expected, actual }
            if expected == Some(version("v1")) && actual == Some(version("v2"))
    ));
    assert_eq!(backend.get_all_versions(&id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_twice_and_append_to_missing_anchor() {
    let backend = MemoryAnchoringBackend::new();
    let ssi = SeedSsi::from_seed("domain", [1; 32]);
    let id = ssi.anchor_id();

    assert!(matches!(
        backend
            .append(&id, AnchorValue::signed(&ssi, version("v1"), None))
            .await,
        Err(AnchoringError::NotFound(_))
    ));

    backend
        .create(&id, AnchorValue::signed(&ssi, version("v1"), None))
        .await
        .unwrap();

    assert!(matches!(
        backend
            .create(&id, AnchorValue::signed(&ssi, version("v1"), None))
            .await,
        Err(AnchoringError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_values_signed_by_another_key_are_refused() {
    let backend = MemoryAnchoringBackend::new();
    let owner = SeedSsi::from_seed("domain", [1; 32]);
    let intruder = SeedSsi::from_seed("domain", [2; 32]);

    assert!(matches!(
        backend
            .create(
                &owner.anchor_id(),
                AnchorValue::signed(&intruder, version("v1"), None)
            )
            .await,
        Err(AnchoringError::InvalidSignature(_))
    ));
}

#[tokio::test]
async fn test_recovery_flag() {
    let backend = MemoryAnchoringBackend::new();
    let id = SeedSsi::from_seed("domain", [3; 32]).anchor_id();

    assert!(!backend.is_in_recovery(&id).await.unwrap());

    backend.set_recovery(&id, true);
    assert!(backend.is_in_recovery(&id).await.unwrap());

    backend.set_recovery(&id, false);
    assert!(!backend.is_in_recovery(&id).await.unwrap());
}
