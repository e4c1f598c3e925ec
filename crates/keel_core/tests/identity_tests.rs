use keel_core::identity::verify;
use keel_core::{CoreError, IdentityContext, IdentityState};
use keel_store::{FileBackend, KeyStore, MemoryBackend, StorageBackend};
use std::sync::Arc;
use tempfile::tempdir;

fn file_context(dir: &std::path::Path, backup: Arc<MemoryBackend>) -> IdentityContext {
    let store = KeyStore::new(
        "identity",
        vec![Arc::new(FileBackend::new(dir)) as Arc<dyn StorageBackend>, backup],
    )
    .unwrap();
    IdentityContext::new(Arc::new(store), true)
}

#[tokio::test]
async fn first_launch_then_restart() {
    let dir = tempdir().unwrap();
    let backup = Arc::new(MemoryBackend::new("backup"));

    let first = file_context(dir.path(), backup.clone());
    let created = first.initialize().await.unwrap();
    assert!(created.is_new_identity);
    let fingerprint = first.fingerprint().await.unwrap();
    drop(first);

    let second = file_context(dir.path(), backup);
    let restored = second.initialize().await.unwrap();
    assert!(!restored.is_new_identity);
    assert_eq!(restored.public_key, created.public_key);
    assert_eq!(second.fingerprint().await.unwrap(), fingerprint);
}

#[tokio::test]
async fn primary_loss_is_repaired_from_backup() {
    let dir = tempdir().unwrap();
    let backup = Arc::new(MemoryBackend::new("backup"));
    let created = file_context(dir.path(), backup.clone()).initialize().await.unwrap();

    let path = FileBackend::new(dir.path()).slot_path("identity");
    std::fs::remove_file(&path).unwrap();

    let ctx = file_context(dir.path(), backup);
    let restored = ctx.initialize().await.unwrap();
    assert!(!restored.is_new_identity);
    assert_eq!(restored.public_key, created.public_key);
    assert!(path.exists());
}

#[tokio::test]
async fn idempotent_initialize_does_not_write() {
    let primary = Arc::new(MemoryBackend::new("primary"));
    let store = KeyStore::new("identity", vec![primary.clone() as Arc<dyn StorageBackend>]).unwrap();
    let ctx = IdentityContext::new(Arc::new(store), true);

    let first = ctx.initialize().await.unwrap();
    let writes = primary.writes();
    for _ in 0..5 {
        let again = ctx.initialize().await.unwrap();
        assert!(!again.is_new_identity);
        assert_eq!(again.public_key, first.public_key);
    }
    assert_eq!(primary.writes(), writes);
}

#[tokio::test]
async fn signatures_verify_against_public_key() {
    let ctx = IdentityContext::new(
        Arc::new(KeyStore::new("identity", vec![Arc::new(MemoryBackend::new("m")) as Arc<dyn StorageBackend>]).unwrap()),
        true,
    );
    let sig = ctx.sign("nonce-123").await.unwrap();
    let public = ctx.public_key().await.unwrap();
    verify(&public, "nonce-123", &sig).unwrap();
    assert!(matches!(
        verify(&public, "nonce-124", &sig),
        Err(CoreError::Crypto(_))
    ));
}

#[tokio::test]
async fn clear_then_initialize_creates_new_identity() {
    let tier = Arc::new(MemoryBackend::new("m"));
    let ctx = IdentityContext::new(
        Arc::new(KeyStore::new("identity", vec![tier.clone() as Arc<dyn StorageBackend>]).unwrap()),
        true,
    );
    let old = ctx.initialize().await.unwrap();
    ctx.clear().await;
    assert_eq!(ctx.state().await, IdentityState::Uninitialized);
    let new = ctx.initialize().await.unwrap();
    assert!(new.is_new_identity);
    assert_ne!(new.public_key, old.public_key);
}

#[tokio::test]
async fn clear_swallows_tier_failures() {
    let tier = Arc::new(MemoryBackend::new("m"));
    let ctx = IdentityContext::new(
        Arc::new(KeyStore::new("identity", vec![tier.clone() as Arc<dyn StorageBackend>]).unwrap()),
        true,
    );
    ctx.initialize().await.unwrap();
    tier.set_fail_removes(true);
    ctx.clear().await;
    assert!(ctx.fingerprint().await.is_none());
}
