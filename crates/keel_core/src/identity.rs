//! The device's active signing identity.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized ──initialize──▶ Restoring ──record ok──▶ Ready
//!                                   │
//!                                   └──absent / corrupt──▶ Generating ──▶ Ready
//! Ready ──clear──▶ Cleared ──▶ Uninitialized
//! ```
//!
//! Storage problems inside `initialize` never reach the caller: an unreadable
//! record is replaced by a fresh identity (the old one is orphaned) unless
//! `regenerate_on_corrupt` is off. Losing an old identity is preferred over
//! blocking the device.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use keel_crypto::{IdentityKeyPair, PublicIdentity};
use keel_store::{KeyRecord, KeyStore, LoadOutcome};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    Uninitialized,
    Restoring,
    Generating,
    Ready,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOutcome {
    pub is_new_identity: bool,
    /// Public key as JWK.
    pub public_key: String,
}

struct Inner {
    state: IdentityState,
    keypair: Option<IdentityKeyPair>,
}

impl Inner {
    fn ready(&mut self, keypair: IdentityKeyPair, is_new_identity: bool) -> InitOutcome {
        let public_key = keypair.public_jwk().to_string();
        self.keypair = Some(keypair);
        self.state = IdentityState::Ready;
        InitOutcome {
            is_new_identity,
            public_key,
        }
    }

    fn reset(&mut self) {
        self.keypair = None;
        self.state = IdentityState::Uninitialized;
    }
}

pub struct IdentityContext {
    store: Arc<KeyStore>,
    regenerate_on_corrupt: bool,
    inner: Mutex<Inner>,
}

impl IdentityContext {
    pub fn new(store: Arc<KeyStore>, regenerate_on_corrupt: bool) -> Self {
        Self {
            store,
            regenerate_on_corrupt,
            inner: Mutex::new(Inner {
                state: IdentityState::Uninitialized,
                keypair: None,
            }),
        }
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    pub async fn state(&self) -> IdentityState {
        self.inner.lock().await.state
    }

    /// Restore the stored identity or create one. Idempotent once `Ready`.
    pub async fn initialize(&self) -> Result<InitOutcome, CoreError> {
        let mut inner = self.inner.lock().await;
        self.initialize_locked(&mut inner).await
    }

    async fn initialize_locked(&self, inner: &mut Inner) -> Result<InitOutcome, CoreError> {
        if inner.state == IdentityState::Ready {
            if let Some(keypair) = &inner.keypair {
                return Ok(InitOutcome {
                    is_new_identity: false,
                    public_key: keypair.public_jwk().to_string(),
                });
            }
        }

        inner.state = IdentityState::Restoring;
        let mut corrupt = false;
        match self.store.load_outcome().await {
            LoadOutcome::Found { record, rank } => match record.to_keypair() {
                Ok(keypair) => {
                    info!(
                        rank,
                        fingerprint = %keypair.public().fingerprint(),
                        "restored device identity"
                    );
                    return Ok(inner.ready(keypair, false));
                }
                Err(e) => {
                    warn!(error = %e, "stored identity failed to import");
                    corrupt = true;
                }
            },
            LoadOutcome::Corrupt => corrupt = true,
            LoadOutcome::Absent => {}
        }

        if corrupt && !self.regenerate_on_corrupt {
            inner.reset();
            return Err(CoreError::CorruptIdentity);
        }
        if corrupt {
            warn!("stored identity unreadable; generating a replacement (previous identity is orphaned)");
        }

        inner.state = IdentityState::Generating;
        let keypair = IdentityKeyPair::generate();
        let record = KeyRecord::from_keypair(&keypair);
        if let Err(e) = self.store.save(&record).await {
            warn!(error = %e, "new identity could not be persisted; it will not survive a restart");
        }
        info!(fingerprint = %keypair.public().fingerprint(), "generated device identity");
        Ok(inner.ready(keypair, true))
    }

    /// Sign the UTF-8 bytes of `challenge`; base64 raw `r || s`.
    pub async fn sign(&self, challenge: &str) -> Result<String, CoreError> {
        let mut inner = self.inner.lock().await;
        self.initialize_locked(&mut inner).await?;
        let keypair = inner.keypair.as_ref().ok_or(CoreError::IdentityNotFound)?;
        Ok(keypair.sign_challenge(challenge))
    }

    /// First 8 characters of the JWK `x` coordinate; `None` until `Ready`.
    pub async fn fingerprint(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.keypair.as_ref().map(|kp| kp.public().fingerprint())
    }

    pub async fn public_key(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.keypair.as_ref().map(|kp| kp.public_jwk().to_string())
    }

    /// Wipe the in-memory key and every storage tier. Never fails.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        self.clear_locked(&mut inner).await;
    }

    async fn clear_locked(&self, inner: &mut Inner) {
        inner.keypair = None;
        inner.state = IdentityState::Cleared;
        self.store.clear().await;
        inner.reset();
        info!("device identity cleared");
    }

    /// Replace the current identity with `record`: clear, persist, then
    /// re-initialize from storage. If persisting fails the device is left
    /// with no identity at all, never with the previous one.
    pub async fn replace(&self, record: &KeyRecord) -> Result<InitOutcome, CoreError> {
        let expected = record.to_keypair()?.public().clone();
        let mut inner = self.inner.lock().await;
        self.clear_locked(&mut inner).await;
        if let Err(e) = self.store.save(record).await {
            self.store.clear().await;
            return Err(e.into());
        }
        let outcome = self.initialize_locked(&mut inner).await?;
        if outcome.public_key != expected.to_jwk() {
            warn!("imported identity did not become active after re-initialisation");
            self.clear_locked(&mut inner).await;
            return Err(CoreError::IdentityNotFound);
        }
        Ok(outcome)
    }
}

/// Check a base64 challenge signature against a public JWK.
pub fn verify(public_jwk: &str, challenge: &str, signature_b64: &str) -> Result<(), CoreError> {
    PublicIdentity::from_jwk(public_jwk)?.verify_challenge(challenge, signature_b64)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_store::{MemoryBackend, StorageBackend};

    fn context(regenerate: bool) -> (Arc<MemoryBackend>, Arc<MemoryBackend>, IdentityContext) {
        let primary = Arc::new(MemoryBackend::new("primary"));
        let backup = Arc::new(MemoryBackend::new("backup"));
        let store = KeyStore::new(
            "identity",
            vec![primary.clone() as Arc<dyn StorageBackend>, backup.clone()],
        )
        .unwrap();
        (primary, backup, IdentityContext::new(Arc::new(store), regenerate))
    }

    #[tokio::test]
    async fn fingerprint_absent_before_initialize() {
        let (_, _, ctx) = context(true);
        assert_eq!(ctx.state().await, IdentityState::Uninitialized);
        assert!(ctx.fingerprint().await.is_none());
    }

    #[tokio::test]
    async fn second_initialize_is_cached() {
        let (primary, backup, ctx) = context(true);
        let first = ctx.initialize().await.unwrap();
        assert!(first.is_new_identity);
        let writes = (primary.writes(), backup.writes());

        let second = ctx.initialize().await.unwrap();
        assert!(!second.is_new_identity);
        assert_eq!(second.public_key, first.public_key);
        assert_eq!((primary.writes(), backup.writes()), writes);
    }

    #[tokio::test]
    async fn sign_auto_initializes() {
        let (_, _, ctx) = context(true);
        let sig = ctx.sign("challenge-1").await.unwrap();
        assert_eq!(ctx.state().await, IdentityState::Ready);
        let public = ctx.public_key().await.unwrap();
        verify(&public, "challenge-1", &sig).unwrap();
        assert!(verify(&public, "challenge-2", &sig).is_err());
    }

    #[tokio::test]
    async fn corrupt_record_regenerates_by_default() {
        let (primary, backup, ctx) = context(true);
        primary.put_raw("identity", b"{broken");
        backup.put_raw("identity", b"{broken");
        let outcome = ctx.initialize().await.unwrap();
        assert!(outcome.is_new_identity);
        let stored = KeyRecord::from_bytes(&primary.raw("identity").unwrap()).unwrap();
        assert_eq!(stored.public_key, outcome.public_key);
    }

    #[tokio::test]
    async fn corrupt_record_errors_when_regeneration_disabled() {
        let (primary, _, ctx) = context(false);
        primary.put_raw("identity", b"{broken");
        assert!(matches!(ctx.initialize().await, Err(CoreError::CorruptIdentity)));
        assert_eq!(ctx.state().await, IdentityState::Uninitialized);
        assert_eq!(primary.raw("identity").as_deref(), Some(&b"{broken"[..]));
    }

    #[tokio::test]
    async fn storage_failure_still_yields_identity() {
        let (primary, backup, ctx) = context(true);
        primary.set_fail_reads(true);
        primary.set_fail_writes(true);
        backup.set_fail_reads(true);
        let outcome = ctx.initialize().await.unwrap();
        assert!(outcome.is_new_identity);
        assert!(ctx.fingerprint().await.is_some());
    }

    #[tokio::test]
    async fn identity_survives_restart_when_only_backup_is_writable() {
        let (primary, backup, ctx) = context(true);
        primary.set_fail_writes(true);
        let first = ctx.initialize().await.unwrap();
        assert!(first.is_new_identity);
        assert!(primary.raw("identity").is_none());
        assert!(backup.raw("identity").is_some());

        let store = KeyStore::new(
            "identity",
            vec![primary.clone() as Arc<dyn StorageBackend>, backup.clone()],
        )
        .unwrap();
        let restarted = IdentityContext::new(Arc::new(store), true);
        let second = restarted.initialize().await.unwrap();
        assert!(!second.is_new_identity);
        assert_eq!(second.public_key, first.public_key);
    }

    #[tokio::test]
    async fn replace_with_mismatched_pair_is_a_crypto_error() {
        let (primary, _, ctx) = context(true);
        let original = ctx.initialize().await.unwrap();
        let mut record = KeyRecord::from_keypair(&IdentityKeyPair::generate());
        record.public_key = IdentityKeyPair::generate().public_jwk().to_string();
        assert!(matches!(ctx.replace(&record).await, Err(CoreError::Crypto(_))));
        assert_eq!(ctx.public_key().await.unwrap(), original.public_key);
        let stored = KeyRecord::from_bytes(&primary.raw("identity").unwrap()).unwrap();
        assert_eq!(stored.public_key, original.public_key);
    }

    #[tokio::test]
    async fn clear_is_safe_without_initialize_and_wipes_tiers() {
        let (primary, backup, ctx) = context(true);
        ctx.clear().await;
        ctx.initialize().await.unwrap();
        ctx.clear().await;
        assert_eq!(ctx.state().await, IdentityState::Uninitialized);
        assert!(ctx.fingerprint().await.is_none());
        assert!(primary.raw("identity").is_none());
        assert!(backup.raw("identity").is_none());
    }

    #[tokio::test]
    async fn replace_installs_new_identity() {
        let (_, _, ctx) = context(true);
        ctx.initialize().await.unwrap();
        let incoming = IdentityKeyPair::generate();
        let outcome = ctx.replace(&KeyRecord::from_keypair(&incoming)).await.unwrap();
        assert_eq!(outcome.public_key, incoming.public_jwk());
        assert_eq!(ctx.fingerprint().await.unwrap(), incoming.public().fingerprint());
    }

    #[tokio::test]
    async fn failed_replace_leaves_no_identity() {
        let (primary, backup, ctx) = context(true);
        ctx.initialize().await.unwrap();
        primary.set_fail_writes(true);
        let incoming = KeyRecord::from_keypair(&IdentityKeyPair::generate());
        assert!(ctx.replace(&incoming).await.is_err());
        assert_eq!(ctx.state().await, IdentityState::Uninitialized);
        assert!(ctx.fingerprint().await.is_none());
        assert!(primary.raw("identity").is_none());
        assert!(backup.raw("identity").is_none());
    }
}
