//! Host-facing facade.
//!
//! A `Session` is one device: one identity, one key cache, one transfer
//! codec, one credential bridge. Hosts call these methods and get
//! `CoreError` back; component errors are folded in here.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use keel_store::{FileBackend, KeyRecord, KeyStore, KeyringBackend, MemoryBackend, StorageBackend};

use crate::attestation::DeviceFingerprint;
use crate::channel::{ChannelEnvelope, ChannelKeySource, ConversationChannel, DeterministicKeySource, SealedPayload};
use crate::config::CoreConfig;
use crate::credential::{
    CeremonyResult, CreationOptions, CredentialBridge, PlatformAuthenticator, RequestOptions, UnavailablePlatform,
};
use crate::error::CoreError;
use crate::identity::{IdentityContext, InitOutcome};
use crate::transfer::{TransferCode, TransferCodec};

/// A challenge signature with the device context it was produced on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedChallenge {
    pub signature: String,
    pub device: DeviceFingerprint,
}

pub struct Session {
    identity: Arc<IdentityContext>,
    transfer: TransferCodec,
    channel: ConversationChannel,
    credential: CredentialBridge,
    device: DeviceFingerprint,
}

impl Session {
    /// File tier under `<data_dir>/keys` backed up to the OS keyring.
    pub fn open(config: CoreConfig) -> Result<Self, CoreError> {
        let keys_dir = config.resolve_data_dir()?.join("keys");
        let tiers: Vec<Arc<dyn StorageBackend>> = vec![
            Arc::new(FileBackend::new(&keys_dir)),
            Arc::new(KeyringBackend::new(config.keyring_service.clone())),
        ];
        info!(dir = %keys_dir.display(), "opening session");
        Self::with_backends(config, tiers, Arc::new(UnavailablePlatform))
    }

    /// Process-local session; nothing survives drop.
    pub fn in_memory(config: CoreConfig) -> Result<Self, CoreError> {
        let tiers: Vec<Arc<dyn StorageBackend>> = vec![Arc::new(MemoryBackend::new("memory"))];
        Self::with_backends(config, tiers, Arc::new(UnavailablePlatform))
    }

    pub fn with_backends(
        config: CoreConfig,
        tiers: Vec<Arc<dyn StorageBackend>>,
        platform: Arc<dyn PlatformAuthenticator>,
    ) -> Result<Self, CoreError> {
        Self::with_components(config, tiers, platform, Arc::new(DeterministicKeySource))
    }

    pub fn with_components(
        config: CoreConfig,
        tiers: Vec<Arc<dyn StorageBackend>>,
        platform: Arc<dyn PlatformAuthenticator>,
        key_source: Arc<dyn ChannelKeySource>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let store = Arc::new(KeyStore::new(config.identity_slot.clone(), tiers)?);
        let identity = Arc::new(IdentityContext::new(store, config.regenerate_on_corrupt));
        let transfer = TransferCodec::new(identity.clone(), config.effective_iterations(), config.qr_module_size);
        Ok(Self {
            identity,
            transfer,
            channel: ConversationChannel::new(key_source),
            credential: CredentialBridge::new(platform),
            device: DeviceFingerprint::collect(),
        })
    }

    pub fn identity(&self) -> &Arc<IdentityContext> {
        &self.identity
    }

    pub fn transfer(&self) -> &TransferCodec {
        &self.transfer
    }

    pub fn channel(&self) -> &ConversationChannel {
        &self.channel
    }

    pub fn credential(&self) -> &CredentialBridge {
        &self.credential
    }

    /// Collected once per session.
    pub fn device(&self) -> &DeviceFingerprint {
        &self.device
    }

    // ── Identity ──────────────────────────────────────────────────────────────

    pub async fn initialize(&self) -> Result<InitOutcome, CoreError> {
        self.identity.initialize().await
    }

    pub async fn sign(&self, challenge: &str) -> Result<String, CoreError> {
        self.identity.sign(challenge).await
    }

    /// `sign` plus this session's device fingerprint, for authentication
    /// requests that carry device context.
    pub async fn sign_with_context(&self, challenge: &str) -> Result<SignedChallenge, CoreError> {
        let signature = self.identity.sign(challenge).await?;
        Ok(SignedChallenge {
            signature,
            device: self.device.clone(),
        })
    }

    pub async fn fingerprint(&self) -> Option<String> {
        self.identity.fingerprint().await
    }

    pub async fn clear_identity(&self) {
        self.identity.clear().await
    }

    /// Raw stored record, if any. Used by hosts that back up identities.
    pub async fn stored_record(&self) -> Option<KeyRecord> {
        self.identity.key_store().load().await
    }

    // ── Transfer ──────────────────────────────────────────────────────────────

    pub async fn generate_transfer_code(&self) -> Result<TransferCode, CoreError> {
        self.transfer.generate_code().await
    }

    pub async fn import_from_code(&self, code: &str, pin: &str) -> Result<Option<String>, CoreError> {
        self.transfer.import_from_code(code, pin).await
    }

    // ── Channel ───────────────────────────────────────────────────────────────

    pub async fn encrypt(&self, conversation_id: &str, plaintext: &[u8]) -> Result<SealedPayload, CoreError> {
        Ok(self.channel.encrypt(conversation_id, plaintext).await?)
    }

    pub async fn decrypt(&self, conversation_id: &str, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(self.channel.decrypt(conversation_id, ciphertext, nonce).await?)
    }

    pub async fn encrypt_text(&self, conversation_id: &str, text: &str) -> Result<ChannelEnvelope, CoreError> {
        Ok(self.channel.encrypt_text(conversation_id, text).await?)
    }

    pub async fn decrypt_text(&self, envelope: &ChannelEnvelope) -> Result<String, CoreError> {
        Ok(self.channel.decrypt_text(envelope).await?)
    }

    // ── Credentials ───────────────────────────────────────────────────────────

    pub async fn register(&self, options: CreationOptions) -> Result<CeremonyResult, CoreError> {
        Ok(self.credential.register(options).await?)
    }

    pub async fn authenticate(&self, options: RequestOptions) -> Result<CeremonyResult, CoreError> {
        Ok(self.credential.authenticate(options).await?)
    }
}
