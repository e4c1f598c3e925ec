//! Per-conversation content encryption.
//!
//! Each conversation has one AES-256-GCM key. Keys come from a
//! `ChannelKeySource` and are cached for the life of the
//! `ConversationKeyCache`; they are never written to disk.
//!
//! The default source is deterministic: the key is
//! `SHA-256("keel-conversation-key:v1:<conversation id>")`. Anyone who knows
//! or guesses the conversation id can derive it. It only hides content from
//! a passive observer who does not know the id, and is meant to be swapped
//! for a key-exchange backed source.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;
use zeroize::ZeroizeOnDrop;

use keel_crypto::aead::{self, KEY_LEN, NONCE_LEN};
use keel_crypto::hash;

use crate::compat::decode_transport_field;

pub const KEY_SEED_PREFIX: &str = "keel-conversation-key:v1:";

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Wrong key, wrong conversation or tampered payload.
    #[error("Decryption failed")]
    Decryption,

    #[error("Encryption failed")]
    Encryption,

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Key source failed: {0}")]
    KeySource(String),
}

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Namespaced conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Direct message thread, `dm:<id>`.
    pub fn direct(thread_id: &str) -> Self {
        Self(format!("dm:{thread_id}"))
    }

    /// Shared room, `room:<code>`.
    pub fn room(code: &str) -> Self {
        Self(format!("room:{code}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── Keys ──────────────────────────────────────────────────────────────────────

#[derive(ZeroizeOnDrop)]
pub struct ConversationKey([u8; KEY_LEN]);

impl ConversationKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConversationKey(<redacted>)")
    }
}

/// Where conversation keys come from.
#[async_trait]
pub trait ChannelKeySource: Send + Sync {
    async fn derive(&self, conversation_id: &str) -> Result<ConversationKey, ChannelError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicKeySource;

#[async_trait]
impl ChannelKeySource for DeterministicKeySource {
    async fn derive(&self, conversation_id: &str) -> Result<ConversationKey, ChannelError> {
        let seed = format!("{KEY_SEED_PREFIX}{conversation_id}");
        Ok(ConversationKey(hash::sha256(seed.as_bytes())))
    }
}

type KeySlot = Arc<OnceCell<Arc<ConversationKey>>>;

/// Conversation id → key. Concurrent lookups of one id share a single
/// derivation and all receive the same `Arc`.
pub struct ConversationKeyCache {
    source: Arc<dyn ChannelKeySource>,
    slots: Mutex<HashMap<String, KeySlot>>,
}

impl ConversationKeyCache {
    pub fn new(source: Arc<dyn ChannelKeySource>) -> Self {
        Self {
            source,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn key_for(&self, conversation_id: &str) -> Result<Arc<ConversationKey>, ChannelError> {
        let slot = self
            .slots
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .clone();
        if let Some(key) = slot.get() {
            debug!("conversation key cache hit");
            return Ok(key.clone());
        }
        let derived = slot
            .get_or_try_init(|| async {
                debug!("deriving conversation key");
                self.source.derive(conversation_id).await.map(Arc::new)
            })
            .await;
        match derived {
            Ok(key) => Ok(key.clone()),
            Err(e) => {
                self.drop_empty_slot(conversation_id, &slot);
                Err(e)
            }
        }
    }

    /// Remove `slot` from the map if it is still the registered, underived
    /// slot for `conversation_id`.
    fn drop_empty_slot(&self, conversation_id: &str, slot: &KeySlot) {
        let mut slots = self.slots.lock();
        let stale = slots
            .get(conversation_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if stale {
            slots.remove(conversation_id);
        }
    }

    /// Number of ids with a derived key.
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|s| s.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn forget(&self, conversation_id: &str) {
        self.slots.lock().remove(conversation_id);
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

// ── Sealing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Ciphertext with the 16-byte tag appended.
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

fn nonce_from_slice(nonce: &[u8]) -> Result<[u8; NONCE_LEN], ChannelError> {
    nonce
        .try_into()
        .map_err(|_| ChannelError::Malformed(format!("nonce must be {NONCE_LEN} bytes, got {}", nonce.len())))
}

fn seal_with(key: &ConversationKey, plaintext: &[u8], aad: &[u8]) -> Result<SealedPayload, ChannelError> {
    let nonce = aead::generate_nonce();
    let ciphertext =
        aead::seal(key.as_bytes(), &nonce, plaintext, aad).map_err(|_| ChannelError::Encryption)?;
    Ok(SealedPayload { ciphertext, nonce })
}

fn open_with(key: &ConversationKey, ciphertext: &[u8], nonce: &[u8], aad: &[u8]) -> Result<Vec<u8>, ChannelError> {
    let nonce = nonce_from_slice(nonce)?;
    let mut plaintext =
        aead::open(key.as_bytes(), &nonce, ciphertext, aad).map_err(|_| ChannelError::Decryption)?;
    Ok(std::mem::take(&mut *plaintext))
}

/// Encrypt under a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &ConversationKey) -> Result<SealedPayload, ChannelError> {
    seal_with(key, plaintext, &[])
}

pub fn decrypt(ciphertext: &[u8], nonce: &[u8], key: &ConversationKey) -> Result<Vec<u8>, ChannelError> {
    open_with(key, ciphertext, nonce, &[])
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Audio,
    Chunk,
}

/// Transport form of a sealed payload. Binary fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEnvelope {
    pub conversation_id: String,
    pub kind: ContentKind,
    pub ciphertext: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub final_chunk: bool,
}

impl ChannelEnvelope {
    fn from_sealed(conversation_id: &str, kind: ContentKind, sealed: &SealedPayload) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            kind,
            ciphertext: STANDARD.encode(&sealed.ciphertext),
            nonce: STANDARD.encode(sealed.nonce),
            chunk_index: None,
            final_chunk: false,
        }
    }

    /// Decoded `(ciphertext, nonce)`, tolerating double-encoded senders.
    pub fn decode_fields(&self) -> Result<(Vec<u8>, Vec<u8>), ChannelError> {
        let ciphertext = decode_transport_field(&self.ciphertext, None)
            .map_err(|e| ChannelError::Malformed(format!("ciphertext: {e}")))?;
        let nonce = decode_transport_field(&self.nonce, Some(NONCE_LEN))
            .map_err(|e| ChannelError::Malformed(format!("nonce: {e}")))?;
        Ok((ciphertext, nonce))
    }
}

// ── Chunked streams ───────────────────────────────────────────────────────────

fn chunk_aad(stream_id: &str, index: u32, is_final: bool) -> Vec<u8> {
    format!("keel-chunk:v1:{stream_id}:{index}:{}", u8::from(is_final)).into_bytes()
}

/// Seals an ordered stream (recorded audio). Each chunk authenticates its
/// stream id, position and final flag, so reordering, splicing between
/// streams and truncation are detected by `ChunkOpener`.
pub struct ChunkSealer {
    conversation_id: String,
    stream_id: String,
    key: Arc<ConversationKey>,
    next_index: u32,
    finished: bool,
}

impl ChunkSealer {
    pub fn seal(&mut self, data: &[u8], is_final: bool) -> Result<ChannelEnvelope, ChannelError> {
        if self.finished {
            return Err(ChannelError::Malformed("stream already finished".into()));
        }
        let index = self.next_index;
        let aad = chunk_aad(&self.stream_id, index, is_final);
        let sealed = seal_with(&self.key, data, &aad)?;
        self.next_index = index
            .checked_add(1)
            .ok_or_else(|| ChannelError::Malformed("too many chunks".into()))?;
        self.finished = is_final;

        let mut envelope = ChannelEnvelope::from_sealed(&self.conversation_id, ContentKind::Chunk, &sealed);
        envelope.chunk_index = Some(index);
        envelope.final_chunk = is_final;
        Ok(envelope)
    }
}

pub struct ChunkOpener {
    stream_id: String,
    key: Arc<ConversationKey>,
    next_index: u32,
    finished: bool,
}

impl ChunkOpener {
    /// Chunks must arrive in order.
    pub fn open(&mut self, envelope: &ChannelEnvelope) -> Result<Vec<u8>, ChannelError> {
        if self.finished {
            return Err(ChannelError::Malformed("stream already finished".into()));
        }
        if envelope.kind != ContentKind::Chunk {
            return Err(ChannelError::Malformed("not a chunk envelope".into()));
        }
        let index = envelope
            .chunk_index
            .ok_or_else(|| ChannelError::Malformed("chunk index missing".into()))?;
        if index != self.next_index {
            return Err(ChannelError::Malformed(format!(
                "expected chunk {}, got {index}",
                self.next_index
            )));
        }
        let (ciphertext, nonce) = envelope.decode_fields()?;
        let aad = chunk_aad(&self.stream_id, index, envelope.final_chunk);
        let plaintext = open_with(&self.key, &ciphertext, &nonce, &aad)?;
        self.next_index += 1;
        self.finished = envelope.final_chunk;
        Ok(plaintext)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Error unless the final chunk was opened.
    pub fn finish(&self) -> Result<(), ChannelError> {
        if self.finished {
            Ok(())
        } else {
            Err(ChannelError::Malformed(format!(
                "stream truncated after {} chunks",
                self.next_index
            )))
        }
    }
}

// ── Channel ───────────────────────────────────────────────────────────────────

pub struct ConversationChannel {
    cache: ConversationKeyCache,
}

impl ConversationChannel {
    pub fn new(source: Arc<dyn ChannelKeySource>) -> Self {
        Self {
            cache: ConversationKeyCache::new(source),
        }
    }

    pub fn deterministic() -> Self {
        Self::new(Arc::new(DeterministicKeySource))
    }

    pub async fn key_for(&self, conversation_id: &str) -> Result<Arc<ConversationKey>, ChannelError> {
        self.cache.key_for(conversation_id).await
    }

    pub async fn encrypt(&self, conversation_id: &str, plaintext: &[u8]) -> Result<SealedPayload, ChannelError> {
        let key = self.key_for(conversation_id).await?;
        encrypt(plaintext, &key)
    }

    pub async fn decrypt(
        &self,
        conversation_id: &str,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<Vec<u8>, ChannelError> {
        let key = self.key_for(conversation_id).await?;
        decrypt(ciphertext, nonce, &key)
    }

    pub async fn seal(
        &self,
        conversation_id: &str,
        kind: ContentKind,
        plaintext: &[u8],
    ) -> Result<ChannelEnvelope, ChannelError> {
        if kind == ContentKind::Chunk {
            return Err(ChannelError::Malformed("use a chunk sealer for streams".into()));
        }
        let sealed = self.encrypt(conversation_id, plaintext).await?;
        Ok(ChannelEnvelope::from_sealed(conversation_id, kind, &sealed))
    }

    pub async fn open(&self, envelope: &ChannelEnvelope) -> Result<Vec<u8>, ChannelError> {
        if envelope.kind == ContentKind::Chunk {
            return Err(ChannelError::Malformed("use a chunk opener for streams".into()));
        }
        let (ciphertext, nonce) = envelope.decode_fields()?;
        self.decrypt(&envelope.conversation_id, &ciphertext, &nonce).await
    }

    pub async fn encrypt_text(&self, conversation_id: &str, text: &str) -> Result<ChannelEnvelope, ChannelError> {
        self.seal(conversation_id, ContentKind::Text, text.as_bytes()).await
    }

    pub async fn decrypt_text(&self, envelope: &ChannelEnvelope) -> Result<String, ChannelError> {
        if envelope.kind != ContentKind::Text {
            return Err(ChannelError::Malformed("not a text envelope".into()));
        }
        let bytes = self.open(envelope).await?;
        String::from_utf8(bytes).map_err(|_| ChannelError::Malformed("text is not UTF-8".into()))
    }

    pub async fn chunk_sealer(&self, conversation_id: &str, stream_id: &str) -> Result<ChunkSealer, ChannelError> {
        Ok(ChunkSealer {
            conversation_id: conversation_id.to_string(),
            stream_id: stream_id.to_string(),
            key: self.key_for(conversation_id).await?,
            next_index: 0,
            finished: false,
        })
    }

    pub async fn chunk_opener(&self, conversation_id: &str, stream_id: &str) -> Result<ChunkOpener, ChannelError> {
        Ok(ChunkOpener {
            stream_id: stream_id.to_string(),
            key: self.key_for(conversation_id).await?,
            next_index: 0,
            finished: false,
        })
    }
}
