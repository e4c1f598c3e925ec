//! PIN-protected identity transfer between devices.
//!
//! Bundle layout (standard base64, padded):
//!
//! ```text
//! ┌──────────┬───────────┬──────────────────────────────┐
//! │ salt 16B │ nonce 12B │ AES-256-GCM(KeyRecord JSON)  │
//! └──────────┴───────────┴──────────────────────────────┘
//! ```
//!
//! The key is PBKDF2-HMAC-SHA256(pin, salt). The PIN travels out of band and
//! never appears in the code or the QR image. Bundles carry no version byte.
//!
//! Expiry and single use are the host's job; this module does not track
//! issued codes.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

use keel_crypto::aead::{self, NONCE_LEN, TAG_LEN};
use keel_crypto::kdf::{self, PinKey, PBKDF2_MIN_ITERATIONS, SALT_LEN};
use keel_store::KeyRecord;

use crate::error::CoreError;
use crate::identity::IdentityContext;
use crate::qr;

pub const PIN_DIGITS: usize = 6;
const HEADER_LEN: usize = SALT_LEN + NONCE_LEN;

// ── PIN ───────────────────────────────────────────────────────────────────────

/// Six-digit transfer PIN. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(Zeroizing<String>);

impl Pin {
    /// Uniform over `000000..=999999`.
    pub fn random() -> Self {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self(Zeroizing::new(format!("{n:06}")))
    }

    /// `None` unless `s` is exactly six ASCII digits.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == PIN_DIGITS && s.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(Zeroizing::new(s.to_string())))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(******)")
    }
}

impl Serialize for Pin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ── Transfer code ─────────────────────────────────────────────────────────────

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCode {
    pub pin: Pin,
    /// base64(salt ‖ nonce ‖ ciphertext)
    pub code: String,
    /// PNG data URL of `code`.
    pub qr_image: String,
}

impl std::fmt::Debug for TransferCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCode")
            .field("pin", &self.pin)
            .field("code_len", &self.code.len())
            .finish_non_exhaustive()
    }
}

// ── Bundle sealing ────────────────────────────────────────────────────────────

async fn derive(pin: &Pin, salt: [u8; SALT_LEN], iterations: u32) -> Result<PinKey, CoreError> {
    let pin = pin.0.clone();
    let key = tokio::task::spawn_blocking(move || kdf::pin_key(pin.as_bytes(), &salt, iterations))
        .await
        .map_err(|e| CoreError::Task(e.to_string()))??;
    Ok(key)
}

/// Encrypt `record` under `pin`; returns the base64 transfer code.
pub async fn seal_bundle(record: &KeyRecord, pin: &Pin, iterations: u32) -> Result<String, CoreError> {
    let salt = kdf::generate_salt();
    let nonce = aead::generate_nonce();
    let key = derive(pin, salt, iterations).await?;
    let plaintext = record.to_bytes()?;
    let ciphertext = aead::seal(key.as_bytes(), &nonce, &plaintext, &[])?;

    let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(blob))
}

/// Decrypt a transfer code. Every decode, length, tag or parse failure
/// yields `Ok(None)`; only a failed blocking task is an error.
pub async fn open_bundle(code: &str, pin: &Pin, iterations: u32) -> Result<Option<KeyRecord>, CoreError> {
    let blob = match STANDARD.decode(code.trim()) {
        Ok(blob) => blob,
        Err(_) => {
            debug!("transfer code is not valid base64");
            return Ok(None);
        }
    };
    if blob.len() < HEADER_LEN + TAG_LEN {
        debug!(len = blob.len(), "transfer code too short");
        return Ok(None);
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let mut salt_arr = [0u8; SALT_LEN];
    salt_arr.copy_from_slice(salt);
    let mut nonce_arr = [0u8; NONCE_LEN];
    nonce_arr.copy_from_slice(nonce);

    let key = derive(pin, salt_arr, iterations).await?;
    let plaintext = match aead::open(key.as_bytes(), &nonce_arr, ciphertext, &[]) {
        Ok(p) => p,
        Err(_) => return Ok(None),
    };
    Ok(KeyRecord::from_bytes(&plaintext).ok())
}

// ── Codec ─────────────────────────────────────────────────────────────────────

pub struct TransferCodec {
    identity: Arc<IdentityContext>,
    iterations: u32,
    qr_module_size: u32,
}

impl TransferCodec {
    pub fn new(identity: Arc<IdentityContext>, iterations: u32, qr_module_size: u32) -> Self {
        Self {
            identity,
            iterations: iterations.max(PBKDF2_MIN_ITERATIONS),
            qr_module_size,
        }
    }

    /// Export the stored identity. `IdentityNotFound` when nothing is stored.
    pub async fn generate_code(&self) -> Result<TransferCode, CoreError> {
        let record = self
            .identity
            .key_store()
            .load()
            .await
            .ok_or(CoreError::IdentityNotFound)?;
        let pin = Pin::random();
        let code = seal_bundle(&record, &pin, self.iterations).await?;
        let qr_image = qr::data_url(&code, self.qr_module_size)?;
        info!("transfer code generated");
        Ok(TransferCode { pin, code, qr_image })
    }

    /// Import an identity from `code`. Returns the new public JWK, or `None`
    /// when the code or PIN is wrong (storage untouched in that case).
    pub async fn import_from_code(&self, code: &str, pin: &str) -> Result<Option<String>, CoreError> {
        let Some(pin) = Pin::parse(pin) else {
            debug!("transfer PIN is not six digits");
            return Ok(None);
        };
        let Some(record) = open_bundle(code, &pin, self.iterations).await? else {
            return Ok(None);
        };
        let outcome = self.identity.replace(&record).await?;
        info!("identity imported from transfer code");
        Ok(Some(outcome.public_key))
    }
}
