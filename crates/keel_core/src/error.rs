use thiserror::Error;

use keel_store::StoreError;

use crate::channel::ChannelError;
use crate::credential::CredentialError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(keel_store::StoreError),

    #[error("No identity on this device")]
    IdentityNotFound,

    #[error("Stored identity is corrupt")]
    CorruptIdentity,

    /// Wrong key, wrong PIN, or tampered input. Deliberately not split.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Malformed channel payload: {0}")]
    MalformedPayload(String),

    #[error("Credential ceremony cancelled")]
    CeremonyCancelled,

    #[error("Credential ceremony failed: {0}")]
    CeremonyFailed(String),

    #[error("Hardware credentials are not supported on this platform")]
    UnsupportedPlatform,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] keel_crypto::CryptoError),

    #[error("QR rendering failed: {0}")]
    Qr(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Crypto(e) => CoreError::Crypto(e),
            StoreError::Corrupt(_) | StoreError::Serialisation(_) => CoreError::CorruptIdentity,
            StoreError::InvalidSlot(_) | StoreError::NoTiers => CoreError::Config(e.to_string()),
            other => CoreError::StorageUnavailable(other),
        }
    }
}

impl From<ChannelError> for CoreError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Decryption => CoreError::DecryptionFailed,
            ChannelError::Encryption => CoreError::Crypto(keel_crypto::CryptoError::AeadEncrypt),
            ChannelError::Malformed(msg) => CoreError::MalformedPayload(msg),
            ChannelError::KeySource(msg) => CoreError::Task(msg),
        }
    }
}

impl From<CredentialError> for CoreError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Cancelled => CoreError::CeremonyCancelled,
            CredentialError::Unsupported => CoreError::UnsupportedPlatform,
            CredentialError::Failed(msg) => CoreError::CeremonyFailed(msg),
            CredentialError::InvalidOptions(msg) => {
                CoreError::CeremonyFailed(format!("invalid server options: {msg}"))
            }
        }
    }
}
