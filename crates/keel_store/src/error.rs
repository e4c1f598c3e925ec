use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage tier '{tier}' unavailable: {reason}")]
    Unavailable { tier: String, reason: String },

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("Invalid storage slot name: {0}")]
    InvalidSlot(String),

    #[error("Key store needs at least one storage tier")]
    NoTiers,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] keel_crypto::CryptoError),
}

impl StoreError {
    pub fn unavailable(tier: &str, reason: impl ToString) -> Self {
        Self::Unavailable {
            tier: tier.to_string(),
            reason: reason.to_string(),
        }
    }
}
