//! At-rest encoding of the device identity.
//!
//! Layout (JSON, one per tier, keyed by the identity slot):
//! `{ "privateKey": "<JWK>", "publicKey": "<JWK>" }`
//!
//! There is no version field; a future key-type change will surface only as
//! a record that fails to import.

use keel_crypto::IdentityKeyPair;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::StoreError;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub private_key: String,
    pub public_key: String,
}

impl KeyRecord {
    pub fn from_keypair(keypair: &IdentityKeyPair) -> Self {
        Self {
            private_key: keypair.private_jwk().to_string(),
            public_key: keypair.public_jwk().to_string(),
        }
    }

    /// Import both halves. Fails on malformed JWKs or a mismatched pair.
    pub fn to_keypair(&self) -> Result<IdentityKeyPair, StoreError> {
        Ok(IdentityKeyPair::from_jwk(&self.private_key, &self.public_key)?)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        self.to_keypair().map(|_| ())
    }

    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        Ok(Zeroizing::new(serde_json::to_vec(self)?))
    }

    /// Parse and structurally validate a stored record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let record: KeyRecord =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        record
            .validate()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(record)
    }
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}
