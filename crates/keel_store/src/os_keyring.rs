//! Backup tier in the platform credential store.
//!
//! Records are stored base64-encoded as the "password" of
//! `(service, slot)`. The keyring API is blocking, so every call hops onto
//! the blocking pool.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;

use crate::backend::{check_slot, StorageBackend};
use crate::error::StoreError;

const TIER_NAME: &str = "keyring";

pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    async fn with_entry<F, R>(&self, slot: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(Entry) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        check_slot(slot)?;
        let service = self.service.clone();
        let account = slot.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &account)
                .map_err(|e| StoreError::unavailable(TIER_NAME, format!("keyring init: {e}")))?;
            f(entry)
        })
        .await
        .map_err(|e| StoreError::unavailable(TIER_NAME, format!("keyring task: {e}")))?
    }
}

#[async_trait]
impl StorageBackend for KeyringBackend {
    fn name(&self) -> &str {
        TIER_NAME
    }

    async fn read(&self, slot: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_entry(slot, |entry| match entry.get_password() {
            Ok(encoded) => general_purpose::STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("decode keyring value: {e}"))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::unavailable(TIER_NAME, format!("load: {e}"))),
        })
        .await
    }

    async fn write(&self, slot: &str, data: &[u8]) -> Result<(), StoreError> {
        let encoded = general_purpose::STANDARD.encode(data);
        self.with_entry(slot, move |entry| {
            entry
                .set_password(&encoded)
                .map_err(|e| StoreError::unavailable(TIER_NAME, format!("store: {e}")))
        })
        .await
    }

    async fn remove(&self, slot: &str) -> Result<(), StoreError> {
        self.with_entry(slot, |entry| match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::unavailable(TIER_NAME, format!("delete: {e}"))),
        })
        .await
    }
}
