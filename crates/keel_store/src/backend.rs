//! Storage tier abstraction.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::StoreError;

/// One storage tier. Implementations must be safe to share across tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short tier name used in logs ("file", "keyring", ...).
    fn name(&self) -> &str;

    /// `Ok(None)` when the slot is absent; `Err` when the tier itself failed.
    async fn read(&self, slot: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn write(&self, slot: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Removing an absent slot is not an error.
    async fn remove(&self, slot: &str) -> Result<(), StoreError>;
}

/// Slot names end up in file names and keyring accounts.
pub(crate) fn check_slot(slot: &str) -> Result<(), StoreError> {
    let ok = !slot.is_empty()
        && slot.len() <= 64
        && slot
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidSlot(slot.to_string()))
    }
}

// ── In-memory tier ────────────────────────────────────────────────────────────

/// Process-local tier. Used for tests, simulated devices and ephemeral
/// sessions. Faults can be injected per operation.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    name: String,
    slots: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_removes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw slot contents, bypassing fault injection.
    pub fn raw(&self, slot: &str) -> Option<Vec<u8>> {
        self.slots.lock().get(slot).cloned()
    }

    /// Overwrite a slot directly, bypassing fault injection and the write
    /// counter.
    pub fn put_raw(&self, slot: &str, data: &[u8]) {
        self.slots.lock().insert(slot.to_string(), data.to_vec());
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, slot: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_slot(slot)?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(&self.name, "injected read failure"));
        }
        Ok(self.slots.lock().get(slot).cloned())
    }

    async fn write(&self, slot: &str, data: &[u8]) -> Result<(), StoreError> {
        check_slot(slot)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(&self.name, "injected write failure"));
        }
        self.slots.lock().insert(slot.to_string(), data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, slot: &str) -> Result<(), StoreError> {
        check_slot(slot)?;
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(&self.name, "injected remove failure"));
        }
        self.slots.lock().remove(slot);
        Ok(())
    }
}
