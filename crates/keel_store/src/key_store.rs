//! Ranked key store with silent repair.
//!
//! Tier failures never escape `load` or `clear`: they are logged and the
//! next tier is consulted. Only `save` reports an error, and only when the
//! primary tier (rank 0) could not be written; the backups are written
//! regardless.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{check_slot, StorageBackend};
use crate::error::StoreError;
use crate::record::KeyRecord;

/// Result of walking the tiers.
#[derive(Debug)]
pub enum LoadOutcome {
    /// A valid record was found in tier `rank`.
    Found { record: KeyRecord, rank: usize },
    /// At least one tier held bytes, but none parsed as a valid record.
    Corrupt,
    /// No tier held a record (or every tier was unreadable).
    Absent,
}

pub struct KeyStore {
    slot: String,
    tiers: Vec<Arc<dyn StorageBackend>>,
}

impl KeyStore {
    /// `tiers[0]` is the primary, authoritative tier.
    pub fn new(slot: impl Into<String>, tiers: Vec<Arc<dyn StorageBackend>>) -> Result<Self, StoreError> {
        let slot = slot.into();
        check_slot(&slot)?;
        if tiers.is_empty() {
            return Err(StoreError::NoTiers);
        }
        Ok(Self { slot, tiers })
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// First valid record in rank order, or `None`.
    pub async fn load(&self) -> Option<KeyRecord> {
        match self.load_outcome().await {
            LoadOutcome::Found { record, .. } => Some(record),
            LoadOutcome::Corrupt | LoadOutcome::Absent => None,
        }
    }

    /// Walk tiers in rank order. When the winner is not the primary tier,
    /// every higher-ranked tier is rewritten with the winning record.
    pub async fn load_outcome(&self) -> LoadOutcome {
        let mut saw_corrupt = false;
        for (rank, tier) in self.tiers.iter().enumerate() {
            let bytes = match tier.read(&self.slot).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!(tier = tier.name(), "no identity record in tier");
                    continue;
                }
                Err(e) => {
                    warn!(tier = tier.name(), error = %e, "storage tier unavailable, trying next");
                    continue;
                }
            };
            match KeyRecord::from_bytes(&bytes) {
                Ok(record) => {
                    if rank > 0 {
                        self.repair(rank, &record).await;
                    }
                    return LoadOutcome::Found { record, rank };
                }
                Err(e) => {
                    warn!(tier = tier.name(), error = %e, "skipping unreadable identity record");
                    saw_corrupt = true;
                }
            }
        }
        if saw_corrupt {
            LoadOutcome::Corrupt
        } else {
            LoadOutcome::Absent
        }
    }

    async fn repair(&self, found_rank: usize, record: &KeyRecord) {
        let bytes = match record.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "cannot serialise record for repair");
                return;
            }
        };
        for tier in &self.tiers[..found_rank] {
            match tier.write(&self.slot, &bytes).await {
                Ok(()) => info!(
                    tier = tier.name(),
                    source = self.tiers[found_rank].name(),
                    "repaired identity record from backup tier"
                ),
                Err(e) => warn!(tier = tier.name(), error = %e, "identity record repair failed"),
            }
        }
    }

    /// Write every tier, even after the primary fails. A backup tier failure
    /// is logged; the primary's error is returned once all tiers were tried.
    pub async fn save(&self, record: &KeyRecord) -> Result<(), StoreError> {
        let bytes = record.to_bytes()?;
        let (primary, backups) = self
            .tiers
            .split_first()
            .ok_or(StoreError::NoTiers)?;
        let primary_result = primary.write(&self.slot, &bytes).await;
        if let Err(e) = &primary_result {
            warn!(tier = primary.name(), error = %e, "primary tier write failed, writing backups anyway");
        }
        for tier in backups {
            if let Err(e) = tier.write(&self.slot, &bytes).await {
                warn!(tier = tier.name(), error = %e, "backup tier write failed");
            }
        }
        primary_result
    }

    /// Remove the record from every tier independently. Never fails.
    pub async fn clear(&self) {
        for tier in &self.tiers {
            if let Err(e) = tier.remove(&self.slot).await {
                debug!(tier = tier.name(), error = %e, "tier removal failed during clear");
            }
        }
    }
}
