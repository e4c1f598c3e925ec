//! Property tests for identity transfer.
//!
//! 1. **Wrong PIN**: any PIN other than the issued one imports nothing and
//!    leaves storage and the active identity untouched
//! 2. **Tamper**: altering any byte of the bundle imports nothing
//!
//! Every case runs PBKDF2 at the production floor, so case counts stay low.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use keel_core::credential::UnavailablePlatform;
use keel_core::transfer::TransferCode;
use keel_core::{CoreConfig, Session};
use keel_store::{MemoryBackend, StorageBackend};
use proptest::prelude::*;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread().build().unwrap()
}

fn device() -> (Arc<MemoryBackend>, Session) {
    let tier = Arc::new(MemoryBackend::new("memory"));
    let session = Session::with_backends(
        CoreConfig::default(),
        vec![tier.clone() as Arc<dyn StorageBackend>],
        Arc::new(UnavailablePlatform),
    )
    .unwrap();
    (tier, session)
}

/// One exported code shared by every case.
fn exported() -> &'static TransferCode {
    static CODE: OnceLock<TransferCode> = OnceLock::new();
    CODE.get_or_init(|| {
        runtime().block_on(async {
            let (_, source) = device();
            source.initialize().await.unwrap();
            source.generate_transfer_code().await.unwrap()
        })
    })
}

/// Import `code` with `pin` on a freshly initialised device and check that
/// nothing changed. Returns whether the import was rejected.
fn rejected_without_side_effects(code: &str, pin: &str) -> bool {
    runtime().block_on(async {
        let (tier, target) = device();
        target.initialize().await.unwrap();
        let stored = tier.raw("identity");
        let writes = tier.writes();
        let fingerprint = target.fingerprint().await;

        let result = target.import_from_code(code, pin).await.unwrap();
        result.is_none()
            && tier.raw("identity") == stored
            && tier.writes() == writes
            && target.fingerprint().await == fingerprint
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_wrong_pin_imports_nothing(candidate in 0u32..1_000_000) {
        let transfer = exported();
        let pin = format!("{candidate:06}");
        prop_assume!(pin != transfer.pin.as_str());
        prop_assert!(rejected_without_side_effects(&transfer.code, &pin));
    }

    #[test]
    fn prop_tampered_byte_imports_nothing(
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let transfer = exported();
        let mut blob = STANDARD.decode(&transfer.code).unwrap();
        let i = position.index(blob.len());
        blob[i] ^= flip;
        let tampered = STANDARD.encode(&blob);
        prop_assert!(rejected_without_side_effects(&tampered, transfer.pin.as_str()));
    }
}
