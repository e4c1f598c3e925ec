//! keel_store — Durable, redundant storage for the device identity record
//!
//! # Tiering
//! A `KeyStore` holds an ordered list of storage backends. Rank 0 is the
//! primary, authoritative tier; lower ranks are backups.
//! - `load` returns the first parseable, structurally valid record and
//!   repairs every higher-ranked tier with it.
//! - `save` writes every tier; only a primary failure is an error.
//! - `clear` removes from every tier independently, best effort.
//!
//! # Backends
//! - `FileBackend`    — JSON file per slot, atomic staging + rename
//! - `KeyringBackend` — OS credential store (Secret Service, Keychain, DPAPI)
//! - `MemoryBackend`  — in-process, with fault injection for tests

pub mod backend;
pub mod error;
pub mod file;
pub mod key_store;
pub mod os_keyring;
pub mod paths;
pub mod record;

pub use backend::{MemoryBackend, StorageBackend};
pub use error::StoreError;
pub use file::FileBackend;
pub use key_store::{KeyStore, LoadOutcome};
pub use os_keyring::KeyringBackend;
pub use record::KeyRecord;
