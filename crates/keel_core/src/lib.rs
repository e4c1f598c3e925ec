//! keel_core — Device identity and secure channel core
//!
//! Everything here is driven by a host (UI, CLI) through a `Session`, which
//! owns one instance of each component. Several sessions in one process
//! behave like several independent devices.
//!
//! # Modules
//! - `identity`    — active P-256 signing identity (`IdentityContext`)
//! - `transfer`    — PIN-encrypted identity export/import
//! - `qr`          — PNG / terminal QR rendering of transfer codes
//! - `channel`     — per-conversation AES-256-GCM keys and payload sealing
//! - `compat`      — transport decoding shim for legacy double-base64 input
//! - `credential`  — WebAuthn-style ceremony bridge
//! - `attestation` — best-effort device fingerprint and label
//! - `session`     — the host-facing facade
//! - `config`, `logging`, `error`

pub mod attestation;
pub mod channel;
pub mod compat;
pub mod config;
pub mod credential;
pub mod error;
pub mod identity;
pub mod logging;
pub mod qr;
pub mod session;
pub mod transfer;

pub use config::CoreConfig;
pub use error::CoreError;
pub use identity::{IdentityContext, IdentityState, InitOutcome};
pub use session::{Session, SignedChallenge};
