//! keel_crypto — Keel cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited RustCrypto crates.
//! - Secret material is zeroized on drop.
//! - Public APIs hand out newtypes, not raw byte arrays, where misuse matters.
//!
//! # Module layout
//! - `identity` — long-term P-256 ECDSA identity keypair, JWK import/export
//! - `aead`     — AES-256-GCM seal/open helpers (explicit 96-bit nonces)
//! - `kdf`      — PBKDF2-HMAC-SHA256 PIN key derivation
//! - `hash`     — SHA-256 / BLAKE3 helpers
//! - `error`    — unified error type

pub mod aead;
pub mod error;
pub mod hash;
pub mod identity;
pub mod kdf;

pub use error::CryptoError;
pub use identity::{IdentityKeyPair, PublicIdentity};
