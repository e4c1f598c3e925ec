//! Key derivation functions
//!
//! `pin_key` — PBKDF2-HMAC-SHA256, derives the 32-byte key that seals an
//!   identity transfer bundle from a 6-digit PIN and a per-transfer salt.
//!
//! The iteration count is deliberately slow; a 10^6 PIN space is only
//! acceptable because transfer codes are short-lived.

use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Lowest iteration count accepted for PIN derivation.
pub const PBKDF2_MIN_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;

/// 32-byte key derived from a transfer PIN. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct PinKey([u8; 32]);

impl PinKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive a transfer key from `pin` + salt.
/// The salt travels in clear alongside the ciphertext (not secret).
pub fn pin_key(pin: &[u8], salt: &[u8], iterations: u32) -> Result<PinKey, CryptoError> {
    if iterations < PBKDF2_MIN_ITERATIONS {
        return Err(CryptoError::KeyDerivation(format!(
            "PBKDF2 iteration count {iterations} below minimum {PBKDF2_MIN_ITERATIONS}"
        )));
    }
    if salt.len() != SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt must be {SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(pin, salt, iterations, &mut out);
    Ok(PinKey(out))
}

/// Fresh random 16-byte salt, one per transfer.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
