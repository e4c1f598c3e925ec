//! Transport decoding for channel fields.
//!
//! Some older senders base64-encoded ciphertext and nonce fields twice. This
//! shim undoes at most one extra layer and is kept apart from the AEAD path
//! so it can be deleted once those senders are gone.

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::debug;

use keel_crypto::aead::TAG_LEN;

fn is_base64_alphabet(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

/// Decode a base64 transport field.
///
/// `expected_len` is the exact decoded length when known (12 for a nonce).
/// Without it the field is treated as ciphertext, which must at least hold a
/// GCM tag. A suspicious result that is itself pure base64 text is decoded
/// one more time; if that second pass fails the first result stands.
pub fn decode_transport_field(
    input: &str,
    expected_len: Option<usize>,
) -> Result<Vec<u8>, base64::DecodeError> {
    let first = STANDARD.decode(input.trim())?;
    let suspicious = match expected_len {
        Some(len) => first.len() != len,
        None => first.len() >= 4 && first.len() % 4 == 0,
    };
    if !suspicious || !is_base64_alphabet(&first) {
        return Ok(first);
    }
    match STANDARD.decode(&first) {
        Ok(second) => {
            let better = match expected_len {
                Some(len) => second.len() == len,
                None => second.len() >= TAG_LEN,
            };
            if better {
                debug!("transport field was double-encoded");
                Ok(second)
            } else {
                Ok(first)
            }
        }
        Err(_) => Ok(first),
    }
}
