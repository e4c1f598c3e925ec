//! Hash utilities
//!
//! - SHA-256 for key seeds (interoperable with WebCrypto `digest`)
//! - BLAKE3 for local, non-interoperable digests (device fingerprints)

use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// BLAKE3 hex digest over length-prefixed parts, so ("ab","c") and ("a","bc")
/// never collide.
pub fn blake3_hex_parts<'a>(domain: &str, parts: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain.as_bytes());
    hasher.update(b"\x00");
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn blake3_parts_are_length_prefixed() {
        let a = blake3_hex_parts("d", [b"ab".as_slice(), b"c".as_slice()]);
        let b = blake3_hex_parts("d", [b"a".as_slice(), b"bc".as_slice()]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
