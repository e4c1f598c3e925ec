//! Identity key management
//!
//! Each *device* holds one long-term `IdentityKeyPair` (P-256 ECDSA). The
//! server authenticates the device by challenge-response: it issues a random
//! challenge string, the device signs its UTF-8 bytes with ECDSA/SHA-256 and
//! returns the raw 64-byte `r || s` signature, base64-encoded.
//!
//! Both halves are exported as JWK (RFC 7517) so a record written here can be
//! imported by a WebCrypto client and vice versa.
//!
//! ECDSA signatures here are RFC 6979 deterministic, but verifiers must not
//! rely on byte-identical repeat signatures.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Number of JWK `x` characters shown as the short fingerprint.
pub const FINGERPRINT_LEN: usize = 8;

// ── Public half ───────────────────────────────────────────────────────────────

/// P-256 public key together with its canonical JWK serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIdentity {
    key: PublicKey,
    jwk: String,
}

impl PublicIdentity {
    fn from_key(key: PublicKey) -> Self {
        let jwk = key.to_jwk_string();
        Self { key, jwk }
    }

    pub fn from_jwk(jwk: &str) -> Result<Self, CryptoError> {
        let key = PublicKey::from_jwk_str(jwk)
            .map_err(|_| CryptoError::InvalidKey("public JWK is not a P-256 key".into()))?;
        Ok(Self::from_key(key))
    }

    pub fn to_jwk(&self) -> &str {
        &self.jwk
    }

    /// JWK `x` coordinate (base64url, unpadded).
    pub fn x_coordinate(&self) -> String {
        let point = self.key.to_encoded_point(false);
        point.x().map(|x| URL_SAFE_NO_PAD.encode(x)).unwrap_or_default()
    }

    /// Short display string: first 8 characters of the `x` coordinate.
    pub fn fingerprint(&self) -> String {
        self.x_coordinate().chars().take(FINGERPRINT_LEN).collect()
    }

    /// Verify a raw `r || s` signature over `msg`.
    pub fn verify(&self, msg: &[u8], sig_bytes: &[u8]) -> Result<(), CryptoError> {
        let sig = Signature::from_slice(sig_bytes).map_err(|_| CryptoError::SignatureVerification)?;
        VerifyingKey::from(&self.key)
            .verify(msg, &sig)
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// Verify a base64-encoded signature over a UTF-8 challenge.
    pub fn verify_challenge(&self, challenge: &str, signature_b64: &str) -> Result<(), CryptoError> {
        let sig_bytes = STANDARD.decode(signature_b64)?;
        self.verify(challenge.as_bytes(), &sig_bytes)
    }
}

// ── Identity keypair ──────────────────────────────────────────────────────────

/// Long-term identity signing key. `SecretKey` zeroizes itself on drop.
pub struct IdentityKeyPair {
    secret: SecretKey,
    public: PublicIdentity,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = PublicIdentity::from_key(secret.public_key());
        Self { secret, public }
    }

    /// Import both halves. The public half must belong to the private half;
    /// a mismatched pair is rejected rather than silently re-derived.
    pub fn from_jwk(private_jwk: &str, public_jwk: &str) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_jwk_str(private_jwk)
            .map_err(|_| CryptoError::InvalidKey("private JWK is not a P-256 key".into()))?;
        let public = PublicIdentity::from_jwk(public_jwk)?;
        if secret.public_key() != public.key {
            return Err(CryptoError::InvalidKey(
                "public JWK does not match private JWK".into(),
            ));
        }
        Ok(Self { secret, public })
    }

    pub fn public(&self) -> &PublicIdentity {
        &self.public
    }

    /// Private JWK (contains `d`). Zeroized when dropped.
    pub fn private_jwk(&self) -> Zeroizing<String> {
        self.secret.to_jwk_string()
    }

    pub fn public_jwk(&self) -> &str {
        self.public.to_jwk()
    }

    /// Sign arbitrary bytes; returns the 64-byte raw ECDSA/SHA-256 signature.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::from(&self.secret);
        let sig: Signature = signing_key.sign(msg);
        sig.to_bytes().to_vec()
    }

    /// Sign the UTF-8 bytes of a server challenge; base64 output.
    pub fn sign_challenge(&self, challenge: &str) -> String {
        STANDARD.encode(self.sign(challenge.as_bytes()))
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("fingerprint", &self.public.fingerprint())
            .finish_non_exhaustive()
    }
}
