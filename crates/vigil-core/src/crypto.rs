//! Hybrid batch encryption: AES-256-GCM payload, RSA-OAEP key wrap.
//!
//! Every batch gets a fresh 32-byte AES key and 12-byte nonce from the OS
//! RNG. The payload is sealed with AES-256-GCM, the key is wrapped with
//! RSA-OAEP (SHA-256) under the long-lived public key, and the four parts
//! travel in a compact JSON envelope of standard-base64 fields:
//!
//! ```json
//! {"d":"<ciphertext>","k":"<wrapped key>","n":"<nonce>","t":"<gcm tag>"}
//! ```
//!
//! [`open_envelope`] is the exact inverse, used by verification tooling and
//! tests; the reader itself never holds the private key.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// AES-256 key size in bytes.
pub const AES_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Errors from sealing or opening a batch envelope.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The key file could not be read.
    #[error("failed to read key file: {0}")]
    Io(#[from] std::io::Error),

    /// The key file did not parse as PEM key material.
    #[error("invalid key material: {0}")]
    KeyMaterial(String),

    /// RSA wrap or unwrap failed.
    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    /// Symmetric encryption or authentication failed.
    #[error("AES-GCM operation failed: {0}")]
    Aead(String),

    /// An envelope field did not decode as base64.
    #[error("envelope field is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// An envelope field has the wrong length.
    #[error("envelope {field} is {actual} bytes, expected {expected}")]
    FieldLength {
        /// Which envelope field was malformed.
        field: &'static str,
        /// Decoded length.
        actual: usize,
        /// Required length.
        expected: usize,
    },
}

/// The published ciphertext envelope. Field names are part of the wire
/// format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 AES-256-GCM ciphertext (tag stripped).
    pub d: String,
    /// Base64 RSA-OAEP-wrapped AES key.
    pub k: String,
    /// Base64 12-byte nonce.
    pub n: String,
    /// Base64 16-byte authentication tag.
    pub t: String,
}

impl Envelope {
    /// Compact JSON form, exactly as published.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Seals batch payloads under a long-lived RSA public key.
pub struct HybridSealer {
    public_key: RsaPublicKey,
}

impl HybridSealer {
    /// Uses an already-parsed public key.
    #[must_use]
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self { public_key }
    }

    /// Loads a PEM-encoded (SPKI) RSA public key from disk.
    pub fn from_pem_file(path: &Path) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path)?;
        let public_key = RsaPublicKey::from_public_key_pem(&pem)
            .map_err(|err| CryptoError::KeyMaterial(err.to_string()))?;
        Ok(Self::new(public_key))
    }

    /// Seals one payload: fresh key and nonce, AES-256-GCM, RSA key wrap.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        let mut key = [0u8; AES_KEY_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|err| CryptoError::Aead(err.to_string()))?;
        let mut ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|err| CryptoError::Aead(err.to_string()))?;
        // aes-gcm appends the tag; the envelope carries it separately.
        let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

        let wrapped_key = self
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key)?;

        Ok(Envelope {
            d: STANDARD.encode(&ciphertext),
            k: STANDARD.encode(&wrapped_key),
            n: STANDARD.encode(nonce),
            t: STANDARD.encode(&tag),
        })
    }
}

/// Opens an envelope with the matching private key, returning the exact
/// plaintext bytes that were sealed.
pub fn open_envelope(
    envelope: &Envelope,
    private_key: &RsaPrivateKey,
) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = STANDARD.decode(&envelope.d)?;
    let wrapped_key = STANDARD.decode(&envelope.k)?;
    let nonce = STANDARD.decode(&envelope.n)?;
    let tag = STANDARD.decode(&envelope.t)?;

    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::FieldLength {
            field: "nonce",
            actual: nonce.len(),
            expected: NONCE_SIZE,
        });
    }
    if tag.len() != TAG_SIZE {
        return Err(CryptoError::FieldLength {
            field: "tag",
            actual: tag.len(),
            expected: TAG_SIZE,
        });
    }

    let key = private_key.decrypt(Oaep::new::<Sha256>(), &wrapped_key)?;
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|err| CryptoError::Aead(err.to_string()))?;

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);
    cipher
        .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
        .map_err(|err| CryptoError::Aead(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).expect("generate test key");
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn seal_open_round_trip() {
        let (private, public) = test_keypair();
        let sealer = HybridSealer::new(public);
        let payload = br#"{"timestamp":"2026-01-01T00:00:00.000Z","logs":[],"prev_cid":"null"}"#;

        let envelope = sealer.seal(payload).expect("seal");
        let opened = open_envelope(&envelope, &private).expect("open");
        assert_eq!(opened, payload);
    }

    #[test]
    fn envelope_json_is_compact_with_fixed_field_order() {
        let (_, public) = test_keypair();
        let envelope = HybridSealer::new(public).seal(b"x").expect("seal");
        let json = envelope.to_json().expect("serializes");
        assert!(json.starts_with(r#"{"d":""#));
        assert!(!json.contains('\n'));
        assert!(!json.contains(": "));
        let order = ["\"d\":", "\"k\":", "\"n\":", "\"t\":"];
        let positions: Vec<usize> = order.iter().map(|f| json.find(f).expect(f)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn field_sizes_match_the_wire_contract() {
        let (_, public) = test_keypair();
        let envelope = HybridSealer::new(public).seal(b"hello").expect("seal");
        assert_eq!(STANDARD.decode(&envelope.n).expect("n").len(), NONCE_SIZE);
        assert_eq!(STANDARD.decode(&envelope.t).expect("t").len(), TAG_SIZE);
        // 2048-bit RSA wraps to a 256-byte blob.
        assert_eq!(STANDARD.decode(&envelope.k).expect("k").len(), 256);
        assert_eq!(STANDARD.decode(&envelope.d).expect("d").len(), 5);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let (private, public) = test_keypair();
        let mut envelope = HybridSealer::new(public).seal(b"important data").expect("seal");
        let mut raw = STANDARD.decode(&envelope.d).expect("d");
        raw[0] ^= 0xff;
        envelope.d = STANDARD.encode(&raw);
        assert!(matches!(
            open_envelope(&envelope, &private),
            Err(CryptoError::Aead(_))
        ));
    }

    #[test]
    fn wrong_private_key_fails() {
        let (_, public) = test_keypair();
        let (other_private, _) = test_keypair();
        let envelope = HybridSealer::new(public).seal(b"secret").expect("seal");
        assert!(open_envelope(&envelope, &other_private).is_err());
    }

    #[test]
    fn malformed_nonce_is_rejected_before_decrypt() {
        let (private, public) = test_keypair();
        let mut envelope = HybridSealer::new(public).seal(b"x").expect("seal");
        envelope.n = STANDARD.encode([0u8; 4]);
        assert!(matches!(
            open_envelope(&envelope, &private),
            Err(CryptoError::FieldLength { field: "nonce", .. })
        ));
    }
}
