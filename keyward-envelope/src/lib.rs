//! # Keyward Envelope
//!
//! Cipher primitives consumed by the keyward key-store layer.
//!
//! ```rust
//! use keyward_envelope::{CipherPrimitive, Envelope, KeyKind};
//!
//! let envelope = Envelope::new();
//! let key = envelope.generate(KeyKind::Symmetric).unwrap();
//!
//! let ct = envelope.encrypt(b"secret", &key, b"aad").unwrap();
//! let pt = envelope.decrypt(&ct, &key, b"aad").unwrap();
//! assert_eq!(pt, b"secret");
//! ```
//!
//! ## Properties
//!
//! - **Authenticated**: AES-256-GCM, with the caller's AAD bound in
//! - **Non-deterministic**: a fresh nonce (and, for hybrid keys, a fresh
//!   encapsulation) per call
//! - **Hybrid asymmetric**: X25519 + ML-KEM-768, secure if either holds
//! - **Uniform decrypt errors**: malformed input and tag failures both
//!   return `InvalidCiphertext`

#![deny(unsafe_code)]

mod aead;
mod error;
mod kdf;
mod kem;
mod key;

#[doc(hidden)]
pub mod wire;

pub use error::CipherError;
pub use kem::{HybridPrivateKey, HybridPublicKey};
pub use key::{KeyKind, KeyMaterial, SymmetricKey};

/// Raw encrypt/decrypt over a single version's key material.
///
/// Implementations must be non-deterministic: encrypting the same plaintext
/// twice under the same key yields different ciphertexts.
pub trait CipherPrimitive: Send + Sync {
    fn generate(&self, kind: KeyKind) -> Result<KeyMaterial, CipherError>;

    fn encrypt(&self, plaintext: &[u8], key: &KeyMaterial, aad: &[u8])
        -> Result<Vec<u8>, CipherError>;

    fn decrypt(&self, ciphertext: &[u8], key: &KeyMaterial, aad: &[u8])
        -> Result<Vec<u8>, CipherError>;
}

/// Default primitive: AES-256-GCM for symmetric keys, hybrid KEM + AES-256-GCM
/// for asymmetric keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct Envelope;

impl Envelope {
    pub fn new() -> Self {
        Self
    }
}

impl CipherPrimitive for Envelope {
    fn generate(&self, kind: KeyKind) -> Result<KeyMaterial, CipherError> {
        match kind {
            KeyKind::Symmetric => SymmetricKey::generate().map(KeyMaterial::Symmetric),
            KeyKind::Hybrid => Ok(KeyMaterial::HybridPrivate(HybridPrivateKey::generate())),
        }
    }

    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &KeyMaterial,
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let nonce = aead::nonce()?;
        match key {
            KeyMaterial::Symmetric(k) => {
                let ct = aead::seal(k.as_bytes(), &nonce, plaintext, aad)?;
                wire::encode_body(None, &nonce, &ct)
            }
            KeyMaterial::HybridPrivate(sk) => seal_hybrid(sk.public_key(), &nonce, plaintext, aad),
            KeyMaterial::HybridPublic(pk) => seal_hybrid(pk, &nonce, plaintext, aad),
        }
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &KeyMaterial,
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let body = wire::decode_body(ciphertext)?;
        match (key, body.kem_ciphertext) {
            (KeyMaterial::Symmetric(k), None) => {
                aead::open(k.as_bytes(), body.nonce, body.aead_ciphertext, aad)
            }
            (KeyMaterial::HybridPrivate(sk), Some(kem_ct)) => {
                let ss = sk.decapsulate(kem_ct)?;
                let body_key = kdf::derive_body_key(&ss, kem_ct)
                    .map_err(|_| CipherError::InvalidCiphertext)?;
                aead::open(&body_key, body.nonce, body.aead_ciphertext, aad)
            }
            _ => Err(CipherError::KeyMismatch),
        }
    }
}

fn seal_hybrid(
    pk: &HybridPublicKey,
    nonce: &[u8; wire::NONCE_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let (ss, kem_ct) = pk.encapsulate()?;
    let body_key = kdf::derive_body_key(&ss, &kem_ct)?;
    let ct = aead::seal(&body_key, nonce, plaintext, aad)?;
    wire::encode_body(Some(kem_ct.as_slice()), nonce, &ct)
}
