//! AEAD: AES-256-GCM

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use getrandom::getrandom;

use crate::error::CipherError;
use crate::wire::{AES_KEY_BYTES, NONCE_BYTES};

/// Fill a fresh buffer from the OS RNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CipherError> {
    let mut out = [0u8; N];
    getrandom(&mut out).map_err(|_| CipherError::Randomness)?;
    Ok(out)
}

/// Random 12-byte nonce. A new one is drawn for every seal, which is what
/// makes repeated encryptions of the same plaintext differ.
pub fn nonce() -> Result<[u8; NONCE_BYTES], CipherError> {
    random_bytes::<NONCE_BYTES>()
}

pub fn seal(
    key: &[u8; AES_KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::Encoding)?;
    let payload = Payload { msg: plaintext, aad };
    cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| CipherError::Encoding)
}

pub fn open(
    key: &[u8; AES_KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidCiphertext)?;
    let payload = Payload { msg: ciphertext, aad };
    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| CipherError::InvalidCiphertext)
}
