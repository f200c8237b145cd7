//! Ciphertext body formats and key-material encoding.
//!
//! Symmetric body:
//!   suite[1]=0xB1 || nonce[12] || aead_ct[16+]
//!
//! Hybrid body:
//!   suite[1]=0xA3 || kem_ct[1120] || nonce[12] || aead_ct[16+]
//!
//! kem_ct = x25519_ephemeral_pk[32] || mlkem768_ciphertext[1088]
//!
//! Key material:
//!   tag[1] || key bytes

use crate::error::CipherError;

/// Protocol identifier for KDF domain separation.
pub const PROTOCOL_ID: &[u8] = b"keyward-env-v1";

/// Suite identifiers (first byte of every body).
pub const SUITE_AES256GCM: u8 = 0xB1;
pub const SUITE_HYBRID_X25519_MLKEM768: u8 = 0xA3;

/// Key material tags.
pub const TAG_SYMMETRIC: u8 = 0x01;
pub const TAG_HYBRID_PRIVATE: u8 = 0x02;
pub const TAG_HYBRID_PUBLIC: u8 = 0x03;

pub const X25519_KEY_BYTES: usize = 32;

pub const MLKEM_CIPHERTEXT_BYTES: usize = 1088;
pub const MLKEM_PUBLIC_KEY_BYTES: usize = 1184;
pub const MLKEM_SECRET_KEY_BYTES: usize = 2400;

/// x25519_ephemeral_pk[32] || mlkem_ct[1088]
pub const KEM_CIPHERTEXT_BYTES: usize = X25519_KEY_BYTES + MLKEM_CIPHERTEXT_BYTES; // 1120

/// x25519_pk[32] || mlkem_ek[1184]
pub const HYBRID_PUBLIC_KEY_BYTES: usize = X25519_KEY_BYTES + MLKEM_PUBLIC_KEY_BYTES; // 1216

/// x25519_sk[32] || mlkem_dk[2400] || mlkem_ek[1184]
pub const HYBRID_PRIVATE_KEY_BYTES: usize =
    X25519_KEY_BYTES + MLKEM_SECRET_KEY_BYTES + MLKEM_PUBLIC_KEY_BYTES; // 3616

pub const SHARED_SECRET_BYTES: usize = 32;
pub const NONCE_BYTES: usize = 12;
pub const AEAD_TAG_BYTES: usize = 16;
pub const AES_KEY_BYTES: usize = 32;

/// Smallest valid symmetric body: suite + nonce + tag.
pub const MIN_SYMMETRIC_BODY_BYTES: usize = 1 + NONCE_BYTES + AEAD_TAG_BYTES; // 29

/// Smallest valid hybrid body: suite + kem_ct + nonce + tag.
pub const MIN_HYBRID_BODY_BYTES: usize = 1 + KEM_CIPHERTEXT_BYTES + NONCE_BYTES + AEAD_TAG_BYTES; // 1149

/// Borrowed view of a parsed ciphertext body.
#[derive(Debug, Clone, Copy)]
pub struct Body<'a> {
    pub suite: u8,
    /// Present only for hybrid bodies.
    pub kem_ciphertext: Option<&'a [u8; KEM_CIPHERTEXT_BYTES]>,
    pub nonce: &'a [u8; NONCE_BYTES],
    pub aead_ciphertext: &'a [u8],
}

/// Peek at the suite byte without validating the rest.
pub fn suite_of(data: &[u8]) -> Result<u8, CipherError> {
    data.first().copied().ok_or(CipherError::InvalidCiphertext)
}

pub fn decode_body(data: &[u8]) -> Result<Body<'_>, CipherError> {
    let suite = suite_of(data)?;
    let (kem_ciphertext, rest) = match suite {
        SUITE_AES256GCM => {
            if data.len() < MIN_SYMMETRIC_BODY_BYTES {
                return Err(CipherError::InvalidCiphertext);
            }
            (None, &data[1..])
        }
        SUITE_HYBRID_X25519_MLKEM768 => {
            if data.len() < MIN_HYBRID_BODY_BYTES {
                return Err(CipherError::InvalidCiphertext);
            }
            let kem_end = 1 + KEM_CIPHERTEXT_BYTES;
            let kem: &[u8; KEM_CIPHERTEXT_BYTES] = data[1..kem_end]
                .try_into()
                .map_err(|_| CipherError::InvalidCiphertext)?;
            (Some(kem), &data[kem_end..])
        }
        _ => return Err(CipherError::InvalidCiphertext),
    };

    let nonce: &[u8; NONCE_BYTES] = rest[..NONCE_BYTES]
        .try_into()
        .map_err(|_| CipherError::InvalidCiphertext)?;
    let aead_ciphertext = &rest[NONCE_BYTES..];
    if aead_ciphertext.len() < AEAD_TAG_BYTES {
        return Err(CipherError::InvalidCiphertext);
    }

    Ok(Body {
        suite,
        kem_ciphertext,
        nonce,
        aead_ciphertext,
    })
}

pub fn encode_body(
    kem_ct: Option<&[u8]>,
    nonce: &[u8; NONCE_BYTES],
    aead_ct: &[u8],
) -> Result<Vec<u8>, CipherError> {
    if aead_ct.len() < AEAD_TAG_BYTES {
        return Err(CipherError::Encoding);
    }

    let kem_len = kem_ct.map_or(0, <[u8]>::len);
    let mut out = Vec::with_capacity(1 + kem_len + NONCE_BYTES + aead_ct.len());

    match kem_ct {
        Some(kem) => {
            if kem.len() != KEM_CIPHERTEXT_BYTES {
                return Err(CipherError::Encoding);
            }
            out.push(SUITE_HYBRID_X25519_MLKEM768);
            out.extend_from_slice(kem);
        }
        None => out.push(SUITE_AES256GCM),
    }
    out.extend_from_slice(nonce);
    out.extend_from_slice(aead_ct);

    Ok(out)
}
