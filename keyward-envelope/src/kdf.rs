//! KDF for hybrid bodies
//!
//! info = PROTOCOL_ID || b"|hybrid|" || SHA3-256(kem_ct)
//! key  = HKDF-SHA256(x25519_ss || mlkem_ss, salt=None, info=info, len=32)

use hkdf::Hkdf;
use sha2::Sha256;
use sha3::{Digest, Sha3_256};
use zeroize::Zeroizing;

use crate::error::CipherError;
use crate::wire::{AES_KEY_BYTES, PROTOCOL_ID};

pub fn derive_body_key(
    shared_secret: &[u8],
    kem_ct: &[u8],
) -> Result<Zeroizing<[u8; AES_KEY_BYTES]>, CipherError> {
    let ct_hash = Sha3_256::digest(kem_ct);

    let mut info = Vec::with_capacity(PROTOCOL_ID.len() + 8 + ct_hash.len());
    info.extend_from_slice(PROTOCOL_ID);
    info.extend_from_slice(b"|hybrid|");
    info.extend_from_slice(&ct_hash);

    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut out = Zeroizing::new([0u8; AES_KEY_BYTES]);
    hk.expand(&info, &mut out[..]).map_err(|_| CipherError::Encoding)?;
    Ok(out)
}
