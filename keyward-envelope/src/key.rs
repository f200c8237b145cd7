//! Key material: the opaque bytes stored per key version.

use core::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aead;
use crate::error::CipherError;
use crate::kem::{HybridPrivateKey, HybridPublicKey};
use crate::wire::{AES_KEY_BYTES, TAG_HYBRID_PRIVATE, TAG_HYBRID_PUBLIC, TAG_SYMMETRIC};

/// Which family of key to generate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// AES-256-GCM secret key.
    Symmetric,
    /// X25519 + ML-KEM-768 private key.
    Hybrid,
}

/// 256-bit AES-GCM key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; AES_KEY_BYTES]);

impl SymmetricKey {
    pub fn generate() -> Result<Self, CipherError> {
        aead::random_bytes::<AES_KEY_BYTES>().map(Self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; AES_KEY_BYTES] = bytes.try_into().map_err(|_| CipherError::Encoding)?;
        Ok(Self(key))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; AES_KEY_BYTES] {
        &self.0
    }
}

/// One version's worth of key material.
pub enum KeyMaterial {
    Symmetric(SymmetricKey),
    HybridPrivate(HybridPrivateKey),
    HybridPublic(HybridPublicKey),
}

impl KeyMaterial {
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Symmetric(_) => KeyKind::Symmetric,
            Self::HybridPrivate(_) | Self::HybridPublic(_) => KeyKind::Hybrid,
        }
    }

    /// Whether this material can decrypt (public halves cannot).
    pub fn can_decrypt(&self) -> bool {
        !matches!(self, Self::HybridPublic(_))
    }

    /// Encrypt-only projection. `None` for symmetric keys, which have no
    /// public half.
    pub fn public_projection(&self) -> Option<KeyMaterial> {
        match self {
            Self::Symmetric(_) => None,
            Self::HybridPrivate(sk) => Some(Self::HybridPublic(sk.public_key().clone())),
            Self::HybridPublic(pk) => Some(Self::HybridPublic(pk.clone())),
        }
    }

    /// `tag[1] || key bytes`
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::new());
        match self {
            Self::Symmetric(k) => {
                out.push(TAG_SYMMETRIC);
                out.extend_from_slice(k.as_bytes());
            }
            Self::HybridPrivate(sk) => {
                out.push(TAG_HYBRID_PRIVATE);
                out.extend_from_slice(&sk.to_bytes());
            }
            Self::HybridPublic(pk) => {
                out.push(TAG_HYBRID_PUBLIC);
                out.extend_from_slice(&pk.to_bytes());
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        let (tag, body) = bytes.split_first().ok_or(CipherError::Encoding)?;
        match *tag {
            TAG_SYMMETRIC => SymmetricKey::from_bytes(body).map(Self::Symmetric),
            TAG_HYBRID_PRIVATE => HybridPrivateKey::from_bytes(body).map(Self::HybridPrivate),
            TAG_HYBRID_PUBLIC => HybridPublicKey::from_bytes(body).map(Self::HybridPublic),
            _ => Err(CipherError::Encoding),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Symmetric(_) => "Symmetric",
            Self::HybridPrivate(_) => "HybridPrivate",
            Self::HybridPublic(_) => "HybridPublic",
        };
        write!(f, "KeyMaterial::{}(..)", label)
    }
}
