//! Hybrid asymmetric keys: X25519 + ML-KEM-768
//!
//! Encryption holds if *either* primitive remains secure.
//!
//! Key serialization:
//!   public  = x25519_pk[32] || mlkem_ek[1184]                    (1216 bytes)
//!   private = x25519_sk[32] || mlkem_dk[2400] || mlkem_ek[1184]  (3616 bytes)
//!
//! The private encoding carries the encapsulation key so the public
//! projection can be produced without re-deriving it.
//!
//! Combined shared secret (fed to the KDF):
//!   x25519_dh[32] || mlkem_ss[32]

use core::convert::TryFrom;

use ml_kem::{
    kem::{Decapsulate, Encapsulate},
    Ciphertext, EncodedSizeUser, KemCore, MlKem768, MlKem768Params,
};
use rand_core::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CipherError;
use crate::wire::{
    HYBRID_PRIVATE_KEY_BYTES, HYBRID_PUBLIC_KEY_BYTES, KEM_CIPHERTEXT_BYTES,
    MLKEM_PUBLIC_KEY_BYTES, MLKEM_SECRET_KEY_BYTES, SHARED_SECRET_BYTES, X25519_KEY_BYTES,
};

type Ek = ml_kem::kem::EncapsulationKey<MlKem768Params>;
type Dk = ml_kem::kem::DecapsulationKey<MlKem768Params>;
type MlKemCt = Ciphertext<MlKem768>;

/// Encrypt-only half of a hybrid key.
#[derive(Clone)]
pub struct HybridPublicKey {
    x25519: X25519PublicKey,
    mlkem: Ek,
}

impl HybridPublicKey {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HYBRID_PUBLIC_KEY_BYTES);
        out.extend_from_slice(self.x25519.as_bytes());
        out.extend_from_slice(self.mlkem.as_bytes().as_slice());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != HYBRID_PUBLIC_KEY_BYTES {
            return Err(CipherError::Encoding);
        }
        let (x, m) = bytes.split_at(X25519_KEY_BYTES);
        Ok(Self {
            x25519: X25519PublicKey::from(x25519_array(x)?),
            mlkem: decode_ek(m)?,
        })
    }

    /// Returns `(combined_shared_secret, kem_ciphertext)`.
    pub(crate) fn encapsulate(&self) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>), CipherError> {
        let eph = EphemeralSecret::random_from_rng(OsRng);
        let eph_pk = X25519PublicKey::from(&eph);
        let x25519_ss = eph.diffie_hellman(&self.x25519);

        let (mlkem_ct, mlkem_ss) = self
            .mlkem
            .encapsulate(&mut OsRng)
            .map_err(|_| CipherError::Encoding)?;

        let mut combined = Zeroizing::new(Vec::with_capacity(SHARED_SECRET_BYTES * 2));
        combined.extend_from_slice(x25519_ss.as_bytes());
        combined.extend_from_slice(mlkem_ss.as_slice());

        let mut kem_ct = Vec::with_capacity(KEM_CIPHERTEXT_BYTES);
        kem_ct.extend_from_slice(eph_pk.as_bytes());
        kem_ct.extend_from_slice(mlkem_ct.as_slice());

        Ok((combined, kem_ct))
    }
}

/// Full hybrid key: can decrypt, and carries its public half.
pub struct HybridPrivateKey {
    x25519: StaticSecret,
    mlkem: Dk,
    public: HybridPublicKey,
}

impl HybridPrivateKey {
    pub fn generate() -> Self {
        let x25519 = StaticSecret::random_from_rng(OsRng);
        let x25519_pk = X25519PublicKey::from(&x25519);
        let (mlkem, mlkem_ek) = MlKem768::generate(&mut OsRng);
        Self {
            x25519,
            mlkem,
            public: HybridPublicKey {
                x25519: x25519_pk,
                mlkem: mlkem_ek,
            },
        }
    }

    pub fn public_key(&self) -> &HybridPublicKey {
        &self.public
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(HYBRID_PRIVATE_KEY_BYTES));
        out.extend_from_slice(&self.x25519.to_bytes());
        out.extend_from_slice(self.mlkem.as_bytes().as_slice());
        out.extend_from_slice(self.public.mlkem.as_bytes().as_slice());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != HYBRID_PRIVATE_KEY_BYTES {
            return Err(CipherError::Encoding);
        }
        let (x, rest) = bytes.split_at(X25519_KEY_BYTES);
        let (dk, ek) = rest.split_at(MLKEM_SECRET_KEY_BYTES);

        let x25519 = StaticSecret::from(x25519_array(x)?);
        let dk_bytes: [u8; MLKEM_SECRET_KEY_BYTES] =
            dk.try_into().map_err(|_| CipherError::Encoding)?;

        let public = HybridPublicKey {
            x25519: X25519PublicKey::from(&x25519),
            mlkem: decode_ek(ek)?,
        };
        Ok(Self {
            x25519,
            mlkem: Dk::from_bytes(&dk_bytes.into()),
            public,
        })
    }

    pub(crate) fn decapsulate(
        &self,
        kem_ct: &[u8; KEM_CIPHERTEXT_BYTES],
    ) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        let (epk, ct) = kem_ct.split_at(X25519_KEY_BYTES);
        let x25519_ss = self
            .x25519
            .diffie_hellman(&X25519PublicKey::from(x25519_array(epk)?));

        let mlkem_ct = MlKemCt::try_from(ct).map_err(|_| CipherError::InvalidCiphertext)?;
        let mlkem_ss = self
            .mlkem
            .decapsulate(&mlkem_ct)
            .map_err(|_| CipherError::InvalidCiphertext)?;

        let mut combined = Zeroizing::new(Vec::with_capacity(SHARED_SECRET_BYTES * 2));
        combined.extend_from_slice(x25519_ss.as_bytes());
        combined.extend_from_slice(mlkem_ss.as_slice());
        Ok(combined)
    }
}

fn x25519_array(bytes: &[u8]) -> Result<[u8; X25519_KEY_BYTES], CipherError> {
    bytes.try_into().map_err(|_| CipherError::Encoding)
}

fn decode_ek(bytes: &[u8]) -> Result<Ek, CipherError> {
    let ek: [u8; MLKEM_PUBLIC_KEY_BYTES] = bytes.try_into().map_err(|_| CipherError::Encoding)?;
    Ok(Ek::from_bytes(&ek.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_key_bytes_restore_same_public_half() {
        let key = HybridPrivateKey::generate();
        let restored = HybridPrivateKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(key.public_key().to_bytes(), restored.public_key().to_bytes());
        assert_eq!(key.public_key().to_bytes().len(), HYBRID_PUBLIC_KEY_BYTES);
    }

    #[test]
    fn encapsulation_agrees_with_decapsulation() {
        let key = HybridPrivateKey::generate();
        let (ss, kem_ct) = key.public_key().encapsulate().unwrap();
        let kem_ct: [u8; KEM_CIPHERTEXT_BYTES] = kem_ct.try_into().unwrap();
        let ss2 = key.decapsulate(&kem_ct).unwrap();
        assert_eq!(*ss, *ss2);
    }

    #[test]
    fn wrong_lengths_rejected() {
        assert!(HybridPublicKey::from_bytes(&[0u8; 10]).is_err());
        assert!(HybridPrivateKey::from_bytes(&[0u8; HYBRID_PUBLIC_KEY_BYTES]).is_err());
    }
}
