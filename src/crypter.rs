//! Loaded key sets bound to a cipher.
//!
//! Ciphertext format:
//!   format[1]=0x4B || key_version[4, BE] || body
//!
//! The 5-byte header is passed to the cipher as associated data (followed by
//! any caller AAD), so rewriting the version in the header breaks the tag.

use crate::error::{KeystoreError, Result};
use crate::storage::StoreReader;
use crate::types::{KeyStoreMetadata, Purpose};

use keyward_envelope::{CipherError, CipherPrimitive, KeyMaterial};
use std::collections::BTreeMap;
use std::sync::Arc;

/// First byte of every keyward ciphertext.
pub const FORMAT_BYTE: u8 = 0x4B;

/// format byte + u32 version.
pub const HEADER_BYTES: usize = 5;

/// Key version a ciphertext was produced under.
pub fn ciphertext_version(ciphertext: &[u8]) -> Result<u32> {
    if ciphertext.len() < HEADER_BYTES || ciphertext[0] != FORMAT_BYTE {
        return Err(CipherError::InvalidCiphertext.into());
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&ciphertext[1..HEADER_BYTES]);
    Ok(u32::from_be_bytes(version))
}

fn header(version: u32) -> [u8; HEADER_BYTES] {
    let mut out = [0u8; HEADER_BYTES];
    out[0] = FORMAT_BYTE;
    out[1..].copy_from_slice(&version.to_be_bytes());
    out
}

fn full_aad(header: &[u8], aad: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header.len() + aad.len());
    out.extend_from_slice(header);
    out.extend_from_slice(aad);
    out
}

// ---------------------------------------------------------------------------
// Key set
// ---------------------------------------------------------------------------

/// Every version of one store, decoded, plus which one is primary.
struct KeySet {
    store: String,
    primary: u32,
    keys: BTreeMap<u32, KeyMaterial>,
    cipher: Arc<dyn CipherPrimitive>,
}

impl KeySet {
    fn load(reader: &dyn StoreReader, cipher: Arc<dyn CipherPrimitive>) -> Result<Self> {
        let meta = reader.read_metadata()?;
        let primary = meta
            .primary()
            .ok_or_else(|| KeystoreError::NoPrimary(meta.name.clone()))?
            .version;

        let mut keys = BTreeMap::new();
        for record in &meta.versions {
            let bytes = reader.read_key_material(record.version)?;
            let material = decode_material(&meta, record.version, &bytes)?;
            keys.insert(record.version, material);
        }

        tracing::debug!(store = %meta.name, primary, versions = keys.len(), "key set loaded");
        Ok(Self {
            store: meta.name,
            primary,
            keys,
            cipher,
        })
    }

    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let key = self.keys.get(&self.primary).ok_or_else(|| KeystoreError::VersionNotFound {
            store: self.store.clone(),
            version: self.primary,
        })?;
        let header = header(self.primary);
        let body = self.cipher.encrypt(plaintext, key, &full_aad(&header, aad))?;

        let mut out = Vec::with_capacity(HEADER_BYTES + body.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn open(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let version = ciphertext_version(ciphertext)?;
        let key = self.keys.get(&version).ok_or_else(|| KeystoreError::VersionNotFound {
            store: self.store.clone(),
            version,
        })?;
        let (header, body) = ciphertext.split_at(HEADER_BYTES);
        Ok(self.cipher.decrypt(body, key, &full_aad(header, aad))?)
    }
}

fn decode_material(meta: &KeyStoreMetadata, version: u32, bytes: &[u8]) -> Result<KeyMaterial> {
    let location = format!("{} v{}", meta.name, version);
    let material = KeyMaterial::from_bytes(bytes).map_err(|e| KeystoreError::corrupt(&location, e))?;
    if material.kind() != meta.key_kind() {
        return Err(KeystoreError::corrupt(location, "key family does not match store"));
    }
    if meta.purpose == Purpose::Crypt && !material.can_decrypt() {
        return Err(KeystoreError::corrupt(location, "public-only material in a crypt store"));
    }
    Ok(material)
}

// ---------------------------------------------------------------------------
// Crypter
// ---------------------------------------------------------------------------

/// Encrypts under the primary version, decrypts under whichever version the
/// ciphertext header names.
pub struct Crypter {
    keys: KeySet,
}

impl Crypter {
    /// Load every version of the store behind `reader`. The store must have
    /// a primary and must not be encrypt-only.
    pub fn load(reader: &dyn StoreReader, cipher: Arc<dyn CipherPrimitive>) -> Result<Self> {
        let keys = KeySet::load(reader, cipher)?;
        if keys.keys.values().any(|k| !k.can_decrypt()) {
            return Err(KeystoreError::Configuration(format!(
                "store {} is encrypt-only",
                keys.store
            )));
        }
        Ok(Self { keys })
    }

    pub fn store(&self) -> &str {
        &self.keys.store
    }

    pub fn primary_version(&self) -> u32 {
        self.keys.primary
    }

    pub fn versions(&self) -> Vec<u32> {
        self.keys.keys.keys().copied().collect()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.keys.seal(plaintext, &[])
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.keys.open(ciphertext, &[])
    }

    /// Encrypt with caller-supplied associated data.
    pub fn encrypt_bound(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.keys.seal(plaintext, aad)
    }

    pub fn decrypt_bound(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.keys.open(ciphertext, aad)
    }
}

// ---------------------------------------------------------------------------
// Encrypter
// ---------------------------------------------------------------------------

/// Encrypt-only view of a store. Loads public companions as well as full
/// key sets.
pub struct Encrypter {
    keys: KeySet,
}

impl Encrypter {
    pub fn load(reader: &dyn StoreReader, cipher: Arc<dyn CipherPrimitive>) -> Result<Self> {
        Ok(Self {
            keys: KeySet::load(reader, cipher)?,
        })
    }

    pub fn store(&self) -> &str {
        &self.keys.store
    }

    pub fn primary_version(&self) -> u32 {
        self.keys.primary
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.keys.seal(plaintext, &[])
    }
}

impl From<Crypter> for Encrypter {
    fn from(crypter: Crypter) -> Self {
        Self { keys: crypter.keys }
    }
}
