//! Layered reading for stores whose key material is wrapped by the meta store.

use crate::crypter::Crypter;
use crate::error::{KeystoreError, Result};
use crate::storage::StoreReader;
use crate::types::KeyStoreMetadata;

use zeroize::Zeroizing;

/// Associated data binding wrapped material to its store and version, so a
/// wrapped file moved between stores or versions no longer opens.
pub(crate) fn wrap_aad(store: &str, version: u32) -> Vec<u8> {
    format!("keyward-wrap|{}|{}", store, version).into_bytes()
}

/// Decorator over a [`StoreReader`] that unwraps each version's material
/// through the meta store's [`Crypter`]. Metadata passes through unchanged.
pub struct EncryptedStoreReader<R> {
    inner: R,
    meta: Crypter,
    store: String,
}

impl<R: StoreReader> EncryptedStoreReader<R> {
    /// Fails when the underlying store is not marked encrypted.
    pub fn new(inner: R, meta: Crypter) -> Result<Self> {
        let metadata = inner.read_metadata()?;
        if !metadata.encrypted {
            return Err(KeystoreError::Configuration(format!(
                "store {} is not encrypted at rest",
                metadata.name
            )));
        }
        Ok(Self {
            inner,
            meta,
            store: metadata.name,
        })
    }
}

impl<R: StoreReader> StoreReader for EncryptedStoreReader<R> {
    fn read_metadata(&self) -> Result<KeyStoreMetadata> {
        self.inner.read_metadata()
    }

    fn read_key_material(&self, version: u32) -> Result<Zeroizing<Vec<u8>>> {
        let wrapped = self.inner.read_key_material(version)?;
        self.meta
            .decrypt_bound(&wrapped, &wrap_aad(&self.store, version))
            .map(Zeroizing::new)
            .map_err(|e| {
                tracing::debug!(store = %self.store, version, error = %e, "unwrap failed");
                KeystoreError::DecryptionFailed {
                    store: self.store.clone(),
                    version,
                }
            })
    }
}
