//! Application-facing encryption bound to a configured local store.

use crate::audit::{AuditAction, AuditEvent};
use crate::crypter::{ciphertext_version, Crypter, Encrypter};
use crate::error::{KeystoreError, Result};
use crate::manager::{KeyStoreManager, LockedStore};
use crate::types::Status;

use std::sync::Arc;

pub struct CryptoFacade {
    manager: Arc<KeyStoreManager>,
    local_store: String,
    layered: bool,
}

impl CryptoFacade {
    /// Bind to `local_store`. Material is unwrapped through the meta store
    /// when the local store is encrypted at rest.
    pub fn new(manager: Arc<KeyStoreManager>, local_store: impl Into<String>) -> Result<Self> {
        let local_store = local_store.into();
        let layered = manager.is_encrypted(&local_store)?;
        Ok(Self {
            manager,
            local_store,
            layered,
        })
    }

    /// Bind to the local store named in the manager's config.
    pub fn from_config(manager: Arc<KeyStoreManager>) -> Result<Self> {
        let local = manager.config().local_store.clone();
        Self::new(manager, local)
    }

    pub fn local_store(&self) -> &str {
        &self.local_store
    }

    pub fn crypter(&self, store: &str, layered: bool) -> Result<Crypter> {
        self.manager.crypter(store, layered)
    }

    pub fn encrypter(&self, store: &str, layered: bool) -> Result<Encrypter> {
        self.manager.encrypter(store, layered)
    }

    /// Encrypt under the local store's current primary.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let crypter = self.manager.crypter(&self.local_store, self.layered)?;
        let ciphertext = crypter.encrypt(plaintext)?;
        self.manager.audit().record(AuditEvent::key_event(
            &self.local_store,
            crypter.primary_version(),
            AuditAction::EncryptionPerformed,
        ));
        Ok(ciphertext)
    }

    /// Decrypt with whichever local version the ciphertext names.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let version = ciphertext_version(ciphertext).unwrap_or(0);
        let result = self
            .manager
            .crypter(&self.local_store, self.layered)
            .and_then(|c| c.decrypt(ciphertext));

        let event = match &result {
            Ok(_) => AuditEvent::key_event(&self.local_store, version, AuditAction::DecryptionPerformed),
            Err(e) => AuditEvent::key_event(&self.local_store, version, AuditAction::DecryptionFailed)
                .with_failure()
                .with_detail(e.to_string()),
        };
        self.manager.audit().record(event);
        result
    }

    /// Encrypt for the owner of an asymmetric store using only its public
    /// companion.
    pub fn encrypt_for(&self, store: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let encrypter = self.manager.public_encrypter(store)?;
        let ciphertext = encrypter.encrypt(plaintext)?;
        self.manager.audit().record(
            AuditEvent::key_event(store, encrypter.primary_version(), AuditAction::EncryptionPerformed)
                .with_detail("public companion"),
        );
        Ok(ciphertext)
    }

    /// Current primary version of the local store.
    pub fn local_key_version(&self) -> Result<u32> {
        self.manager.current_primary(&self.local_store)
    }

    /// Encrypt under a specific local version.
    ///
    /// Temporarily promotes `version` to primary, encrypts, then restores the
    /// prior primary and the version's original status. The store's write
    /// gate is held throughout. A failure while moving the primary is
    /// reported as `InconsistentPrimaryState` once the restore has been
    /// attempted; the call is never retried. Public companion exports that
    /// fail along the way do not count: the lifecycle changes still commit.
    pub fn encrypt_with_version(&self, plaintext: &[u8], version: u32) -> Result<Vec<u8>> {
        let layered = self.layered;
        let ciphertext = self.manager.exclusive(&self.local_store, |store| {
            let meta = store.metadata()?;
            let prior = meta
                .primary()
                .map(|v| v.version)
                .ok_or_else(|| KeystoreError::NoPrimary(store.name().to_string()))?;
            let original = meta.status_of(version).ok_or_else(|| KeystoreError::VersionNotFound {
                store: store.name().to_string(),
                version,
            })?;

            if version == prior {
                return store.crypter(layered)?.encrypt(plaintext);
            }

            let inconsistent = |step: &str, err: KeystoreError| {
                tracing::error!(
                    store = store.name(),
                    expected_primary = prior,
                    target = version,
                    step,
                    error = %err,
                    "primary state may be inconsistent"
                );
                KeystoreError::InconsistentPrimaryState {
                    store: store.name().to_string(),
                    expected_primary: prior,
                    reason: format!("{}: {}", step, err),
                }
            };

            if let Err(e) = store.promote_to_primary(version) {
                // Promotion from INACTIVE is two commits; undo the first.
                if let Err((step, undo)) = restore(store, prior, version, original) {
                    tracing::warn!(store = store.name(), step, error = %undo, "undo failed");
                }
                return Err(inconsistent("promote target", e));
            }

            let sealed = store.crypter(layered).and_then(|c| c.encrypt(plaintext));

            restore(store, prior, version, original).map_err(|(step, e)| inconsistent(step, e))?;

            if sealed.is_ok() {
                self.manager.audit().record(AuditEvent::key_event(
                    store.name(),
                    version,
                    AuditAction::ReencryptedUnderVersion {
                        prior_primary: prior,
                    },
                ));
            }
            sealed
        })?;

        self.manager.audit().record(AuditEvent::key_event(
            &self.local_store,
            version,
            AuditAction::EncryptionPerformed,
        ));
        Ok(ciphertext)
    }
}

/// Put `prior` back as primary and `version` back at `original`, skipping
/// whatever already matches. Errors name the failing step.
fn restore(
    store: &LockedStore<'_>,
    prior: u32,
    version: u32,
    original: Status,
) -> std::result::Result<(), (&'static str, KeystoreError)> {
    const PRIOR: &str = "restore prior primary";
    const TARGET: &str = "restore target status";

    let meta = store.metadata().map_err(|e| (PRIOR, e))?;
    if meta.status_of(prior) != Some(Status::Primary) {
        store.promote_to_primary(prior).map_err(|e| (PRIOR, e))?;
    }

    let meta = store.metadata().map_err(|e| (TARGET, e))?;
    if original == Status::Inactive && meta.status_of(version) == Some(Status::Active) {
        store.demote(version, None).map_err(|e| (TARGET, e))?;
    }
    Ok(())
}
