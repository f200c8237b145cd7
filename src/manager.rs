//! Key store manager: bootstrap, key lifecycle, public export, rewrap, rotation.
//!
//! Each store sits behind a `RwLock<()>` gate. Loading a key set takes the
//! read side; every mutation takes the write side. Locks are always taken
//! store first, meta store second, and the meta store's gate is never held
//! while a managed store's gate is acquired.

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::config::{KeySystemConfig, META_STORE};
use crate::crypter::{ciphertext_version, Crypter, Encrypter};
use crate::error::{KeystoreError, Result};
use crate::lifecycle;
use crate::reader::{wrap_aad, EncryptedStoreReader};
use crate::storage::{FileStore, StoreReader, StoreWriter};
use crate::types::{KeyStoreMetadata, Purpose, Status};

use keyward_envelope::{CipherPrimitive, KeyMaterial};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Managed store handle
// ---------------------------------------------------------------------------

struct ManagedStore {
    name: String,
    files: FileStore,
    asymmetric: bool,
    encrypted: bool,
    public: Option<FileStore>,
    gate: RwLock<()>,
}

impl ManagedStore {
    fn new(
        name: impl Into<String>,
        directory: PathBuf,
        asymmetric: bool,
        encrypted: bool,
        public: Option<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            files: FileStore::new(directory),
            asymmetric,
            encrypted,
            public: public.map(FileStore::new),
            gate: RwLock::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self) -> Result<KeyStoreMetadata> {
        self.files.read_metadata()
    }

    /// Missing or empty directory, or committed metadata from an interrupted
    /// bootstrap: no versions, or (outside the meta store) the first primary
    /// without the second ACTIVE key.
    fn needs_bootstrap(&self, is_meta: bool) -> Result<bool> {
        if self.files.is_empty()? {
            return Ok(true);
        }
        if !self.files.exists() {
            return Ok(false);
        }
        let meta = self.load()?;
        Ok(meta.is_empty() || (!is_meta && missing_second_key(&meta)))
    }
}

fn missing_second_key(meta: &KeyStoreMetadata) -> bool {
    meta.last_version < 2 && meta.versions_in(Status::Active).is_empty()
}

fn rejected(store: &str, op: &str, err: KeystoreError) -> KeystoreError {
    if matches!(err, KeystoreError::InvalidTransition { .. }) {
        tracing::warn!(store, op, error = %err, "transition rejected");
    }
    err
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct KeyStoreManager {
    config: KeySystemConfig,
    cipher: Arc<dyn CipherPrimitive>,
    audit: Arc<dyn AuditSink>,
    meta: OnceCell<Arc<ManagedStore>>,
    stores: BTreeMap<String, Arc<ManagedStore>>,
}

impl KeyStoreManager {
    /// Validate `config` and set up store handles. Nothing touches disk until
    /// the first operation.
    pub fn new(
        config: KeySystemConfig,
        cipher: Arc<dyn CipherPrimitive>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        config.validate()?;
        let stores = config
            .stores
            .iter()
            .map(|s| {
                let handle = ManagedStore::new(
                    s.name.clone(),
                    s.directory.clone(),
                    s.asymmetric,
                    s.encrypted,
                    s.public_directory.clone(),
                );
                (s.name.clone(), Arc::new(handle))
            })
            .collect();
        Ok(Self {
            config,
            cipher,
            audit,
            meta: OnceCell::new(),
            stores,
        })
    }

    pub fn config(&self) -> &KeySystemConfig {
        &self.config
    }

    pub(crate) fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    /// The meta store, bootstrapped on first access.
    fn meta(&self) -> Result<&Arc<ManagedStore>> {
        self.meta.get_or_try_init(|| {
            let handle = Arc::new(ManagedStore::new(
                META_STORE,
                self.config.meta_directory.clone(),
                false,
                false,
                None,
            ));
            {
                let _gate = handle.write();
                self.bootstrap_locked(&handle, true)?;
            }
            Ok(handle)
        })
    }

    fn resolve(&self, store: &str) -> Result<Arc<ManagedStore>> {
        if store == META_STORE {
            return self.meta().cloned();
        }
        self.stores
            .get(store)
            .cloned()
            .ok_or_else(|| KeystoreError::StoreNotFound(store.to_string()))
    }

    fn meta_crypter(&self) -> Result<Crypter> {
        let meta = self.meta()?;
        let _gate = meta.read();
        Crypter::load(&meta.files, self.cipher.clone())
    }

    fn reader(&self, store: &ManagedStore, layered: bool) -> Result<Box<dyn StoreReader>> {
        if layered {
            if !store.encrypted {
                return Err(KeystoreError::Configuration(format!(
                    "store {} is not encrypted at rest",
                    store.name
                )));
            }
            let reader = EncryptedStoreReader::new(store.files.clone(), self.meta_crypter()?)?;
            Ok(Box::new(reader))
        } else {
            Ok(Box::new(store.files.clone()))
        }
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    /// Provision the meta store and every managed store that is missing or
    /// empty. Populated stores are left alone.
    pub fn ensure_initialized(&self) -> Result<()> {
        self.meta()?;
        for store in self.stores.values() {
            let _gate = store.write();
            self.bootstrap_locked(store, false)?;
        }
        Ok(())
    }

    /// Operator `init`: bootstrap, then refresh every public companion.
    pub fn init(&self) -> Result<()> {
        self.ensure_initialized()?;
        for store in self.stores.values().filter(|s| s.public.is_some()) {
            let _gate = store.write();
            self.export_locked(store)?;
        }
        tracing::info!(stores = self.stores.len(), "key system initialized");
        Ok(())
    }

    fn bootstrap_locked(&self, store: &ManagedStore, is_meta: bool) -> Result<bool> {
        if !store.needs_bootstrap(is_meta)? {
            return Ok(false);
        }

        let meta = if store.files.exists() {
            store.load()?
        } else {
            store.files.create()?;
            let meta = KeyStoreMetadata::new(
                store.name.clone(),
                Purpose::Crypt,
                store.asymmetric,
                store.encrypted,
            );
            store.files.write_metadata(&meta)?;
            self.audit
                .record(AuditEvent::store_event(&store.name, AuditAction::StoreCreated));
            meta
        };

        if meta.is_empty() {
            self.add_key_locked(store, true)?;
        }
        if !is_meta && missing_second_key(&meta) {
            self.add_key_locked(store, false)?;
        }

        tracing::info!(
            store = %store.name,
            dir = %store.files.dir().display(),
            asymmetric = store.asymmetric,
            encrypted = store.encrypted,
            "store bootstrapped"
        );
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The meta store first, then managed stores by name.
    pub fn store_names(&self) -> Vec<String> {
        std::iter::once(META_STORE.to_string())
            .chain(self.stores.keys().cloned())
            .collect()
    }

    pub fn metadata(&self, store: &str) -> Result<KeyStoreMetadata> {
        let handle = self.resolve(store)?;
        let _gate = handle.read();
        handle.load()
    }

    pub fn current_primary(&self, store: &str) -> Result<u32> {
        let meta = self.metadata(store)?;
        meta.primary()
            .map(|v| v.version)
            .ok_or(KeystoreError::NoPrimary(meta.name))
    }

    pub fn is_encrypted(&self, store: &str) -> Result<bool> {
        Ok(self.resolve(store)?.encrypted)
    }

    /// Load a crypter for `store`, unwrapping material through the meta store
    /// when `layered`.
    pub fn crypter(&self, store: &str, layered: bool) -> Result<Crypter> {
        let handle = self.resolve(store)?;
        let _gate = handle.read();
        let reader = self.reader(&handle, layered)?;
        Crypter::load(reader.as_ref(), self.cipher.clone())
    }

    pub fn encrypter(&self, store: &str, layered: bool) -> Result<Encrypter> {
        let handle = self.resolve(store)?;
        let _gate = handle.read();
        let reader = self.reader(&handle, layered)?;
        Encrypter::load(reader.as_ref(), self.cipher.clone())
    }

    /// Encrypter over the plaintext public companion of an asymmetric store.
    pub fn public_encrypter(&self, store: &str) -> Result<Encrypter> {
        let handle = self.resolve(store)?;
        let public = handle.public.as_ref().ok_or_else(|| {
            KeystoreError::Configuration(format!("store {} has no public companion", store))
        })?;
        let _gate = handle.read();
        Encrypter::load(public, self.cipher.clone())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Append a new version. Returns its number.
    pub fn add_key(&self, store: &str, as_primary: bool) -> Result<u32> {
        let handle = self.resolve(store)?;
        let _gate = handle.write();
        self.add_key_locked(&handle, as_primary)
    }

    /// One promotion step. Returns the new status.
    pub fn promote(&self, store: &str, version: u32) -> Result<Status> {
        let handle = self.resolve(store)?;
        let _gate = handle.write();
        self.promote_locked(&handle, version)
    }

    /// Promote `version` all the way to primary. Returns the prior primary.
    pub fn promote_to_primary(&self, store: &str, version: u32) -> Result<u32> {
        let handle = self.resolve(store)?;
        let _gate = handle.write();
        self.promote_to_primary_locked(&handle, version)
    }

    /// One demotion step. Demoting the primary requires `promote_instead`.
    pub fn demote(&self, store: &str, version: u32, promote_instead: Option<u32>) -> Result<Status> {
        let handle = self.resolve(store)?;
        let _gate = handle.write();
        self.demote_locked(&handle, version, promote_instead)
    }

    /// Remove a non-primary version and its material.
    ///
    /// A meta store version is only revoked once no encrypted store holds
    /// material wrapped under it; run [`rewrap`](Self::rewrap) first.
    pub fn revoke(&self, store: &str, version: u32) -> Result<()> {
        if store == META_STORE {
            return self.revoke_meta(version);
        }
        let handle = self.resolve(store)?;
        let _gate = handle.write();
        self.revoke_locked(&handle, version)
    }

    fn revoke_meta(&self, version: u32) -> Result<()> {
        // Store gates before the meta gate, so no wrap can start mid-check.
        let encrypted: Vec<&ManagedStore> =
            self.stores.values().filter(|s| s.encrypted).map(|s| &**s).collect();
        let _readers: Vec<_> = encrypted.iter().map(|s| s.read()).collect();

        let meta = self.meta()?;
        let _gate = meta.write();
        let status = meta.load()?.status_of(version);
        if let Some(status) = status.filter(|s| *s != Status::Primary) {
            for store in &encrypted {
                if let Some(wrapped) = self.wrapped_under(store, version)? {
                    return Err(rejected(
                        META_STORE,
                        "revoke",
                        KeystoreError::transition(
                            META_STORE,
                            version,
                            status,
                            format!(
                                "{} v{} is still wrapped under it; rewrap {} first",
                                store.name, wrapped, store.name
                            ),
                        ),
                    ));
                }
            }
        }
        self.revoke_locked(meta, version)
    }

    /// First version of `store` whose material is wrapped under meta
    /// `meta_version`.
    fn wrapped_under(&self, store: &ManagedStore, meta_version: u32) -> Result<Option<u32>> {
        if !store.files.exists() {
            return Ok(None);
        }
        for record in &store.load()?.versions {
            let wrapped = store.files.read_key_material(record.version)?;
            if ciphertext_version(&wrapped)? == meta_version {
                return Ok(Some(record.version));
            }
        }
        Ok(None)
    }

    /// Regenerate the public companion of an asymmetric store. Returns the
    /// number of versions exported.
    pub fn export_public_keys(&self, store: &str) -> Result<usize> {
        let handle = self.resolve(store)?;
        let _gate = handle.write();
        self.export_locked(&handle)
    }

    /// Re-wrap an encrypted store's material under the meta store's current
    /// primary. Returns the number of versions rewritten.
    pub fn rewrap(&self, store: &str) -> Result<usize> {
        let handle = self.resolve(store)?;
        let _gate = handle.write();
        self.rewrap_locked(&handle)
    }

    /// Operator `rotate`: new primary in the meta store, then in every managed
    /// store, with existing material re-wrapped under the new meta key.
    pub fn rotate(&self) -> Result<()> {
        let meta = self.meta()?;
        let meta_version = {
            let _gate = meta.write();
            self.add_key_locked(meta, true)?
        };

        for store in self.stores.values() {
            let _gate = store.write();
            if store.encrypted {
                self.rewrap_locked(store)?;
            }
            self.add_key_locked(store, true)?;
        }

        self.audit.record(
            AuditEvent::system_event(AuditAction::StoresRotated {
                stores: self.stores.len(),
            })
            .with_detail(format!("meta v{}", meta_version)),
        );
        tracing::info!(meta_version, stores = self.stores.len(), "key system rotated");
        Ok(())
    }

    /// Run `f` with the store's write gate held. Operations on the
    /// [`LockedStore`] do not re-acquire the gate.
    pub fn exclusive<T>(
        &self,
        store: &str,
        f: impl FnOnce(&LockedStore<'_>) -> Result<T>,
    ) -> Result<T> {
        let handle = self.resolve(store)?;
        let _gate = handle.write();
        f(&LockedStore {
            manager: self,
            store: handle.as_ref(),
        })
    }

    // -----------------------------------------------------------------------
    // Unlocked internals (caller holds the store's write gate)
    // -----------------------------------------------------------------------

    fn add_key_locked(&self, store: &ManagedStore, as_primary: bool) -> Result<u32> {
        let mut meta = store.load()?;
        let version = lifecycle::append(&mut meta, as_primary)
            .map_err(|e| rejected(&store.name, "add_key", e))?;

        let material = self.cipher.generate(meta.key_kind())?;
        let encoded = material.to_bytes();
        if store.encrypted {
            let wrapped = self
                .meta_crypter()?
                .encrypt_bound(&encoded, &wrap_aad(&store.name, version))?;
            store.files.write_key_material(version, &wrapped)?;
        } else {
            store.files.write_key_material(version, &encoded)?;
        }
        store.files.write_metadata(&meta)?;

        self.audit.record(AuditEvent::key_event(
            &store.name,
            version,
            AuditAction::KeyAdded { as_primary },
        ));
        tracing::info!(store = %store.name, version, as_primary, "key added");

        self.sync_companion(store);
        Ok(version)
    }

    fn promote_locked(&self, store: &ManagedStore, version: u32) -> Result<Status> {
        let mut meta = store.load()?;
        let to = lifecycle::promote(&mut meta, version)
            .map_err(|e| rejected(&store.name, "promote", e))?;
        store.files.write_metadata(&meta)?;

        self.audit.record(AuditEvent::key_event(
            &store.name,
            version,
            AuditAction::KeyPromoted { to },
        ));
        tracing::info!(store = %store.name, version, status = %to, "key promoted");

        self.sync_companion(store);
        Ok(to)
    }

    fn promote_to_primary_locked(&self, store: &ManagedStore, version: u32) -> Result<u32> {
        let meta = store.load()?;
        let prior = meta
            .primary()
            .map(|v| v.version)
            .ok_or_else(|| KeystoreError::NoPrimary(store.name.clone()))?;
        let status = meta.status_of(version).ok_or_else(|| KeystoreError::VersionNotFound {
            store: store.name.clone(),
            version,
        })?;

        for _ in lifecycle::plan(status, Status::Primary) {
            self.promote_locked(store, version)?;
        }
        Ok(prior)
    }

    fn demote_locked(
        &self,
        store: &ManagedStore,
        version: u32,
        promote_instead: Option<u32>,
    ) -> Result<Status> {
        let mut meta = store.load()?;
        let to = lifecycle::demote(&mut meta, version, promote_instead)
            .map_err(|e| rejected(&store.name, "demote", e))?;
        store.files.write_metadata(&meta)?;

        self.audit.record(AuditEvent::key_event(
            &store.name,
            version,
            AuditAction::KeyDemoted {
                to,
                replacement: promote_instead,
            },
        ));
        tracing::info!(store = %store.name, version, status = %to, ?promote_instead, "key demoted");

        self.sync_companion(store);
        Ok(to)
    }

    fn revoke_locked(&self, store: &ManagedStore, version: u32) -> Result<()> {
        let mut meta = store.load()?;
        lifecycle::revoke(&mut meta, version).map_err(|e| rejected(&store.name, "revoke", e))?;
        store.files.write_metadata(&meta)?;
        store.files.remove_key_material(version)?;

        self.audit
            .record(AuditEvent::key_event(&store.name, version, AuditAction::KeyRevoked));
        tracing::info!(store = %store.name, version, "key revoked");

        self.sync_companion(store);
        Ok(())
    }

    /// Refresh the public companion after a committed change. The change
    /// stands when the export fails; the companion stays stale until the next
    /// successful export.
    fn sync_companion(&self, store: &ManagedStore) {
        if store.public.is_none() {
            return;
        }
        if let Err(e) = self.export_locked(store) {
            tracing::warn!(store = %store.name, error = %e, "public companion is stale");
            self.audit.record(
                AuditEvent::store_event(&store.name, AuditAction::PublicKeysExported { versions: 0 })
                    .with_failure()
                    .with_detail(e.to_string()),
            );
        }
    }

    fn export_locked(&self, store: &ManagedStore) -> Result<usize> {
        let public = store.public.as_ref().ok_or_else(|| {
            KeystoreError::Configuration(format!("store {} has no public companion", store.name))
        })?;
        if !store.asymmetric {
            return Err(KeystoreError::Configuration(format!(
                "store {} is symmetric and has no public keys",
                store.name
            )));
        }

        let reader = self.reader(store, store.encrypted)?;
        let source = reader.read_metadata()?;

        let mut projected = Vec::with_capacity(source.versions.len());
        for record in &source.versions {
            let bytes = reader.read_key_material(record.version)?;
            let location = format!("{} v{}", store.name, record.version);
            let material =
                KeyMaterial::from_bytes(&bytes).map_err(|e| KeystoreError::corrupt(&location, e))?;
            let public_half = material
                .public_projection()
                .ok_or_else(|| KeystoreError::corrupt(&location, "no public projection"))?;
            projected.push((record.version, public_half.to_bytes()));
        }

        let mut companion = KeyStoreMetadata::new(
            format!("{}-public", store.name),
            Purpose::Encrypt,
            true,
            false,
        );
        companion.versions = source.versions.clone();
        companion.last_version = source.last_version;

        // New material, then metadata, then stale material: a reader never
        // finds a listed version without its file.
        public.create()?;
        let stale = public.material_versions()?;
        for (version, bytes) in &projected {
            public.write_key_material(*version, bytes)?;
        }
        public.write_metadata(&companion)?;
        for version in stale {
            if companion.version(version).is_none() {
                public.remove_key_material(version)?;
            }
        }

        self.audit.record(AuditEvent::store_event(
            &store.name,
            AuditAction::PublicKeysExported {
                versions: projected.len(),
            },
        ));
        tracing::info!(
            store = %store.name,
            dir = %public.dir().display(),
            versions = projected.len(),
            "public keys exported"
        );
        Ok(projected.len())
    }

    fn rewrap_locked(&self, store: &ManagedStore) -> Result<usize> {
        if !store.encrypted {
            return Err(KeystoreError::Configuration(format!(
                "store {} is not encrypted at rest",
                store.name
            )));
        }
        let meta_crypter = self.meta_crypter()?;
        let target = meta_crypter.primary_version();
        let source = store.load()?;

        let mut rewrapped: Vec<(u32, Vec<u8>)> = Vec::new();
        for record in &source.versions {
            let wrapped = store.files.read_key_material(record.version)?;
            if ciphertext_version(&wrapped)? == target {
                continue;
            }
            let aad = wrap_aad(&store.name, record.version);
            let plain = Zeroizing::new(meta_crypter.decrypt_bound(&wrapped, &aad).map_err(|_| {
                KeystoreError::DecryptionFailed {
                    store: store.name.clone(),
                    version: record.version,
                }
            })?);
            rewrapped.push((record.version, meta_crypter.encrypt_bound(&plain, &aad)?));
        }

        for (version, wrapped) in &rewrapped {
            store.files.write_key_material(*version, wrapped)?;
        }

        self.audit.record(AuditEvent::store_event(
            &store.name,
            AuditAction::MaterialRewrapped {
                versions: rewrapped.len(),
                meta_version: target,
            },
        ));
        tracing::info!(store = %store.name, versions = rewrapped.len(), meta_version = target, "material rewrapped");
        Ok(rewrapped.len())
    }
}

// ---------------------------------------------------------------------------
// Locked store
// ---------------------------------------------------------------------------

/// A store whose write gate is held for the duration of
/// [`KeyStoreManager::exclusive`].
pub struct LockedStore<'a> {
    manager: &'a KeyStoreManager,
    store: &'a ManagedStore,
}

impl LockedStore<'_> {
    pub fn name(&self) -> &str {
        &self.store.name
    }

    pub fn metadata(&self) -> Result<KeyStoreMetadata> {
        self.store.load()
    }

    pub fn promote_to_primary(&self, version: u32) -> Result<u32> {
        self.manager.promote_to_primary_locked(self.store, version)
    }

    pub fn demote(&self, version: u32, promote_instead: Option<u32>) -> Result<Status> {
        self.manager.demote_locked(self.store, version, promote_instead)
    }

    pub fn crypter(&self, layered: bool) -> Result<Crypter> {
        let reader = self.manager.reader(self.store, layered)?;
        Crypter::load(reader.as_ref(), self.manager.cipher.clone())
    }
}
