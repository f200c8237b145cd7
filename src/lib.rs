//! # Keyward
//!
//! Versioned key stores with a PRIMARY / ACTIVE / INACTIVE lifecycle.
//!
//! A meta store wraps the key material of every other store, asymmetric
//! stores publish a plaintext public companion, and a crypto façade can
//! temporarily promote an older version to encrypt under it.
//!
//! Built on top of `keyward-envelope` for AES-256-GCM and hybrid
//! X25519 + ML-KEM-768 encryption.
//!
//! ## Quick Start
//!
//! ```no_run
//! use keyward::*;
//! use keyward_envelope::Envelope;
//! use std::sync::Arc;
//!
//! let config = KeySystemConfig::with_base_dir("./keyward-data");
//! let manager = Arc::new(
//!     KeyStoreManager::new(config, Arc::new(Envelope::new()), Arc::new(TracingAuditSink)).unwrap(),
//! );
//! manager.ensure_initialized().unwrap();
//!
//! let facade = CryptoFacade::from_config(manager.clone()).unwrap();
//! let ct = facade.encrypt(b"secret data").unwrap();
//! assert_eq!(facade.decrypt(&ct).unwrap(), b"secret data");
//!
//! // Rotate every store; old ciphertexts still decrypt.
//! manager.rotate().unwrap();
//! assert_eq!(facade.decrypt(&ct).unwrap(), b"secret data");
//! ```

pub mod audit;
pub mod config;
pub mod crypter;
pub mod error;
pub mod facade;
pub mod lifecycle;
pub mod manager;
pub mod reader;
pub mod storage;
pub mod types;

// Re-export main types for convenience
pub use audit::{AuditAction, AuditEvent, AuditSink, FileAuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::{KeySystemConfig, StoreConfig, META_STORE};
pub use crypter::{ciphertext_version, Crypter, Encrypter};
pub use error::{KeystoreError, Result};
pub use facade::CryptoFacade;
pub use manager::{KeyStoreManager, LockedStore};
pub use reader::EncryptedStoreReader;
pub use storage::{FileStore, MemoryStore, StoreReader, StoreWriter};
pub use types::{KeyStoreMetadata, KeyVersionRecord, Purpose, Status};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ASYMMETRIC_DIR, ASYMMETRIC_PUBLIC_DIR, ASYMMETRIC_STORE, SYMMETRIC_DIR, SYMMETRIC_STORE,
    };
    use keyward_envelope::{CipherError, Envelope};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_manager() -> (TempDir, Arc<KeyStoreManager>) {
        let (dir, manager, _) = test_manager_with_audit();
        (dir, manager)
    }

    fn test_manager_with_audit() -> (TempDir, Arc<KeyStoreManager>, Arc<InMemoryAuditSink>) {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(InMemoryAuditSink::new());
        let manager = KeyStoreManager::new(
            KeySystemConfig::with_base_dir(dir.path()),
            Arc::new(Envelope::new()),
            audit.clone(),
        )
        .unwrap();
        manager.ensure_initialized().unwrap();
        (dir, Arc::new(manager), audit)
    }

    fn statuses(manager: &KeyStoreManager, store: &str) -> Vec<(u32, Status)> {
        manager
            .metadata(store)
            .unwrap()
            .versions
            .iter()
            .map(|v| (v.version, v.status))
            .collect()
    }

    // === Bootstrap ===

    #[test]
    fn test_bootstrap_layout() {
        let (dir, manager) = test_manager();

        assert_eq!(statuses(&manager, META_STORE), vec![(1, Status::Primary)]);
        for store in [SYMMETRIC_STORE, ASYMMETRIC_STORE] {
            assert_eq!(
                statuses(&manager, store),
                vec![(1, Status::Primary), (2, Status::Active)]
            );
            assert!(manager.metadata(store).unwrap().encrypted);
        }

        let companion = FileStore::new(dir.path().join(ASYMMETRIC_PUBLIC_DIR));
        let public = companion.read_metadata().unwrap();
        assert_eq!(public.purpose, Purpose::Encrypt);
        assert!(!public.encrypted);
        assert_eq!(public.versions, manager.metadata(ASYMMETRIC_STORE).unwrap().versions);
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let (dir, manager) = test_manager();
        let key_file = dir.path().join(SYMMETRIC_DIR).join("1.key");
        let before = std::fs::read_to_string(&key_file).unwrap();

        manager.ensure_initialized().unwrap();
        manager.init().unwrap();

        assert_eq!(std::fs::read_to_string(&key_file).unwrap(), before);
        assert_eq!(manager.metadata(SYMMETRIC_STORE).unwrap().last_version, 2);
    }

    #[test]
    fn test_bootstrap_resumes_store_without_versions() {
        let dir = tempfile::tempdir().unwrap();
        let config = KeySystemConfig::with_base_dir(dir.path());
        let half_made = FileStore::new(dir.path().join(SYMMETRIC_DIR));
        half_made.create().unwrap();
        half_made
            .write_metadata(&KeyStoreMetadata::new(SYMMETRIC_STORE, Purpose::Crypt, false, true))
            .unwrap();

        let manager = KeyStoreManager::new(
            config,
            Arc::new(Envelope::new()),
            Arc::new(InMemoryAuditSink::new()),
        )
        .unwrap();
        manager.ensure_initialized().unwrap();
        assert_eq!(manager.current_primary(SYMMETRIC_STORE).unwrap(), 1);
    }

    #[test]
    fn test_meta_store_created_on_first_access() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyStoreManager::new(
            KeySystemConfig::with_base_dir(dir.path()),
            Arc::new(Envelope::new()),
            Arc::new(InMemoryAuditSink::new()),
        )
        .unwrap();

        assert!(matches!(
            manager.metadata(SYMMETRIC_STORE),
            Err(KeystoreError::StoreNotFound(_))
        ));
        assert_eq!(manager.current_primary(META_STORE).unwrap(), 1);
    }

    #[test]
    fn test_store_names() {
        let (_dir, manager) = test_manager();
        assert_eq!(
            manager.store_names(),
            vec![META_STORE.to_string(), ASYMMETRIC_STORE.to_string(), SYMMETRIC_STORE.to_string()]
        );
        assert!(matches!(
            manager.metadata("nope"),
            Err(KeystoreError::StoreNotFound(_))
        ));
    }

    // === Add / Promote / Demote / Revoke ===

    #[test]
    fn test_add_key() {
        let (_dir, manager) = test_manager();
        assert_eq!(manager.add_key(SYMMETRIC_STORE, false).unwrap(), 3);
        assert_eq!(manager.add_key(SYMMETRIC_STORE, true).unwrap(), 4);
        assert_eq!(
            statuses(&manager, SYMMETRIC_STORE),
            vec![
                (1, Status::Active),
                (2, Status::Active),
                (3, Status::Active),
                (4, Status::Primary)
            ]
        );
        let crypter = manager.crypter(SYMMETRIC_STORE, true).unwrap();
        assert_eq!(crypter.primary_version(), 4);
    }

    #[test]
    fn test_promote_revoke_scenario() {
        let (dir, manager) = test_manager();
        manager.promote(SYMMETRIC_STORE, 2).unwrap();
        assert_eq!(
            statuses(&manager, SYMMETRIC_STORE),
            vec![(1, Status::Active), (2, Status::Primary)]
        );

        assert_eq!(manager.promote(SYMMETRIC_STORE, 1).unwrap(), Status::Primary);
        assert_eq!(
            statuses(&manager, SYMMETRIC_STORE),
            vec![(1, Status::Primary), (2, Status::Active)]
        );

        manager.revoke(SYMMETRIC_STORE, 2).unwrap();
        assert_eq!(statuses(&manager, SYMMETRIC_STORE), vec![(1, Status::Primary)]);
        assert!(!dir.path().join(SYMMETRIC_DIR).join("2.key").exists());

        assert!(matches!(
            manager.revoke(SYMMETRIC_STORE, 1),
            Err(KeystoreError::InvalidTransition { version: 1, .. })
        ));
        assert_eq!(statuses(&manager, SYMMETRIC_STORE), vec![(1, Status::Primary)]);
    }

    #[test]
    fn test_promote_primary_fails() {
        let (_dir, manager) = test_manager();
        assert!(matches!(
            manager.promote(SYMMETRIC_STORE, 1),
            Err(KeystoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_promote_to_primary_from_inactive() {
        let (_dir, manager) = test_manager();
        manager.demote(SYMMETRIC_STORE, 2, None).unwrap();
        assert_eq!(manager.promote_to_primary(SYMMETRIC_STORE, 2).unwrap(), 1);
        assert_eq!(
            statuses(&manager, SYMMETRIC_STORE),
            vec![(1, Status::Active), (2, Status::Primary)]
        );
    }

    #[test]
    fn test_demote_primary_requires_replacement() {
        let (_dir, manager) = test_manager();
        assert!(matches!(
            manager.demote(SYMMETRIC_STORE, 1, None),
            Err(KeystoreError::InvalidTransition { .. })
        ));
        assert_eq!(manager.current_primary(SYMMETRIC_STORE).unwrap(), 1);

        manager.demote(SYMMETRIC_STORE, 1, Some(2)).unwrap();
        assert_eq!(
            statuses(&manager, SYMMETRIC_STORE),
            vec![(1, Status::Active), (2, Status::Primary)]
        );
    }

    #[test]
    fn test_version_numbers_never_reused() {
        let (_dir, manager) = test_manager();
        manager.revoke(SYMMETRIC_STORE, 2).unwrap();
        assert_eq!(manager.add_key(SYMMETRIC_STORE, false).unwrap(), 3);
        assert_eq!(manager.metadata(SYMMETRIC_STORE).unwrap().last_version, 3);
    }

    #[test]
    fn test_unknown_version() {
        let (_dir, manager) = test_manager();
        assert!(matches!(
            manager.promote(SYMMETRIC_STORE, 99),
            Err(KeystoreError::VersionNotFound { version: 99, .. })
        ));
        assert!(matches!(
            manager.revoke(SYMMETRIC_STORE, 99),
            Err(KeystoreError::VersionNotFound { .. })
        ));
    }

    // === Encrypt / Decrypt ===

    #[test]
    fn test_local_roundtrip() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::from_config(manager).unwrap();
        assert_eq!(facade.local_store(), ASYMMETRIC_STORE);

        let ct = facade.encrypt(b"hello").unwrap();
        assert_eq!(ciphertext_version(&ct).unwrap(), 1);
        assert_eq!(facade.decrypt(&ct).unwrap(), b"hello");
    }

    #[test]
    fn test_encryption_is_non_deterministic() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::from_config(manager).unwrap();
        let c1 = facade.encrypt(b"same").unwrap();
        let c2 = facade.encrypt(b"same").unwrap();
        let c3 = facade.encrypt(b"same").unwrap();
        assert_ne!(c1, c2);
        assert_ne!(c2, c3);
        assert_ne!(c1, c3);
    }

    #[test]
    fn test_symmetric_store_roundtrip() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::new(manager, SYMMETRIC_STORE).unwrap();
        let ct = facade.encrypt(b"symmetric").unwrap();
        assert_eq!(facade.decrypt(&ct).unwrap(), b"symmetric");
    }

    #[test]
    fn test_encrypted_store_requires_layering() {
        let (_dir, manager) = test_manager();
        assert!(matches!(
            manager.crypter(SYMMETRIC_STORE, false),
            Err(KeystoreError::Corrupt { .. })
        ));
        assert!(matches!(
            manager.crypter(META_STORE, true),
            Err(KeystoreError::Configuration(_))
        ));
        manager.crypter(META_STORE, false).unwrap();
    }

    #[test]
    fn test_decrypt_after_rotation() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::from_config(manager.clone()).unwrap();
        let ct = facade.encrypt(b"before rotation").unwrap();

        manager.rotate().unwrap();
        assert_eq!(facade.local_key_version().unwrap(), 3);
        assert_eq!(manager.current_primary(META_STORE).unwrap(), 2);

        assert_eq!(facade.decrypt(&ct).unwrap(), b"before rotation");
        let fresh = facade.encrypt(b"after").unwrap();
        assert_eq!(ciphertext_version(&fresh).unwrap(), 3);
    }

    #[test]
    fn test_decrypt_garbage_fails() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::from_config(manager).unwrap();
        assert!(matches!(
            facade.decrypt(b"not a ciphertext"),
            Err(KeystoreError::Cipher(CipherError::InvalidCiphertext))
        ));
    }

    #[test]
    fn test_bootstrap_resumes_after_first_key() {
        let (dir, manager) = test_manager();
        drop(manager);

        // Roll the symmetric store back to its first bootstrap commit.
        let files = FileStore::new(dir.path().join(SYMMETRIC_DIR));
        let mut meta = files.read_metadata().unwrap();
        meta.versions.retain(|v| v.version == 1);
        meta.last_version = 1;
        files.write_metadata(&meta).unwrap();
        files.remove_key_material(2).unwrap();

        let manager = KeyStoreManager::new(
            KeySystemConfig::with_base_dir(dir.path()),
            Arc::new(Envelope::new()),
            Arc::new(InMemoryAuditSink::new()),
        )
        .unwrap();
        manager.ensure_initialized().unwrap();
        assert_eq!(
            statuses(&manager, SYMMETRIC_STORE),
            vec![(1, Status::Primary), (2, Status::Active)]
        );
        manager.crypter(SYMMETRIC_STORE, true).unwrap();

        // A store that revoked its second key later is left alone.
        manager.revoke(SYMMETRIC_STORE, 2).unwrap();
        manager.ensure_initialized().unwrap();
        assert_eq!(statuses(&manager, SYMMETRIC_STORE), vec![(1, Status::Primary)]);
    }

    // === Public companion ===

    #[test]
    fn test_encrypt_for_public_companion() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::new(manager, SYMMETRIC_STORE).unwrap();
        let ct = facade.encrypt_for(ASYMMETRIC_STORE, b"for the owner").unwrap();

        let owner = facade.crypter(ASYMMETRIC_STORE, true).unwrap();
        assert_eq!(owner.decrypt(&ct).unwrap(), b"for the owner");

        assert!(matches!(
            facade.encrypt_for(SYMMETRIC_STORE, b"x"),
            Err(KeystoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_companion_mirrors_source() {
        let (dir, manager) = test_manager();
        let companion = FileStore::new(dir.path().join(ASYMMETRIC_PUBLIC_DIR));

        manager.add_key(ASYMMETRIC_STORE, true).unwrap();
        manager.demote(ASYMMETRIC_STORE, 2, None).unwrap();
        manager.revoke(ASYMMETRIC_STORE, 2).unwrap();

        let source = manager.metadata(ASYMMETRIC_STORE).unwrap();
        let public = companion.read_metadata().unwrap();
        assert_eq!(public.versions, source.versions);
        assert!(companion.read_key_material(2).is_err());

        assert_eq!(manager.export_public_keys(ASYMMETRIC_STORE).unwrap(), 2);
        assert!(matches!(
            manager.export_public_keys(SYMMETRIC_STORE),
            Err(KeystoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_companion_cannot_decrypt() {
        let (dir, manager) = test_manager();
        let encrypter = manager.public_encrypter(ASYMMETRIC_STORE).unwrap();
        assert_eq!(encrypter.primary_version(), 1);
        assert_eq!(encrypter.store(), "asymmetric-public");

        let companion = FileStore::new(dir.path().join(ASYMMETRIC_PUBLIC_DIR));
        assert!(matches!(
            Crypter::load(&companion, Arc::new(Envelope::new())),
            Err(KeystoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_companion_drops_stale_material() {
        let (dir, manager) = test_manager();
        let companion = FileStore::new(dir.path().join(ASYMMETRIC_PUBLIC_DIR));
        companion.write_key_material(9, &[1, 2, 3]).unwrap();

        manager.demote(ASYMMETRIC_STORE, 2, None).unwrap();
        assert_eq!(companion.material_versions().unwrap(), vec![1, 2]);

        manager.revoke(ASYMMETRIC_STORE, 2).unwrap();
        assert_eq!(companion.material_versions().unwrap(), vec![1]);
        assert_eq!(
            companion.read_metadata().unwrap().versions,
            manager.metadata(ASYMMETRIC_STORE).unwrap().versions
        );
    }

    #[test]
    fn test_companion_failure_keeps_committed_change() {
        let (dir, manager, audit) = test_manager_with_audit();
        let public_dir = dir.path().join(ASYMMETRIC_PUBLIC_DIR);
        std::fs::remove_dir_all(&public_dir).unwrap();
        std::fs::write(&public_dir, "not a directory").unwrap();

        assert_eq!(manager.add_key(ASYMMETRIC_STORE, true).unwrap(), 3);
        let expected = vec![(1, Status::Active), (2, Status::Active), (3, Status::Primary)];
        assert_eq!(statuses(&manager, ASYMMETRIC_STORE), expected);

        let stale = audit
            .events_for_store(ASYMMETRIC_STORE)
            .iter()
            .filter(|e| !e.success && matches!(e.action, AuditAction::PublicKeysExported { .. }))
            .count();
        assert_eq!(stale, 1);

        let facade = CryptoFacade::from_config(manager.clone()).unwrap();
        let ct = facade.encrypt_with_version(b"pinned", 2).unwrap();
        assert_eq!(ciphertext_version(&ct).unwrap(), 2);
        assert_eq!(statuses(&manager, ASYMMETRIC_STORE), expected);

        assert!(manager.export_public_keys(ASYMMETRIC_STORE).is_err());
        std::fs::remove_file(&public_dir).unwrap();
        assert_eq!(manager.export_public_keys(ASYMMETRIC_STORE).unwrap(), 3);
        assert_eq!(manager.public_encrypter(ASYMMETRIC_STORE).unwrap().primary_version(), 3);
    }

    // === Re-encryption under a specific version ===

    /// Makes every metadata commit of `store_dir` fail from the moment it
    /// sees `version` promoted to `to`. Atomic writes stage through
    /// `meta.tmp`; a directory in its place cannot be opened for writing.
    struct FailCommitsAfter {
        store_dir: PathBuf,
        version: u32,
        to: Status,
    }

    impl AuditSink for FailCommitsAfter {
        fn record(&self, event: AuditEvent) {
            if event.store.as_deref() == Some(ASYMMETRIC_STORE)
                && event.key_version == Some(self.version)
                && event.action == (AuditAction::KeyPromoted { to: self.to })
            {
                let _ = std::fs::create_dir(self.store_dir.join("meta.tmp"));
            }
        }
    }

    fn failing_manager(version: u32, to: Status) -> (TempDir, Arc<KeyStoreManager>) {
        let dir = tempfile::tempdir().unwrap();
        let sink = FailCommitsAfter {
            store_dir: dir.path().join(ASYMMETRIC_DIR),
            version,
            to,
        };
        let manager = KeyStoreManager::new(
            KeySystemConfig::with_base_dir(dir.path()),
            Arc::new(Envelope::new()),
            Arc::new(sink),
        )
        .unwrap();
        manager.ensure_initialized().unwrap();
        (dir, Arc::new(manager))
    }

    #[test]
    fn test_failed_target_promotion_reports_inconsistent_state() {
        let (dir, manager) = failing_manager(2, Status::Active);
        manager.demote(ASYMMETRIC_STORE, 2, None).unwrap();
        let facade = CryptoFacade::from_config(manager.clone()).unwrap();

        match facade.encrypt_with_version(b"pinned", 2) {
            Err(KeystoreError::InconsistentPrimaryState {
                store,
                expected_primary,
                reason,
            }) => {
                assert_eq!(store, ASYMMETRIC_STORE);
                assert_eq!(expected_primary, 1);
                assert!(reason.starts_with("promote target"), "{}", reason);
            }
            other => panic!("expected InconsistentPrimaryState, got {:?}", other),
        }
        // First promotion step committed; the undo could not.
        assert_eq!(
            statuses(&manager, ASYMMETRIC_STORE),
            vec![(1, Status::Primary), (2, Status::Active)]
        );

        std::fs::remove_dir(dir.path().join(ASYMMETRIC_DIR).join("meta.tmp")).unwrap();
        let ct = facade.encrypt_with_version(b"pinned", 2).unwrap();
        assert_eq!(ciphertext_version(&ct).unwrap(), 2);
        assert_eq!(facade.decrypt(&ct).unwrap(), b"pinned");
        assert_eq!(
            statuses(&manager, ASYMMETRIC_STORE),
            vec![(1, Status::Primary), (2, Status::Active)]
        );
    }

    #[test]
    fn test_failed_restore_reports_inconsistent_state() {
        let (dir, manager) = failing_manager(2, Status::Primary);
        let facade = CryptoFacade::from_config(manager.clone()).unwrap();

        match facade.encrypt_with_version(b"pinned", 2) {
            Err(KeystoreError::InconsistentPrimaryState {
                store,
                expected_primary,
                reason,
            }) => {
                assert_eq!(store, ASYMMETRIC_STORE);
                assert_eq!(expected_primary, 1);
                assert!(reason.starts_with("restore prior primary"), "{}", reason);
            }
            other => panic!("expected InconsistentPrimaryState, got {:?}", other),
        }
        assert_eq!(
            statuses(&manager, ASYMMETRIC_STORE),
            vec![(1, Status::Active), (2, Status::Primary)]
        );

        // Operator recovery once the disk is writable again.
        std::fs::remove_dir(dir.path().join(ASYMMETRIC_DIR).join("meta.tmp")).unwrap();
        assert_eq!(manager.promote_to_primary(ASYMMETRIC_STORE, 1).unwrap(), 2);
        assert_eq!(
            statuses(&manager, ASYMMETRIC_STORE),
            vec![(1, Status::Primary), (2, Status::Active)]
        );
    }


    #[test]
    fn test_encrypt_with_inactive_version_restores_state() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::from_config(manager.clone()).unwrap();
        manager.demote(ASYMMETRIC_STORE, 2, None).unwrap();
        let before = statuses(&manager, ASYMMETRIC_STORE);
        assert_eq!(before, vec![(1, Status::Primary), (2, Status::Inactive)]);

        let ct = facade.encrypt_with_version(b"legacy", 2).unwrap();
        assert_eq!(ciphertext_version(&ct).unwrap(), 2);
        assert_eq!(statuses(&manager, ASYMMETRIC_STORE), before);
        assert_eq!(facade.decrypt(&ct).unwrap(), b"legacy");
    }

    #[test]
    fn test_encrypt_with_active_version_restores_state() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::from_config(manager.clone()).unwrap();
        let before = statuses(&manager, ASYMMETRIC_STORE);

        let ct = facade.encrypt_with_version(b"older", 2).unwrap();
        assert_eq!(ciphertext_version(&ct).unwrap(), 2);
        assert_eq!(statuses(&manager, ASYMMETRIC_STORE), before);
        assert_eq!(facade.local_key_version().unwrap(), 1);
    }

    #[test]
    fn test_encrypt_with_primary_version_is_plain_encrypt() {
        let (_dir, manager, audit) = test_manager_with_audit();
        let facade = CryptoFacade::from_config(manager.clone()).unwrap();
        let before = audit.len();
        let ct = facade.encrypt_with_version(b"now", 1).unwrap();
        assert_eq!(ciphertext_version(&ct).unwrap(), 1);
        let new_events = &audit.events()[before..];
        assert!(new_events
            .iter()
            .all(|e| !matches!(e.action, AuditAction::KeyPromoted { .. })));
    }

    #[test]
    fn test_encrypt_with_unknown_version_leaves_store_alone() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::from_config(manager.clone()).unwrap();
        let before = statuses(&manager, ASYMMETRIC_STORE);
        assert!(matches!(
            facade.encrypt_with_version(b"x", 9),
            Err(KeystoreError::VersionNotFound { version: 9, .. })
        ));
        assert_eq!(statuses(&manager, ASYMMETRIC_STORE), before);
    }

    #[test]
    fn test_concurrent_encrypt_and_reencrypt() {
        let (_dir, manager) = test_manager();
        let facade = Arc::new(CryptoFacade::from_config(manager.clone()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let facade = facade.clone();
                std::thread::spawn(move || {
                    for _ in 0..3 {
                        let ct = if i % 2 == 0 {
                            facade.encrypt_with_version(b"pinned", 2).unwrap()
                        } else {
                            facade.encrypt(b"current").unwrap()
                        };
                        let expected: &[u8] = if i % 2 == 0 { b"pinned" } else { b"current" };
                        assert_eq!(facade.decrypt(&ct).unwrap(), expected);
                        if i % 2 == 1 {
                            assert_eq!(ciphertext_version(&ct).unwrap(), 1);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            statuses(&manager, ASYMMETRIC_STORE),
            vec![(1, Status::Primary), (2, Status::Active)]
        );
    }

    // === Rewrap / Rotate ===

    #[test]
    fn test_rewrap_after_meta_rotation() {
        let (_dir, manager) = test_manager();
        assert_eq!(manager.add_key(META_STORE, true).unwrap(), 2);
        manager.demote(META_STORE, 1, None).unwrap();

        // Both stores still hold material wrapped under meta v1.
        assert!(matches!(
            manager.revoke(META_STORE, 1),
            Err(KeystoreError::InvalidTransition { version: 1, .. })
        ));
        assert_eq!(
            statuses(&manager, META_STORE),
            vec![(1, Status::Inactive), (2, Status::Primary)]
        );

        assert_eq!(manager.rewrap(SYMMETRIC_STORE).unwrap(), 2);
        assert_eq!(manager.rewrap(SYMMETRIC_STORE).unwrap(), 0);
        let err = manager.revoke(META_STORE, 1).unwrap_err();
        assert!(err.to_string().contains("rewrap asymmetric"), "{}", err);

        assert_eq!(manager.rewrap(ASYMMETRIC_STORE).unwrap(), 2);
        manager.revoke(META_STORE, 1).unwrap();
        assert_eq!(statuses(&manager, META_STORE), vec![(2, Status::Primary)]);

        for store in [SYMMETRIC_STORE, ASYMMETRIC_STORE] {
            manager.crypter(store, true).unwrap();
        }
        assert!(matches!(
            manager.rewrap(META_STORE),
            Err(KeystoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_rotate_allows_retiring_old_meta_key() {
        let (_dir, manager) = test_manager();
        let facade = CryptoFacade::from_config(manager.clone()).unwrap();
        let ct = facade.encrypt(b"survives").unwrap();

        manager.rotate().unwrap();
        manager.demote(META_STORE, 1, None).unwrap();
        manager.revoke(META_STORE, 1).unwrap();

        for store in [SYMMETRIC_STORE, ASYMMETRIC_STORE] {
            assert_eq!(manager.crypter(store, true).unwrap().primary_version(), 3);
        }
        assert_eq!(facade.decrypt(&ct).unwrap(), b"survives");
    }

    // === Audit ===

    #[test]
    fn test_audit_events_generated() {
        let (_dir, manager, audit) = test_manager_with_audit();
        let created = audit
            .events()
            .iter()
            .filter(|e| e.action == AuditAction::StoreCreated)
            .count();
        assert_eq!(created, 3);

        manager.promote(SYMMETRIC_STORE, 2).unwrap();
        let last = audit.events_for_store(SYMMETRIC_STORE).pop().unwrap();
        assert_eq!(last.action, AuditAction::KeyPromoted { to: Status::Primary });
        assert_eq!(last.key_version, Some(2));
    }

    #[test]
    fn test_audit_tracks_decryption_failure() {
        let (_dir, manager, audit) = test_manager_with_audit();
        let facade = CryptoFacade::from_config(manager).unwrap();
        let mut ct = facade.encrypt(b"data").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 1;
        assert!(facade.decrypt(&ct).is_err());

        let event = audit.events().pop().unwrap();
        assert_eq!(event.action, AuditAction::DecryptionFailed);
        assert!(!event.success);
    }

    // === Configuration ===

    #[test]
    fn test_facade_unknown_store() {
        let (_dir, manager) = test_manager();
        assert!(matches!(
            CryptoFacade::new(manager, "elsewhere"),
            Err(KeystoreError::StoreNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KeySystemConfig::with_base_dir(dir.path());
        config.local_store = "missing".into();
        assert!(KeyStoreManager::new(
            config,
            Arc::new(Envelope::new()),
            Arc::new(InMemoryAuditSink::new())
        )
        .is_err());
    }
}
