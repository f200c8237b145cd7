//! Key system configuration: where the meta store and managed stores live.
//!
//! Environment:
//!   KEYWARD_CONFIG  - path to a JSON config file (takes precedence)
//!   KEYWARD_HOME    - base directory for the default layout (default: ./keyward-data)

use crate::error::{KeystoreError, Result};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const META_DIR: &str = "crypterkey";
pub const SYMMETRIC_DIR: &str = "keys-symm";
pub const ASYMMETRIC_DIR: &str = "keys-asymm";
pub const ASYMMETRIC_PUBLIC_DIR: &str = "keys-asymm-public";

pub const SYMMETRIC_STORE: &str = "symmetric";
pub const ASYMMETRIC_STORE: &str = "asymmetric";

/// Name under which the meta store is managed.
pub const META_STORE: &str = "meta";

const DEFAULT_HOME: &str = "./keyward-data";

/// One managed store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    pub directory: PathBuf,
    #[serde(default)]
    pub asymmetric: bool,
    #[serde(default = "default_true")]
    pub encrypted: bool,
    /// Directory of the plaintext public companion (asymmetric stores only).
    #[serde(default)]
    pub public_directory: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySystemConfig {
    /// Directory of the meta store that wraps every encrypted store.
    pub meta_directory: PathBuf,
    pub stores: Vec<StoreConfig>,
    /// Store the crypto façade encrypts under.
    pub local_store: String,
}

impl KeySystemConfig {
    /// Default four-directory layout under `base`: the meta store, one
    /// symmetric encrypted store, and one asymmetric encrypted store with its
    /// public companion. The asymmetric store is the local store.
    pub fn with_base_dir(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            meta_directory: base.join(META_DIR),
            stores: vec![
                StoreConfig {
                    name: SYMMETRIC_STORE.into(),
                    directory: base.join(SYMMETRIC_DIR),
                    asymmetric: false,
                    encrypted: true,
                    public_directory: None,
                },
                StoreConfig {
                    name: ASYMMETRIC_STORE.into(),
                    directory: base.join(ASYMMETRIC_DIR),
                    asymmetric: true,
                    encrypted: true,
                    public_directory: Some(base.join(ASYMMETRIC_PUBLIC_DIR)),
                },
            ],
            local_store: ASYMMETRIC_STORE.into(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            KeystoreError::Configuration(format!("read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            KeystoreError::Configuration(format!("parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("KEYWARD_CONFIG") {
            let path = path.trim();
            if !path.is_empty() {
                tracing::debug!(path, "loading config file");
                return Self::from_file(path);
            }
        }
        let home = std::env::var("KEYWARD_HOME").unwrap_or_else(|_| DEFAULT_HOME.into());
        Ok(Self::with_base_dir(home))
    }

    pub fn store(&self, name: &str) -> Option<&StoreConfig> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Rejects duplicate or reserved names, shared directories, companions on
    /// symmetric stores, and an unknown local store.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut dirs = HashSet::new();
        dirs.insert(self.meta_directory.clone());

        for store in &self.stores {
            if store.name.is_empty() || store.name == META_STORE {
                return Err(KeystoreError::Configuration(format!(
                    "invalid store name: {:?}",
                    store.name
                )));
            }
            if !names.insert(store.name.as_str()) {
                return Err(KeystoreError::Configuration(format!(
                    "duplicate store name: {}",
                    store.name
                )));
            }
            for dir in std::iter::once(&store.directory).chain(store.public_directory.as_ref()) {
                if !dirs.insert(dir.clone()) {
                    return Err(KeystoreError::Configuration(format!(
                        "directory used twice: {}",
                        dir.display()
                    )));
                }
            }
            if store.public_directory.is_some() && !store.asymmetric {
                return Err(KeystoreError::Configuration(format!(
                    "store {} is symmetric and cannot have a public companion",
                    store.name
                )));
            }
        }

        if self.store(&self.local_store).is_none() {
            return Err(KeystoreError::Configuration(format!(
                "local store {} is not configured",
                self.local_store
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_dir_layout() {
        let config = KeySystemConfig::with_base_dir("/srv/keys");
        assert_eq!(config.meta_directory, PathBuf::from("/srv/keys/crypterkey"));
        let asym = config.store(ASYMMETRIC_STORE).unwrap();
        assert!(asym.asymmetric && asym.encrypted);
        assert_eq!(
            asym.public_directory.as_deref(),
            Some(Path::new("/srv/keys/keys-asymm-public"))
        );
        assert_eq!(
            config.store(SYMMETRIC_STORE).unwrap().directory,
            PathBuf::from("/srv/keys/keys-symm")
        );
        config.validate().unwrap();
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut config = KeySystemConfig::with_base_dir("/k");
        config.stores[1].name = SYMMETRIC_STORE.into();
        config.local_store = SYMMETRIC_STORE.into();
        assert!(matches!(config.validate(), Err(KeystoreError::Configuration(_))));
    }

    #[test]
    fn shared_directory_rejected() {
        let mut config = KeySystemConfig::with_base_dir("/k");
        config.stores[0].directory = config.meta_directory.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_local_store_rejected() {
        let mut config = KeySystemConfig::with_base_dir("/k");
        config.local_store = "elsewhere".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn symmetric_companion_rejected() {
        let mut config = KeySystemConfig::with_base_dir("/k");
        config.stores[0].public_directory = Some("/k/pub".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyward.json");
        std::fs::write(
            &path,
            r#"{
                "meta_directory": "/k/meta",
                "stores": [ { "name": "app", "directory": "/k/app" } ],
                "local_store": "app"
            }"#,
        )
        .unwrap();

        let config = KeySystemConfig::from_file(&path).unwrap();
        let app = config.store("app").unwrap();
        assert!(app.encrypted);
        assert!(!app.asymmetric);
        assert!(app.public_directory.is_none());
    }

    #[test]
    fn from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            KeySystemConfig::from_file(dir.path().join("nope.json")),
            Err(KeystoreError::Configuration(_))
        ));
    }
}
