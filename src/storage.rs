//! Storage: where store metadata and key material live.

use crate::error::{KeystoreError, Result};
use crate::lifecycle;
use crate::types::KeyStoreMetadata;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use zeroize::Zeroizing;

/// Metadata file name inside a store directory.
pub const METADATA_FILE: &str = "meta.json";

const KEY_EXTENSION: &str = "key";
const TMP_EXTENSION: &str = "tmp";

// ---------------------------------------------------------------------------
// Reader / writer traits
// ---------------------------------------------------------------------------

/// Read side of one store. A reader is bound to a single store.
pub trait StoreReader: Send + Sync {
    fn read_metadata(&self) -> Result<KeyStoreMetadata>;

    /// Raw material bytes as stored (still wrapped for encrypted stores).
    fn read_key_material(&self, version: u32) -> Result<Zeroizing<Vec<u8>>>;
}

/// Write side of one store.
pub trait StoreWriter: Send + Sync {
    fn write_metadata(&self, meta: &KeyStoreMetadata) -> Result<()>;
    fn write_key_material(&self, version: u32, material: &[u8]) -> Result<()>;
    fn remove_key_material(&self, version: u32) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    metadata: Option<KeyStoreMetadata>,
    material: BTreeMap<u32, Zeroizing<Vec<u8>>>,
}

/// In-memory store (for testing and ephemeral use).
#[derive(Default)]
pub struct MemoryStore {
    name: String,
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl StoreReader for MemoryStore {
    fn read_metadata(&self) -> Result<KeyStoreMetadata> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .metadata
            .clone()
            .ok_or_else(|| KeystoreError::StoreNotFound(self.name.clone()))
    }

    fn read_key_material(&self, version: u32) -> Result<Zeroizing<Vec<u8>>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.material.get(&version).cloned().ok_or_else(|| {
            KeystoreError::corrupt(format!("{}/{}", self.name, version), "missing key material")
        })
    }
}

impl StoreWriter for MemoryStore {
    fn write_metadata(&self, meta: &KeyStoreMetadata) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.metadata = Some(meta.clone());
        Ok(())
    }

    fn write_key_material(&self, version: u32, material: &[u8]) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.material.insert(version, Zeroizing::new(material.to_vec()));
        Ok(())
    }

    fn remove_key_material(&self, version: u32) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.material.remove(&version);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// File-based store bound to one directory.
///
/// Directory layout:
/// ```text
/// store/
///   meta.json      serde JSON of KeyStoreMetadata
///   1.key          hex of the version's material
///   2.key
/// ```
///
/// Every write goes to a temp file first and is renamed into place, so a
/// reader sees either the old or the new file. Material files are `0600` on
/// Unix.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if missing.
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            KeystoreError::Configuration(format!(
                "cannot create store directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }

    /// Missing directory, or a directory with no entries.
    pub fn is_empty(&self) -> Result<bool> {
        match fs::read_dir(&self.dir) {
            Ok(mut entries) => Ok(entries.next().is_none()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(KeystoreError::Configuration(format!(
                "cannot read store directory {}: {}",
                self.dir.display(),
                e
            ))),
        }
    }

    /// Whether a metadata file has been committed.
    pub fn exists(&self) -> bool {
        self.metadata_path().is_file()
    }

    /// Versions with a material file on disk, listed or not. Other files are
    /// ignored.
    pub fn material_versions(&self) -> Result<Vec<u32>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KeystoreError::persistence(&self.dir, e)),
        };
        let mut versions = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| KeystoreError::persistence(&self.dir, e))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }
            if let Some(version) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    fn key_path(&self, version: u32) -> PathBuf {
        self.dir.join(format!("{}.{}", version, KEY_EXTENSION))
    }
}

impl StoreReader for FileStore {
    fn read_metadata(&self) -> Result<KeyStoreMetadata> {
        let path = self.metadata_path();
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(KeystoreError::StoreNotFound(self.dir.display().to_string()))
            }
            Err(e) => return Err(KeystoreError::corrupt(path.display(), e)),
        };
        let meta: KeyStoreMetadata =
            serde_json::from_str(&data).map_err(|e| KeystoreError::corrupt(path.display(), e))?;
        if let Some(reason) = lifecycle::violation(&meta) {
            return Err(KeystoreError::corrupt(path.display(), reason));
        }
        Ok(meta)
    }

    fn read_key_material(&self, version: u32) -> Result<Zeroizing<Vec<u8>>> {
        let path = self.key_path(version);
        let text = Zeroizing::new(
            fs::read_to_string(&path).map_err(|e| KeystoreError::corrupt(path.display(), e))?,
        );
        let bytes = hex::decode(text.trim()).map_err(|e| KeystoreError::corrupt(path.display(), e))?;
        Ok(Zeroizing::new(bytes))
    }
}

impl StoreWriter for FileStore {
    fn write_metadata(&self, meta: &KeyStoreMetadata) -> Result<()> {
        let path = self.metadata_path();
        let json = serde_json::to_string_pretty(meta)
            .map_err(|e| KeystoreError::corrupt(path.display(), e))?;
        write_atomic(&path, json.as_bytes())
    }

    fn write_key_material(&self, version: u32, material: &[u8]) -> Result<()> {
        let encoded = Zeroizing::new(hex::encode(material));
        write_atomic(&self.key_path(version), encoded.as_bytes())
    }

    fn remove_key_material(&self, version: u32) -> Result<()> {
        let path = self.key_path(version);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeystoreError::persistence(path, e)),
        }
    }

}

// Atomic write: write to temp, then rename
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension(TMP_EXTENSION);
    let mut file = open_private(&tmp).map_err(|e| KeystoreError::persistence(&tmp, e))?;
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .map_err(|e| KeystoreError::persistence(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| KeystoreError::persistence(path, e))
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
