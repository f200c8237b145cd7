//! Core types: Status, Purpose, KeyVersionRecord, KeyStoreMetadata.

use chrono::{DateTime, Utc};
use keyward_envelope::KeyKind;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Key status
// ---------------------------------------------------------------------------

/// Status of one key version within a store.
///
/// ```text
/// INACTIVE ⇄ ACTIVE ⇄ PRIMARY
/// ```
///
/// Exactly one version of an initialized store is `PRIMARY`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Used for every new encryption.
    Primary,
    /// Decrypts; eligible for promotion to primary.
    Active,
    /// Decrypts only.
    Inactive,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Primary => write!(f, "PRIMARY"),
            Status::Active => write!(f, "ACTIVE"),
            Status::Inactive => write!(f, "INACTIVE"),
        }
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PRIMARY" => Ok(Status::Primary),
            "ACTIVE" => Ok(Status::Active),
            "INACTIVE" => Ok(Status::Inactive),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Store classification
// ---------------------------------------------------------------------------

/// What a store's keys are allowed to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Purpose {
    /// Encrypt and decrypt.
    Crypt,
    /// Encrypt only (public companion stores).
    Encrypt,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Purpose::Crypt => write!(f, "CRYPT"),
            Purpose::Encrypt => write!(f, "ENCRYPT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Version records
// ---------------------------------------------------------------------------

/// Status record for one key version. The material lives in its own file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionRecord {
    /// Version number (1, 2, 3, ...). Never reused.
    pub version: u32,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store metadata
// ---------------------------------------------------------------------------

/// Everything about a store except its key material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyStoreMetadata {
    pub name: String,
    pub purpose: Purpose,
    /// Hybrid asymmetric keys rather than symmetric keys.
    pub asymmetric: bool,
    /// Key material is wrapped by the meta store.
    pub encrypted: bool,
    /// Ordered by version.
    pub versions: Vec<KeyVersionRecord>,
    /// Highest version ever assigned, including revoked ones.
    pub last_version: u32,
    pub updated_at: DateTime<Utc>,
}

impl KeyStoreMetadata {
    pub fn new(name: impl Into<String>, purpose: Purpose, asymmetric: bool, encrypted: bool) -> Self {
        Self {
            name: name.into(),
            purpose,
            asymmetric,
            encrypted,
            versions: Vec::new(),
            last_version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Family of key material this store holds.
    pub fn key_kind(&self) -> KeyKind {
        if self.asymmetric {
            KeyKind::Hybrid
        } else {
            KeyKind::Symmetric
        }
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn primary(&self) -> Option<&KeyVersionRecord> {
        self.versions.iter().find(|v| v.status == Status::Primary)
    }

    pub fn version(&self, version: u32) -> Option<&KeyVersionRecord> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub(crate) fn version_mut(&mut self, version: u32) -> Option<&mut KeyVersionRecord> {
        self.versions.iter_mut().find(|v| v.version == version)
    }

    pub fn status_of(&self, version: u32) -> Option<Status> {
        self.version(version).map(|v| v.status)
    }

    /// Versions in the given status, ascending.
    pub fn versions_in(&self, status: Status) -> Vec<u32> {
        self.versions
            .iter()
            .filter(|v| v.status == status)
            .map(|v| v.version)
            .collect()
    }
}
