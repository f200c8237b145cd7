//! Error types for key stores and the crypto façade.

use crate::types::Status;
use keyward_envelope::CipherError;
use std::fmt;
use std::path::PathBuf;

/// Every failure surfaced by the key-store layer.
///
/// Lower-level errors are wrapped, never swallowed. Key material is never
/// included in messages.
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("key store not found: {0}")]
    StoreNotFound(String),

    #[error("version {version} not found in store {store}")]
    VersionNotFound { store: String, version: u32 },

    #[error("invalid transition for {store} v{version} ({status}): {reason}")]
    InvalidTransition {
        store: String,
        version: u32,
        status: Status,
        reason: String,
    },

    #[error("cannot decrypt key material for {store} v{version}")]
    DecryptionFailed { store: String, version: u32 },

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("failed to persist {}: {source}", .path.display())]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt key store data at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("key store {0} has no primary key")]
    NoPrimary(String),

    #[error(
        "inconsistent primary state in {store}: expected primary v{expected_primary}: {reason}"
    )]
    InconsistentPrimaryState {
        store: String,
        expected_primary: u32,
        reason: String,
    },
}

impl KeystoreError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PersistenceFailed {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(location: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::Corrupt {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn transition(
        store: &str,
        version: u32,
        status: Status,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            store: store.to_string(),
            version,
            status,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KeystoreError>;
