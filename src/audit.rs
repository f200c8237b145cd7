//! Audit logging: every lifecycle operation emits a structured event.

use crate::types::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    StoreCreated,
    KeyAdded { as_primary: bool },
    KeyPromoted { to: Status },
    KeyDemoted { to: Status, replacement: Option<u32> },
    KeyRevoked,
    PublicKeysExported { versions: usize },
    MaterialRewrapped { versions: usize, meta_version: u32 },
    StoresRotated { stores: usize },
    ReencryptedUnderVersion { prior_primary: u32 },
    EncryptionPerformed,
    DecryptionPerformed,
    DecryptionFailed,
}

/// A structured audit event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// Which store was involved.
    pub store: Option<String>,
    /// Which key version, if one is specific to the action.
    pub key_version: Option<u32>,
    pub action: AuditAction,
    /// Who or what triggered this.
    pub actor: String,
    pub success: bool,
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Event about one store.
    pub fn store_event(store: &str, action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            store: Some(store.to_string()),
            key_version: None,
            action,
            actor: "system".into(),
            success: true,
            detail: None,
        }
    }

    /// Event about one version of a store.
    pub fn key_event(store: &str, version: u32, action: AuditAction) -> Self {
        Self {
            key_version: Some(version),
            ..Self::store_event(store, action)
        }
    }

    /// System-level event (no specific store).
    pub fn system_event(action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            store: None,
            key_version: None,
            action,
            actor: "system".into(),
            success: true,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.success = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Audit sink trait
// ---------------------------------------------------------------------------

/// Where audit events go.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

// ---------------------------------------------------------------------------
// Built-in sinks
// ---------------------------------------------------------------------------

/// Logs events via the `tracing` crate.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            timestamp = %event.timestamp,
            store = ?event.store,
            key_version = ?event.key_version,
            action = ?event.action,
            actor = %event.actor,
            success = event.success,
            detail = ?event.detail,
            "audit"
        );
    }
}

/// Collects events in memory (for testing).
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events_for_store(&self, store: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.store.as_deref() == Some(store))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Appends one JSON event per line to a file.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) {
        use std::io::Write;
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "audit serialize error");
                return;
            }
        };
        let written = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{}", json));
        if let Err(e) = written {
            tracing::warn!(path = %self.path.display(), error = %e, "audit write error");
        }
    }
}
