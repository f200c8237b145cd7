//! Key lifecycle state machine.
//!
//! Pure functions over [`KeyStoreMetadata`]: they mutate a loaded copy and
//! never touch storage. Callers persist the copy only when the function
//! returns `Ok`, so a rejected transition leaves the store unchanged.
//!
//! ```text
//!            promote            promote
//! INACTIVE ──────────▶ ACTIVE ──────────▶ PRIMARY
//!          ◀──────────        ◀──────────
//!            demote            demote (needs a replacement primary)
//! ```

use chrono::Utc;

use crate::error::{KeystoreError, Result};
use crate::types::{KeyStoreMetadata, KeyVersionRecord, Status};

/// One hop along the status ladder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Promote,
    Demote,
}

/// Steps needed to move a version from `from` to `to`. Empty when equal.
pub fn plan(from: Status, to: Status) -> &'static [Step] {
    use Status::*;
    match (from, to) {
        (Inactive, Active) | (Active, Primary) => &[Step::Promote],
        (Inactive, Primary) => &[Step::Promote, Step::Promote],
        (Active, Inactive) | (Primary, Active) => &[Step::Demote],
        (Primary, Inactive) => &[Step::Demote, Step::Demote],
        (Primary, Primary) | (Active, Active) | (Inactive, Inactive) => &[],
    }
}

/// Status reached by one promotion, if any.
pub fn promoted(status: Status) -> Option<Status> {
    match status {
        Status::Inactive => Some(Status::Active),
        Status::Active => Some(Status::Primary),
        Status::Primary => None,
    }
}

/// Status reached by one demotion, if any.
pub fn demoted(status: Status) -> Option<Status> {
    match status {
        Status::Primary => Some(Status::Active),
        Status::Active => Some(Status::Inactive),
        Status::Inactive => None,
    }
}

fn status_of(meta: &KeyStoreMetadata, version: u32) -> Result<Status> {
    meta.status_of(version)
        .ok_or_else(|| KeystoreError::VersionNotFound {
            store: meta.name.clone(),
            version,
        })
}

fn set_status(meta: &mut KeyStoreMetadata, version: u32, status: Status) {
    if let Some(record) = meta.version_mut(version) {
        record.status = status;
    }
}

fn demote_current_primary(meta: &mut KeyStoreMetadata) {
    for record in meta.versions.iter_mut() {
        if record.status == Status::Primary {
            record.status = Status::Active;
        }
    }
}

/// Append a new version numbered `last_version + 1`.
///
/// With `as_primary` the current primary drops to `ACTIVE`. The first key of
/// an empty store must be primary.
pub fn append(meta: &mut KeyStoreMetadata, as_primary: bool) -> Result<u32> {
    let version = meta.last_version.checked_add(1).ok_or_else(|| {
        KeystoreError::transition(&meta.name, meta.last_version, Status::Active, "version numbers exhausted")
    })?;

    if meta.is_empty() && !as_primary {
        return Err(KeystoreError::transition(
            &meta.name,
            version,
            Status::Active,
            "the first key of a store must be added as primary",
        ));
    }

    let status = if as_primary {
        demote_current_primary(meta);
        Status::Primary
    } else {
        Status::Active
    };

    let now = Utc::now();
    meta.versions.push(KeyVersionRecord {
        version,
        status,
        created_at: now,
    });
    meta.last_version = version;
    meta.updated_at = now;
    Ok(version)
}

/// `INACTIVE → ACTIVE` or `ACTIVE → PRIMARY`. Returns the new status.
pub fn promote(meta: &mut KeyStoreMetadata, version: u32) -> Result<Status> {
    let status = status_of(meta, version)?;
    let next = promoted(status).ok_or_else(|| {
        KeystoreError::transition(&meta.name, version, status, "already primary")
    })?;

    if next == Status::Primary {
        demote_current_primary(meta);
    }
    set_status(meta, version, next);
    meta.updated_at = Utc::now();
    Ok(next)
}

/// `ACTIVE → INACTIVE`, or `PRIMARY → ACTIVE` when `promote_instead` names
/// an `ACTIVE` version that takes over as primary. Returns the new status.
pub fn demote(
    meta: &mut KeyStoreMetadata,
    version: u32,
    promote_instead: Option<u32>,
) -> Result<Status> {
    let status = status_of(meta, version)?;
    match status {
        Status::Inactive => Err(KeystoreError::transition(
            &meta.name,
            version,
            status,
            "inactive keys cannot be demoted further",
        )),
        Status::Active => {
            if promote_instead.is_some() {
                return Err(KeystoreError::transition(
                    &meta.name,
                    version,
                    status,
                    "a replacement primary is only accepted when demoting the primary",
                ));
            }
            set_status(meta, version, Status::Inactive);
            meta.updated_at = Utc::now();
            Ok(Status::Inactive)
        }
        Status::Primary => {
            let replacement = promote_instead.ok_or_else(|| {
                KeystoreError::transition(
                    &meta.name,
                    version,
                    status,
                    "demoting the primary requires a replacement primary",
                )
            })?;
            let replacement_status = status_of(meta, replacement)?;
            if replacement_status != Status::Active {
                return Err(KeystoreError::transition(
                    &meta.name,
                    replacement,
                    replacement_status,
                    "replacement primary must be ACTIVE",
                ));
            }
            set_status(meta, version, Status::Active);
            set_status(meta, replacement, Status::Primary);
            meta.updated_at = Utc::now();
            Ok(Status::Active)
        }
    }
}

/// Remove a non-primary version. Returns the removed record.
pub fn revoke(meta: &mut KeyStoreMetadata, version: u32) -> Result<KeyVersionRecord> {
    let status = status_of(meta, version)?;
    if status == Status::Primary {
        return Err(KeystoreError::transition(
            &meta.name,
            version,
            status,
            "the primary key cannot be revoked",
        ));
    }
    let idx = meta
        .versions
        .iter()
        .position(|v| v.version == version)
        .ok_or_else(|| KeystoreError::VersionNotFound {
            store: meta.name.clone(),
            version,
        })?;
    let record = meta.versions.remove(idx);
    meta.updated_at = Utc::now();
    Ok(record)
}

/// Describe the first structural invariant `meta` breaks, if any.
///
/// A store without a primary is reported separately as `NoPrimary` when a
/// key set is loaded; this only covers ordering, uniqueness and the single
/// primary rule.
pub fn violation(meta: &KeyStoreMetadata) -> Option<String> {
    let primaries = meta.versions_in(Status::Primary).len();
    if primaries > 1 {
        return Some(format!("{} primary versions", primaries));
    }
    let mut prev = 0;
    for record in &meta.versions {
        if record.version == 0 || record.version <= prev {
            return Some(format!("version {} out of order", record.version));
        }
        if record.version > meta.last_version {
            return Some(format!(
                "version {} exceeds last assigned version {}",
                record.version, meta.last_version
            ));
        }
        prev = record.version;
    }
    None
}
