//! # Snapshot Persistence
//!
//! [`WorldSnapshot`] is the serializable state of a [`Core`](crate::Core):
//! live entities, stored components, and everything still queued for the
//! next commit phase. Components are tagged by their `Component::KIND`, so
//! loading needs a [`ComponentRegistry`](lockstep_core::ComponentRegistry)
//! naming every type that may appear.
//!
//! Encoding is JSON. The encoding is canonical: object keys are sorted and
//! records are ordered by kind then entity, so
//! `encode(decode(encode(s))) == encode(s)` byte for byte.

use std::fs;
use std::path::{Path, PathBuf};

use lockstep_core::{ComponentRecord, EntityRecord};
use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, PersistenceResult};

/// Serializable state of a simulation core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Next id the core's allocator hands out.
    pub next_entity_id: u64,
    /// Ticks executed so far.
    pub tick: u64,
    /// Simulated milliseconds elapsed.
    pub clock_ms: u64,
    /// Live entities in id order.
    pub entities: Vec<EntityRecord>,
    /// Stored components, ordered by kind then entity.
    pub components: Vec<ComponentRecord>,
    /// Entities queued for the next commit.
    pub pending_entities: Vec<EntityRecord>,
    /// Components queued for the next commit, in queue order.
    pub pending_components: Vec<ComponentRecord>,
}

/// Encodes a snapshot as pretty-printed JSON.
///
/// # Errors
///
/// [`PersistenceError::Encode`] if a component payload cannot be encoded.
pub fn to_json(snapshot: &WorldSnapshot) -> PersistenceResult<String> {
    serde_json::to_string_pretty(snapshot).map_err(PersistenceError::Encode)
}

/// Decodes a snapshot from JSON.
///
/// # Errors
///
/// [`PersistenceError::Decode`] if the text is not a snapshot.
pub fn from_json(source: &str) -> PersistenceResult<WorldSnapshot> {
    serde_json::from_str(source).map_err(PersistenceError::Decode)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes a snapshot to `path`.
///
/// The file is written beside the target and renamed into place, so a failed
/// save never leaves a truncated snapshot behind.
///
/// # Errors
///
/// [`PersistenceError::Encode`] or [`PersistenceError::Io`]. In-memory state
/// is never touched.
pub fn save(path: impl AsRef<Path>, snapshot: &WorldSnapshot) -> PersistenceResult<()> {
    let path = path.as_ref();
    let encoded = to_json(snapshot)?;
    let staging = temp_path(path);

    let written = fs::write(&staging, encoded.as_bytes()).and_then(|()| fs::rename(&staging, path));
    if let Err(source) = written {
        tracing::warn!(path = %path.display(), error = %source, "snapshot save failed");
        // best effort; the staging file may not exist
        let _ = fs::remove_file(&staging);
        return Err(PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    tracing::info!(
        path = %path.display(),
        entities = snapshot.entities.len(),
        components = snapshot.components.len(),
        bytes = encoded.len(),
        "snapshot saved"
    );
    Ok(())
}

/// Reads a snapshot from `path`.
///
/// # Errors
///
/// [`PersistenceError::Io`] if the file cannot be read,
/// [`PersistenceError::Decode`] if it is not a snapshot.
pub fn load(path: impl AsRef<Path>) -> PersistenceResult<WorldSnapshot> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| {
        tracing::warn!(path = %path.display(), error = %source, "snapshot read failed");
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let snapshot = from_json(&source).map_err(|error| {
        tracing::warn!(path = %path.display(), %error, "snapshot decode failed");
        error
    })?;

    tracing::info!(
        path = %path.display(),
        entities = snapshot.entities.len(),
        components = snapshot.components.len(),
        "snapshot loaded"
    );
    Ok(snapshot)
}
