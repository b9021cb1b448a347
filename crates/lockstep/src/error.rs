//! # Error Types
//!
//! Everything the orchestration layer can report to its caller. Lookup
//! misses inside the store are logged instead, and a misbehaving routine is
//! never detected at runtime: overlapping writes are rejected when the
//! routine is registered.

use std::path::PathBuf;

use lockstep_core::{ComponentKind, EntityId, StoreError};
use thiserror::Error;

/// Errors raised by [`Core`](crate::Core) and [`Scheduler`](crate::Scheduler).
#[derive(Error, Debug)]
pub enum CoreError {
    /// Two routines allowed to run in parallel both write the same kind.
    #[error("routines {first} and {second} both write {component}")]
    WriteConflict {
        /// The routine registered first.
        first: String,
        /// The routine being registered.
        second: String,
        /// The contested component kind.
        component: ComponentKind,
    },

    /// A snapshot's id allocator would hand out an id already in use.
    #[error("snapshot allocator starts at {next} but entity {max_id} already exists")]
    StaleAllocator {
        /// The snapshot's next id.
        next: u64,
        /// The largest id found in the snapshot.
        max_id: EntityId,
    },

    /// A snapshot lists the same entity id more than once.
    #[error("snapshot contains entity {0} more than once")]
    DuplicateEntity(EntityId),

    /// A snapshot holds a component whose owner it does not contain.
    #[error("snapshot component {kind} is owned by missing entity {entity}")]
    OrphanComponent {
        /// The record's discriminator.
        kind: String,
        /// The owner named by the record.
        entity: EntityId,
    },

    /// Component state could not be encoded or rebuilt.
    #[error(transparent)]
    Snapshot(#[from] StoreError),

    /// The forwarding thread of an event source could not be started.
    #[error("failed to start event source: {0}")]
    EventSource(#[source] std::io::Error),
}

/// Result type for core and scheduler operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while loading or validating [`EngineConfig`](crate::EngineConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// The file that was read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parse but cannot drive a scheduler.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while saving or loading snapshots.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Reading or writing the snapshot file failed.
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        /// The snapshot file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot bytes are not a valid snapshot.
    #[error("failed to decode snapshot: {0}")]
    Decode(#[source] serde_json::Error),

    /// The snapshot could not be encoded.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;
