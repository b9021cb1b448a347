//! # Store Error Types
//!
//! Errors raised while encoding components or rebuilding a store from
//! snapshot records. Lookup misses are not errors: single-result queries
//! log and return `None`.

use thiserror::Error;

use crate::ecs::EntityId;

/// Errors that can occur while encoding or reconstructing component state.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record names a component kind missing from the registry.
    #[error("unknown component kind: {0}")]
    UnknownComponentKind(String),

    /// Two different types were registered under the same discriminator.
    #[error("component kind {kind} registered twice with different types")]
    ConflictingComponentKind {
        /// The contested discriminator.
        kind: &'static str,
    },

    /// A decoded component names a different owner than its record.
    #[error("component {kind} recorded for entity {record} decodes as owned by {decoded}")]
    EntityMismatch {
        /// The record's discriminator.
        kind: String,
        /// Owner stored in the record.
        record: EntityId,
        /// Owner found in the payload.
        decoded: EntityId,
    },

    /// A record's payload did not match its component type.
    #[error("failed to decode component {kind}: {source}")]
    Decode {
        /// The record's discriminator.
        kind: String,
        /// The underlying decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// A component could not be serialized.
    #[error("failed to encode component {kind}: {source}")]
    Encode {
        /// The component's discriminator.
        kind: &'static str,
        /// The underlying encoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
