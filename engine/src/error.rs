//! Error types for the Worthy engine.

use crate::{CollectionName, SchemaVersion, SyncStatus};
use thiserror::Error;

/// All possible errors from the Worthy engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Identity errors
    #[error("invalid record id: {0}")]
    InvalidId(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    // Validation errors
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(CollectionName),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Queue errors
    #[error("invalid queue transition: cannot {action} an item that is {from}")]
    InvalidTransition {
        from: SyncStatus,
        action: &'static str,
    },

    // Layout errors
    #[error("invalid store layout: {0}")]
    InvalidLayout(String),

    #[error("store layout version {found} is newer than supported version {supported}")]
    LayoutTooNew {
        found: SchemaVersion,
        supported: SchemaVersion,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
