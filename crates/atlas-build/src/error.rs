//! Error types for the build pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scanning raw records or writing artifacts.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Storage backend unavailable or misbehaving.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (stored documents or artifact serialization).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A raw record failed schema validation.
    #[error("Record error: {0}")]
    Record(#[from] atlas_core::Error),

    /// Input required to be sorted was not.
    #[error("Unsorted input in '{collection}': {detail}")]
    UnsortedInput {
        /// Collection being scanned.
        collection: &'static str,
        /// Where the ordering broke.
        detail: String,
    },

    /// An artifact another build depends on is missing or empty.
    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    /// Malformed scan query (bad field or collection name).
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error concerns a single input record and the run may
    /// continue by skipping it. Everything else aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Record(_))
    }
}
