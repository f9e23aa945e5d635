//! Error types for record validation.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning raw documents into typed records.
#[derive(Error, Debug)]
pub enum Error {
    /// A document did not match the schema of its collection.
    #[error("invalid record in '{collection}': {reason}")]
    InvalidRecord {
        /// Collection the document was read from.
        collection: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// A field has a value that cannot be interpreted.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
