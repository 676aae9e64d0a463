//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a project store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No project is registered under the requested public id.
    #[error("project not found: {0}")]
    NotFound(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Record (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored bytes that do not decode to a valid value.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Errors raised when parsing a hex-encoded 32-byte key or identifier.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseKeyError {
    /// Wrong number of characters.
    #[error("expected {expected} hex characters, got {actual}")]
    Length {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// Hex digits must be lowercase.
    #[error("hex must be lowercase")]
    Uppercase,

    /// Non-hex character.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}
