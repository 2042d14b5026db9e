//! Common error types for Relato.

use thiserror::Error;

/// Top-level error type for Relato operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Persistence read/write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network transport failed before a response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// Server responded with a non-success status.
    #[error("HTTP error: status {0}")]
    Http(u16),

    /// Network call exceeded its deadline.
    #[error("Request timed out")]
    Timeout,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error came from a send attempt that is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Http(_) | Error::Timeout)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
