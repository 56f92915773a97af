/*!
Error types for the sitestate core.
*/

use thiserror::Error;

/// Result type used throughout the sitestate core.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while loading, saving or configuring build state.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O errors during cache file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Snapshot content does not match its recorded hash
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// Snapshot bytes are not a snapshot this version can read
    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    /// Cache storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new invalid format error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

/// Error returned by a notification listener.
///
/// The bus logs these and keeps delivering to the remaining listeners.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("listener failed on '{event}': {message}")]
pub struct ListenerError {
    pub event: String,
    pub message: String,
}

impl ListenerError {
    pub fn new<E: Into<String>, M: Into<String>>(event: E, message: M) -> Self {
        Self {
            event: event.into(),
            message: message.into(),
        }
    }
}
