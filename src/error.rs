//! Error types for hydrolink.

use thiserror::Error;

/// Main error type for all gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error from the persistence sink.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Persistence failed for a reason other than the backend itself.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;
