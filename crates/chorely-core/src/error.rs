//! Error types for chorely-core

use thiserror::Error;

/// Result type alias using chorely-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in chorely-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row could not be mapped between local and remote shapes
    #[error("Row mapping error for {table}: {reason}")]
    Mapping {
        table: &'static str,
        reason: String,
    },

    /// Rejected by the injected record policy
    #[error("Not allowed: {0}")]
    PolicyDenied(String),
}
