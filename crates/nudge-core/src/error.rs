//! Core error types for nudge-core.
//!
//! This module defines the error hierarchy using thiserror. Inference and
//! feedback operations surface these; "no matching rules" is never an error.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for nudge-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The submitted context snapshot failed validation
    #[error("Invalid context: {0}")]
    InvalidContext(#[from] ValidationError),

    /// Feedback targeted a rule that does not exist or was deactivated
    #[error("Rule {0} not found or inactive")]
    RuleNotFound(i64),

    /// Persistence failed after the internal retry; in-memory state was
    /// rolled back to its pre-call value
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration load/save errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked by a concurrent writer
    #[error("Database is locked")]
    Locked,
}

/// Context snapshot validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Speed must be a non-negative real
    #[error("speed_kmh must be non-negative, got {0}")]
    NegativeSpeed(f64),

    /// Speed must be finite
    #[error("speed_kmh must be finite, got {0}")]
    NonFiniteSpeed(f64),

    /// Invalid field value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked
                    || err.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
