//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not open or reach the database.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A query was rejected or failed mid-flight.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Schema creation failed.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Invalid caller input (bad path, unsupported URL scheme).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
