//! Database Error Types
//!
//! Error types for the storage backends: connection, schema setup, SQL
//! execution and row decoding failures. Structural rule violations are not
//! storage errors and live in the service layer.

use std::path::PathBuf;
use thiserror::Error;

/// Storage operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// A stored row could not be decoded into a model
    #[error("Corrupt row: {context}")]
    CorruptRow { context: String },

    /// Backend refused the operation (used by failure injection)
    #[error("Storage unavailable: {context}")]
    Unavailable { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    pub fn corrupt_row(context: impl Into<String>) -> Self {
        Self::CorruptRow {
            context: context.into(),
        }
    }

    pub fn unavailable(context: impl Into<String>) -> Self {
        Self::Unavailable {
            context: context.into(),
        }
    }
}
