//! Service Layer Error Types
//!
//! Every structural operation surfaces exactly one of these to its caller.
//! There is no automatic retry inside the engine.

use crate::db::DatabaseError;
use thiserror::Error;

/// Coarse classification of a [`TreeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Cycle,
    NotFound,
    Storage,
    Serialization,
    Configuration,
}

/// Tree operation errors
#[derive(Error, Debug)]
pub enum TreeError {
    /// Bad name or level, duplicate sibling, or forbidden level transition
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Delete blocked by existing children or items
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The edit would make a node its own ancestor
    #[error("Circular reference: {0}")]
    Cycle(String),

    /// Referenced id does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Storage operation failed
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl TreeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn cycle(msg: impl Into<String>) -> Self {
        Self::Cycle(msg.into())
    }

    /// Create a node not found error
    pub fn node_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "Node",
            id: id.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::Validation(_) => ErrorKind::Validation,
            TreeError::Conflict(_) => ErrorKind::Conflict,
            TreeError::Cycle(_) => ErrorKind::Cycle,
            TreeError::NotFound { .. } => ErrorKind::NotFound,
            TreeError::Database(_) => ErrorKind::Storage,
            TreeError::Serialization(_) => ErrorKind::Serialization,
            TreeError::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

impl From<serde_json::Error> for TreeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TreeError>;
