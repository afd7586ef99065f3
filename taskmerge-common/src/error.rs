//! Common error types for TaskMerge

use thiserror::Error;

/// Common result type for TaskMerge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across TaskMerge crates
///
/// `InvalidInput`, `NotFound` and `Conflict` are terminal for the request
/// that raised them. Everything else is a dependency failure that batch
/// callers may count and skip.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found (or not owned by the caller)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// State precondition violated, e.g. task already merged
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable error code
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "VALIDATION",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::Config(_) => "CONFIG",
            Error::Database(_) | Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
                "DEPENDENCY"
            }
        }
    }

    /// True for storage/IO failures that a sweep may count and continue past
    pub fn is_dependency_failure(&self) -> bool {
        self.kind() == "DEPENDENCY"
    }

    /// True when SQLite reported lock contention (SQLITE_BUSY / SQLITE_LOCKED)
    pub fn is_database_locked(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("5") | Some("6"))
                    || db_err.message().contains("database is locked")
            }
            Error::Database(other) => other.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
