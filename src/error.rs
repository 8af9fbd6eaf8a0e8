//! Error types for transactional execution.
//!
//! Driver failures are carried as the original `sqlx::Error` value; variants only
//! add the context of where in the transaction lifecycle the failure happened.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("Row mapping failed: {0}")]
    Mapping(#[source] sqlx::Error),

    #[error("Expected exactly one row, query returned {0}")]
    RowCount(usize),

    #[error("Statement exceeded the command timeout of {0:?}")]
    Timeout(Duration),

    #[error("No value supplied for parameter @{0}")]
    MissingParameter(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Transaction scope is already closed")]
    ScopeClosed,
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised before any I/O: missing factory, bad URL, bad timeout.
    Configuration,
    /// The connection could not be opened; no transaction was started.
    Connection,
    /// A statement (or transaction control) failed or timed out.
    Statement,
    /// Rows did not match the requested type or count.
    Mapping,
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Mapping(_) | Self::RowCount(_) => ErrorKind::Mapping,
            Self::Database(_)
            | Self::Timeout(_)
            | Self::MissingParameter(_)
            | Self::InvalidParameters(_)
            | Self::ScopeClosed => ErrorKind::Statement,
        }
    }

    /// The driver error behind this error, if any.
    pub fn as_database_error(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Connection(e) | Self::Database(e) | Self::Mapping(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for transactional operations.
pub type Result<T> = std::result::Result<T, Error>;
