//! Storage-layer error types.
//!
//! [`StorageError`] is what the `SQLite` client, schema initializer, and
//! repositories return. The service converts it into a
//! [`SessionError`](strata_core::SessionError) with [`WithOp::with_op`],
//! which attaches the operation name and maps the driver failure onto a
//! tagged category through [`StorageError::class`].

use rusqlite::ErrorCode;
use strata_core::{ContextError, SessionError};
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp {
        /// Raw column value.
        value: String,
        /// Parser failure.
        #[source]
        source: chrono::ParseError,
    },

    /// Schema creation or verification failed.
    #[error("schema error: {message}")]
    Schema {
        /// Which table, column, or statement failed and why.
        message: String,
    },

    /// Connection target could not be resolved.
    #[error("connection error: {0}")]
    Connection(String),

    /// The client was closed.
    #[error("storage client is closed")]
    Closed,

    /// The caller's context finished before the statement ran.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Coarse classification used to pick the surfaced error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageErrorClass {
    /// Connection lost, busy, or locked. Retrying may succeed.
    Connection,
    /// Unique or check constraint violated.
    Constraint,
    /// A single-row query returned nothing.
    NotFound,
    /// Anything else.
    Other,
}

impl StorageError {
    /// Classify the failure.
    pub fn class(&self) -> StorageErrorClass {
        match self {
            Self::Sqlite(e) => classify_sqlite(e),
            Self::Pool(_) | Self::Connection(_) | Self::Closed => StorageErrorClass::Connection,
            _ => StorageErrorClass::Other,
        }
    }

    /// Whether retrying may succeed.
    pub fn is_transient(&self) -> bool {
        self.class() == StorageErrorClass::Connection
    }

    /// Convert into the service error, naming the operation that failed.
    pub fn into_session_error(self, op: &str) -> SessionError {
        match self {
            Self::Context(e) => e.into(),
            Self::Closed => SessionError::Closed,
            Self::Schema { message } => SessionError::Schema(message),
            Self::Serde(e) => SessionError::Serialization(e),
            other => match other.class() {
                StorageErrorClass::Constraint => SessionError::Conflict(format!("{op}: {other}")),
                StorageErrorClass::NotFound => SessionError::NotFound(op.to_string()),
                StorageErrorClass::Connection => SessionError::storage(op, true, other),
                StorageErrorClass::Other => SessionError::storage(op, false, other),
            },
        }
    }
}

fn classify_sqlite(err: &rusqlite::Error) -> StorageErrorClass {
    match err {
        rusqlite::Error::QueryReturnedNoRows => StorageErrorClass::NotFound,
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::ConstraintViolation => StorageErrorClass::Constraint,
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::OutOfMemory => StorageErrorClass::Connection,
            _ => StorageErrorClass::Other,
        },
        _ => StorageErrorClass::Other,
    }
}

/// Attach an operation name to a storage result.
pub trait WithOp<T> {
    /// Map the error into a [`SessionError`] wrapped with `op`.
    fn with_op(self, op: &str) -> strata_core::Result<T>;
}

impl<T> WithOp<T> for Result<T> {
    fn with_op(self, op: &str) -> strata_core::Result<T> {
        self.map_err(|e| e.into_session_error(op))
    }
}

/// Convenience type alias for storage results.
pub type Result<T> = std::result::Result<T, StorageError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
