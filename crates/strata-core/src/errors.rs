//! Error types for the session store.
//!
//! [`SessionError`] is the single error type surfaced by the service. Every
//! variant maps onto a tagged [`ErrorKind`] so callers can branch on the
//! category (retry a transient storage failure, surface a validation error)
//! without matching on message text.

use thiserror::Error;

use crate::context::ContextError;
use crate::key::KeyError;

/// Boxed error source carried by storage failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Tagged error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing app, user, or session identifier.
    KeyInvalid,
    /// Caller supplied an argument the operation rejects.
    InvalidArgument,
    /// An active, non-expired row already exists for the key.
    AlreadyExists,
    /// No matching active row.
    NotFound,
    /// Soft-deleted shadow row or constraint violation.
    Conflict,
    /// Connection lost, busy, or locked; the caller may retry.
    StorageTransient,
    /// Schema mismatch or other non-retryable storage failure.
    StoragePermanent,
    /// Payload marshal/unmarshal failure.
    Serialization,
    /// Failure propagated from the summarizer.
    Summarizer,
    /// The operation's context was cancelled or its deadline passed.
    ContextCancelled,
    /// The service has been closed.
    Closed,
}

/// Errors returned by session store operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Key validation failed.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Invalid argument (e.g. scoped key in a session-state write).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Active session already exists.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// Requested row was not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Constraint violation that survived cleanup.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage failure wrapped with the operation that issued it.
    #[error("{op} failed: {source}")]
    Storage {
        /// Operation name, e.g. `"sqlite session service append event"`.
        op: String,
        /// Whether retrying may succeed.
        transient: bool,
        /// Underlying driver or pool error.
        #[source]
        source: BoxError,
    },

    /// Schema verification failed.
    #[error("schema error: {0}")]
    Schema(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Summarizer returned an error.
    #[error("summarizer error: {0}")]
    Summarizer(String),

    /// Context cancelled or deadline exceeded.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Operation attempted after `close()`.
    #[error("session service is closed")]
    Closed,
}

impl SessionError {
    /// Build a storage error wrapped with an operation name.
    pub fn storage(op: impl Into<String>, transient: bool, source: impl Into<BoxError>) -> Self {
        Self::Storage {
            op: op.into(),
            transient,
            source: source.into(),
        }
    }

    /// Tagged category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Key(_) => ErrorKind::KeyInvalid,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Storage { transient: true, .. } => ErrorKind::StorageTransient,
            Self::Storage { transient: false, .. } | Self::Schema(_) => ErrorKind::StoragePermanent,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Summarizer(_) => ErrorKind::Summarizer,
            Self::Context(_) => ErrorKind::ContextCancelled,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// Whether the caller may retry the operation.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::StorageTransient
    }
}

/// Convenience type alias for session store results.
pub type Result<T> = std::result::Result<T, SessionError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_error_kind() {
        let err: SessionError = KeyError::MissingAppName.into();
        assert_eq!(err.kind(), ErrorKind::KeyInvalid);
        assert_eq!(err.to_string(), "app name is required");
    }

    #[test]
    fn storage_error_display_includes_op() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = SessionError::storage("sqlite session service append event", true, io);
        assert_eq!(
            err.to_string(),
            "sqlite session service append event failed: pipe closed"
        );
        assert!(err.is_transient());
    }

    #[test]
    fn permanent_storage_kind() {
        let io = std::io::Error::other("disk image is malformed");
        let err = SessionError::storage("list sessions", false, io);
        assert_eq!(err.kind(), ErrorKind::StoragePermanent);
        assert!(!err.is_transient());
        assert_eq!(
            SessionError::Schema("column missing".into()).kind(),
            ErrorKind::StoragePermanent
        );
    }

    #[test]
    fn context_error_kind() {
        let err: SessionError = ContextError::Cancelled.into();
        assert_eq!(err.kind(), ErrorKind::ContextCancelled);
        assert_eq!(err.to_string(), "context canceled");
    }

    #[test]
    fn serde_error_kind() {
        let serde_err = serde_json::from_str::<String>("bad").unwrap_err();
        let err: SessionError = serde_err.into();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn not_found_display() {
        let err = SessionError::NotFound("session".into());
        assert_eq!(err.to_string(), "session not found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn closed_display() {
        assert_eq!(SessionError::Closed.to_string(), "session service is closed");
        assert_eq!(SessionError::Closed.kind(), ErrorKind::Closed);
    }
}
