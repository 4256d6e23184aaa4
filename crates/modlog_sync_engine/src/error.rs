//! Error types for the replication engine.

use modlog_core::CoreError;
use modlog_sync_protocol::ProtocolError;
use std::fmt;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Which part of a replication run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The master rejected the replica's credentials.
    Auth,
    /// The master could not be reached or answered garbage.
    Transport,
    /// A pulled entry could not be applied locally.
    Apply,
    /// The replication lock could not be checked.
    Lock,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendErrorKind::Auth => "auth",
            BackendErrorKind::Transport => "transport",
            BackendErrorKind::Apply => "apply",
            BackendErrorKind::Lock => "lock",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// The run was aborted; the cursor did not move past the failure.
    #[error("replication {kind} error: {message}")]
    Backend {
        /// What failed.
        kind: BackendErrorKind,
        /// Error message.
        message: String,
        /// Whether retrying the run may succeed.
        retryable: bool,
    },

    /// Malformed or unexpected protocol message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local core failure outside entry application.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The run was cancelled.
    #[error("replication cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl ReplicationError {
    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Backend {
            kind: BackendErrorKind::Auth,
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Backend {
            kind: BackendErrorKind::Transport,
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Backend {
            kind: BackendErrorKind::Transport,
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an apply error for the entry labelled `entry`.
    pub fn apply(entry: &str, cause: impl fmt::Display) -> Self {
        Self::Backend {
            kind: BackendErrorKind::Apply,
            message: format!("{entry}: {cause}"),
            retryable: false,
        }
    }

    /// Creates a lock error.
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Backend {
            kind: BackendErrorKind::Lock,
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns the backend error kind, if this is a backend error.
    pub fn backend_kind(&self) -> Option<BackendErrorKind> {
        match self {
            ReplicationError::Backend { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplicationError::Backend { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
