//! Error types for the replication server.

use modlog_core::CoreError;
use modlog_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the replication server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Protocol version mismatch.
    #[error("protocol version mismatch: {0}")]
    ProtocolMismatch(String),

    /// No endpoint at this path.
    #[error("unknown path: {0}")]
    UnknownPath(String),

    /// Wire encoding failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Reading the log failed.
    #[error("log error: {0}")]
    Core(#[from] CoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if the request was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NotAuthorized(_)
                | ServerError::ProtocolMismatch(_)
                | ServerError::UnknownPath(_)
                | ServerError::Protocol(_)
        )
    }

    /// Returns true if the server was at fault. Such requests may succeed
    /// when retried.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Core(_) | ServerError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::UnknownPath("/x".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(ServerError::Core(CoreError::codec("truncated")).is_server_error());
        assert!(!ServerError::NotAuthorized("no".into()).is_server_error());
    }

    #[test]
    fn protocol_errors_convert() {
        let err: ServerError = ProtocolError::Decode("eof".into()).into();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("eof"));
    }
}
