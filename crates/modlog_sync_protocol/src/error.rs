//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or checking messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes did not decode to the expected message.
    #[error("decode error: {0}")]
    Decode(String),

    /// Peers speak different protocol versions.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version spoken locally.
        expected: u16,
        /// Version announced by the peer.
        actual: u16,
    },

    /// A message of the wrong kind arrived.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Kind that was expected.
        expected: &'static str,
        /// Kind that arrived.
        actual: &'static str,
    },
}
