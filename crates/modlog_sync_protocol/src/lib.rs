//! # modlog Sync Protocol
//!
//! Replication wire messages and CBOR codec for modlog.
//!
//! This crate provides:
//! - Protocol messages (Handshake, Pull) exchanged between a replica and
//!   its master
//! - The [`SyncMessage`] envelope used on the single-endpoint transport
//! - CBOR encoding/decoding
//!
//! Log entries travel as [`modlog_core::LogEntry`] values; their payloads
//! stay opaque CBOR-encoded diffs.
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;

pub use codec::{decode, encode};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ErrorResponse, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, SyncMessage,
    DEFAULT_PULL_LIMIT, HANDSHAKE_PATH, MESSAGE_PATH, PROTOCOL_VERSION, PULL_PATH,
};
