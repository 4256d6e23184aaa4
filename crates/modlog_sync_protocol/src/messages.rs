//! Protocol messages for replication.
//!
//! A replica opens with a [`HandshakeRequest`] carrying its instance id,
//! auth token and last committed cursor, then pulls bounded batches of log
//! entries with [`PullRequest`] until [`PullResponse::has_more`] is false.

use crate::codec::{decode, encode};
use crate::error::{ProtocolError, ProtocolResult};
use modlog_core::{InstanceId, LogEntry};
use serde::{Deserialize, Serialize};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// Batch size used when a pull request asks for zero entries.
pub const DEFAULT_PULL_LIMIT: u32 = 100;

/// Endpoint taking a [`HandshakeRequest`].
pub const HANDSHAKE_PATH: &str = "/replication/handshake";

/// Endpoint taking a [`PullRequest`].
pub const PULL_PATH: &str = "/replication/pull";

/// Endpoint taking any request wrapped in a [`SyncMessage`].
pub const MESSAGE_PATH: &str = "/replication/message";

/// A replication message, as carried on the single-endpoint transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Handshake request.
    HandshakeRequest(HandshakeRequest),
    /// Handshake response.
    HandshakeResponse(HandshakeResponse),
    /// Pull request.
    PullRequest(PullRequest),
    /// Pull response.
    PullResponse(PullResponse),
    /// Error reply to any request.
    Error(ErrorResponse),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::HandshakeRequest(_) => 1,
            SyncMessage::HandshakeResponse(_) => 2,
            SyncMessage::PullRequest(_) => 3,
            SyncMessage::PullResponse(_) => 4,
            SyncMessage::Error(_) => 15,
        }
    }

    /// Short name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::HandshakeRequest(_) => "handshake_request",
            SyncMessage::HandshakeResponse(_) => "handshake_response",
            SyncMessage::PullRequest(_) => "pull_request",
            SyncMessage::PullResponse(_) => "pull_response",
            SyncMessage::Error(_) => "error",
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }

    /// Unwraps a handshake response.
    pub fn into_handshake_response(self) -> ProtocolResult<HandshakeResponse> {
        match self {
            SyncMessage::HandshakeResponse(response) => Ok(response),
            other => Err(other.unexpected("handshake_response")),
        }
    }

    /// Unwraps a pull response.
    pub fn into_pull_response(self) -> ProtocolResult<PullResponse> {
        match self {
            SyncMessage::PullResponse(response) => Ok(response),
            other => Err(other.unexpected("pull_response")),
        }
    }

    fn unexpected(&self, expected: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedMessage {
            expected,
            actual: self.kind(),
        }
    }
}

/// Handshake request from a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Instance id of the replica.
    pub instance_id: InstanceId,
    /// Protocol version.
    pub protocol_version: u16,
    /// Token proving the replica may pull.
    pub auth_token: String,
    /// Replica's last committed cursor.
    pub last_cursor: u64,
}

impl HandshakeRequest {
    /// Creates a new handshake request.
    pub fn new(instance_id: InstanceId, auth_token: impl Into<String>, last_cursor: u64) -> Self {
        Self {
            instance_id,
            protocol_version: PROTOCOL_VERSION,
            auth_token: auth_token.into(),
            last_cursor,
        }
    }

    /// Fails unless the request speaks [`PROTOCOL_VERSION`].
    pub fn check_version(&self) -> ProtocolResult<()> {
        if self.protocol_version == PROTOCOL_VERSION {
            Ok(())
        } else {
            Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: self.protocol_version,
            })
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Handshake response from the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Whether the handshake succeeded.
    pub success: bool,
    /// Error message if it failed.
    pub error: Option<String>,
    /// Master's protocol version.
    pub protocol_version: u16,
    /// Instance id whose stream the master serves.
    pub master_instance_id: Option<InstanceId>,
    /// Highest `instance_seq` in that stream.
    pub latest_instance_seq: u64,
}

impl HandshakeResponse {
    /// Creates a successful handshake response.
    pub fn success(master_instance_id: InstanceId, latest_instance_seq: u64) -> Self {
        Self {
            success: true,
            error: None,
            protocol_version: PROTOCOL_VERSION,
            master_instance_id: Some(master_instance_id),
            latest_instance_seq,
        }
    }

    /// Creates a failed handshake response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            protocol_version: PROTOCOL_VERSION,
            master_instance_id: None,
            latest_instance_seq: 0,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Pull request from a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Instance id of the pulling replica.
    pub instance_id: InstanceId,
    /// Last `instance_seq` the replica committed.
    pub cursor: u64,
    /// Maximum number of entries to return.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a new pull request.
    pub fn new(instance_id: InstanceId, cursor: u64, limit: u32) -> Self {
        Self {
            instance_id,
            cursor,
            limit,
        }
    }

    /// The requested limit, with zero meaning [`DEFAULT_PULL_LIMIT`].
    pub fn effective_limit(&self) -> u32 {
        if self.limit == 0 {
            DEFAULT_PULL_LIMIT
        } else {
            self.limit
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Pull response from the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Entries after the cursor, ascending by `instance_seq`.
    pub entries: Vec<LogEntry>,
    /// `instance_seq` of the last entry, or the request cursor if empty.
    pub new_cursor: u64,
    /// Whether more entries follow.
    pub has_more: bool,
}

impl PullResponse {
    /// Creates a new pull response.
    pub fn new(entries: Vec<LogEntry>, new_cursor: u64, has_more: bool) -> Self {
        Self {
            entries,
            new_cursor,
            has_more,
        }
    }

    /// A response with no entries.
    pub fn empty(cursor: u64) -> Self {
        Self::new(Vec::new(), cursor, false)
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable message.
    pub message: String,
    /// Whether the replica may retry the same request later.
    pub retryable: bool,
}

impl ErrorResponse {
    /// Creates an error reply.
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }
}
