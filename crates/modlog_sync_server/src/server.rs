//! The replication server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use modlog_core::ModificationLogStore;
use modlog_sync_protocol::{
    ErrorResponse, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, SyncMessage,
    HANDSHAKE_PATH, MESSAGE_PATH, PULL_PATH,
};
use std::sync::Arc;
use tracing::warn;

/// Serves the master's log to pulling replicas.
///
/// The server is transport-agnostic: an HTTP layer (or an in-process
/// loopback) hands request bodies to [`handle_post`](Self::handle_post) and
/// writes back the bytes it returns.
///
/// # Example
///
/// ```rust,ignore
/// use modlog_sync_server::{ReplicationServer, ServerConfig};
///
/// let server = ReplicationServer::new(ServerConfig::default(), master_log);
///
/// // Route POST /replication/* bodies here
/// let reply = server.handle_post("/replication/pull", &body)?;
/// ```
pub struct ReplicationServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl ReplicationServer {
    /// Creates a server over `log`.
    pub fn new(config: ServerConfig, log: Arc<ModificationLogStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, log));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// The handler context (config, log, sessions).
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Handles a handshake request.
    pub fn handle_handshake(&self, request: HandshakeRequest) -> ServerResult<HandshakeResponse> {
        self.handler.handle_handshake(request)
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        self.handler.handle_pull(request)
    }

    /// Dispatches a message. Failures are answered with an error message.
    pub fn handle_message(&self, message: SyncMessage) -> SyncMessage {
        let result = match message {
            SyncMessage::HandshakeRequest(req) => self
                .handle_handshake(req)
                .map(SyncMessage::HandshakeResponse),
            SyncMessage::PullRequest(req) => self.handle_pull(req).map(SyncMessage::PullResponse),
            other => Err(ServerError::InvalidRequest(format!(
                "unexpected {} message",
                other.kind()
            ))),
        };

        result.unwrap_or_else(|e| {
            warn!(error = %e, "replication request failed");
            SyncMessage::Error(ErrorResponse::new(e.to_string(), e.is_server_error()))
        })
    }

    /// Handles a CBOR request body POSTed to `path`.
    ///
    /// `/replication/handshake` and `/replication/pull` take the bare
    /// request; `/replication/message` takes a tagged [`SyncMessage`]. The
    /// reply is always a tagged [`SyncMessage`].
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        let message = match path {
            HANDSHAKE_PATH => SyncMessage::HandshakeRequest(HandshakeRequest::decode(body)?),
            PULL_PATH => SyncMessage::PullRequest(PullRequest::decode(body)?),
            MESSAGE_PATH => SyncMessage::decode(body)?,
            other => return Err(ServerError::UnknownPath(other.to_string())),
        };
        Ok(self.handle_message(message).encode()?)
    }

    /// Number of replicas that completed a handshake.
    pub fn replica_count(&self) -> usize {
        self.context.session_count()
    }
}
