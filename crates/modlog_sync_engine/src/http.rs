//! HTTP transport implementation.
//!
//! Requests are CBOR bodies POSTed to `/replication/handshake` and
//! `/replication/pull`; the master answers with a CBOR [`SyncMessage`]
//! envelope carrying either the response or an error. The HTTP client
//! itself is abstracted so any library (or an in-process loopback) can
//! carry the bytes.

use self::body::RequestBody;
use crate::error::{ReplicationError, ReplicationResult};
use crate::transport::ReplicationTransport;
use modlog_sync_protocol::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, SyncMessage, HANDSHAKE_PATH,
    PULL_PATH,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based replication transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_cbor<Req: RequestBody>(
        &self,
        path: &str,
        request: &Req,
    ) -> ReplicationResult<SyncMessage> {
        if !self.is_connected() {
            return Err(ReplicationError::transport_retryable("not connected"));
        }

        let body = request.encode_body()?;
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url, body).map_err(|e| {
            warn!(url = %url, error = %e, "replication request failed");
            *self.last_error.write() = Some(e.clone());
            ReplicationError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        match SyncMessage::decode(&response)? {
            SyncMessage::Error(error) if error.retryable => {
                Err(ReplicationError::transport_retryable(error.message))
            }
            SyncMessage::Error(error) => Err(ReplicationError::transport_fatal(error.message)),
            message => Ok(message),
        }
    }
}

impl<C: HttpClient> ReplicationTransport for HttpTransport<C> {
    fn handshake(&self, request: &HandshakeRequest) -> ReplicationResult<HandshakeResponse> {
        Ok(self
            .post_cbor(HANDSHAKE_PATH, request)?
            .into_handshake_response()?)
    }

    fn pull(&self, request: &PullRequest) -> ReplicationResult<PullResponse> {
        Ok(self.post_cbor(PULL_PATH, request)?.into_pull_response()?)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> ReplicationResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

mod body {
    use crate::error::ReplicationResult;
    use modlog_sync_protocol::{HandshakeRequest, PullRequest};

    /// Request bodies the transport knows how to send.
    pub trait RequestBody {
        fn encode_body(&self) -> ReplicationResult<Vec<u8>>;
    }

    impl RequestBody for HandshakeRequest {
        fn encode_body(&self) -> ReplicationResult<Vec<u8>> {
            Ok(self.encode()?)
        }
    }

    impl RequestBody for PullRequest {
        fn encode_body(&self) -> ReplicationResult<Vec<u8>> {
            Ok(self.encode()?)
        }
    }
}

/// A loopback HTTP client that routes requests directly to a master.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

/// Servers that can answer loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/replication/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modlog_core::InstanceId;
    use modlog_sync_protocol::ErrorResponse;

    struct TestClient {
        response: RwLock<Option<Vec<u8>>>,
        healthy: AtomicBool,
        urls: RwLock<Vec<String>>,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                healthy: AtomicBool::new(true),
                urls: RwLock::new(Vec::new()),
            }
        }

        fn respond_with(&self, message: SyncMessage) {
            *self.response.write() = Some(message.encode().unwrap());
        }
    }

    impl HttpClient for &TestClient {
        fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            self.urls.write().push(url.to_string());
            self.response
                .read()
                .clone()
                .ok_or_else(|| "connection refused".to_string())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn transport_creation() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://master.example.com/", &client);
        assert_eq!(transport.base_url(), "https://master.example.com");
        assert!(transport.is_connected());

        client.healthy.store(false, Ordering::SeqCst);
        assert!(!transport.is_connected());
    }

    #[test]
    fn transport_handshake() {
        let client = TestClient::new();
        let master = InstanceId::generate();
        client.respond_with(SyncMessage::HandshakeResponse(HandshakeResponse::success(
            master, 42,
        )));

        let transport = HttpTransport::new("https://master.example.com", &client);
        let request = HandshakeRequest::new(InstanceId::generate(), "token", 0);
        let response = transport.handshake(&request).unwrap();

        assert!(response.success);
        assert_eq!(response.master_instance_id, Some(master));
        assert_eq!(response.latest_instance_seq, 42);
        assert_eq!(
            client.urls.read().as_slice(),
            ["https://master.example.com/replication/handshake".to_string()]
        );
    }

    #[test]
    fn transport_failure_is_retryable() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://master.example.com", &client);

        let request = PullRequest::new(InstanceId::generate(), 0, 10);
        let err = transport.pull(&request).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("connection refused"));
    }

    #[test]
    fn error_envelope_maps_to_transport_error() {
        let client = TestClient::new();
        client.respond_with(SyncMessage::Error(ErrorResponse::new("unknown replica", false)));
        let transport = HttpTransport::new("https://master.example.com", &client);

        let err = transport
            .pull(&PullRequest::new(InstanceId::generate(), 0, 10))
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unknown replica"));
    }

    #[test]
    fn closed_transport_refuses_requests() {
        let client = TestClient::new();
        let transport = HttpTransport::new("https://master.example.com", &client);
        transport.close().unwrap();

        let request = HandshakeRequest::new(InstanceId::generate(), "token", 0);
        assert!(transport.handshake(&request).is_err());
        assert!(client.urls.read().is_empty());
    }
}
