//! Transport layer abstraction for replication.

use crate::error::{ReplicationError, ReplicationResult};
use modlog_sync_protocol::{HandshakeRequest, HandshakeResponse, PullRequest, PullResponse};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Carries replication requests to the master.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process, mock for testing).
pub trait ReplicationTransport: Send + Sync {
    /// Performs a handshake with the master.
    fn handshake(&self, request: &HandshakeRequest) -> ReplicationResult<HandshakeResponse>;

    /// Pulls a batch of log entries.
    fn pull(&self, request: &PullRequest) -> ReplicationResult<PullResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> ReplicationResult<()>;
}

/// A mock transport for testing.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    handshake_response: Mutex<Option<HandshakeResponse>>,
    pull_response: Mutex<Option<PullResponse>>,
    pull_requests: Mutex<Vec<PullRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            handshake_response: Mutex::new(None),
            pull_response: Mutex::new(None),
            pull_requests: Mutex::new(Vec::new()),
        }
    }

    /// Sets the handshake response.
    pub fn set_handshake_response(&self, response: HandshakeResponse) {
        *self.handshake_response.lock() = Some(response);
    }

    /// Sets the pull response.
    pub fn set_pull_response(&self, response: PullResponse) {
        *self.pull_response.lock() = Some(response);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Pull requests received so far.
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pull_requests.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationTransport for MockTransport {
    fn handshake(&self, _request: &HandshakeRequest) -> ReplicationResult<HandshakeResponse> {
        if !self.is_connected() {
            return Err(ReplicationError::transport_retryable("not connected"));
        }
        self.handshake_response
            .lock()
            .clone()
            .ok_or_else(|| ReplicationError::transport_fatal("no mock handshake response set"))
    }

    fn pull(&self, request: &PullRequest) -> ReplicationResult<PullResponse> {
        if !self.is_connected() {
            return Err(ReplicationError::transport_retryable("not connected"));
        }
        self.pull_requests.lock().push(*request);
        self.pull_response
            .lock()
            .clone()
            .ok_or_else(|| ReplicationError::transport_fatal("no mock pull response set"))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> ReplicationResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modlog_core::InstanceId;

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.set_connected(false);
        assert!(!transport.is_connected());

        transport.set_connected(true);
        transport.close().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let request = HandshakeRequest::new(InstanceId::generate(), "token", 0);
        let err = transport.handshake(&request).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn mock_transport_records_pulls() {
        let transport = MockTransport::new();
        transport.set_pull_response(PullResponse::empty(7));

        let replica = InstanceId::generate();
        let response = transport.pull(&PullRequest::new(replica, 7, 10)).unwrap();
        assert_eq!(response.new_cursor, 7);
        assert_eq!(transport.pull_requests(), vec![PullRequest::new(replica, 7, 10)]);
    }
}
