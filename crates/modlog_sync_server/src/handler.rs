//! Request handlers for the replication endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use modlog_core::{now_millis, InstanceId, ModificationLogStore, Timestamp};
use modlog_sync_protocol::{HandshakeRequest, HandshakeResponse, PullRequest, PullResponse};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The master's log (shared across all handlers).
    pub log: Arc<ModificationLogStore>,
    validator: Option<TokenValidator>,
    /// Replica sessions (instance id -> session info).
    sessions: RwLock<HashMap<InstanceId, ReplicaSession>>,
}

/// What the server remembers about a replica.
#[derive(Debug, Clone)]
struct ReplicaSession {
    /// Cursor the replica last pulled from.
    last_cursor: u64,
    /// When the replica last talked to us.
    last_seen: Timestamp,
    /// After this time the replica must handshake again.
    expires_at: Timestamp,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, log: Arc<ModificationLogStore>) -> Self {
        let validator = config.auth_secret.as_ref().map(|secret| {
            TokenValidator::new(AuthConfig::new(secret.clone()).with_expiry(config.token_expiry))
        });
        Self {
            config,
            log,
            validator,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The token validator, if a secret is configured.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    /// Number of replicas that completed a handshake.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Cursor a replica last pulled from.
    pub fn replica_cursor(&self, instance: &InstanceId) -> Option<u64> {
        self.sessions.read().get(instance).map(|s| s.last_cursor)
    }

    /// When a replica last talked to us.
    pub fn replica_last_seen(&self, instance: &InstanceId) -> Option<Timestamp> {
        self.sessions.read().get(instance).map(|s| s.last_seen)
    }

    fn authenticate(&self, request: &HandshakeRequest) -> ServerResult<()> {
        if !self.config.require_auth {
            return Ok(());
        }
        let validator = self
            .validator
            .as_ref()
            .ok_or_else(|| ServerError::Internal("authentication required but no secret set".into()))?;
        validator.validate_token(&request.auth_token, &request.instance_id)
    }

    fn register_session(&self, instance: InstanceId, cursor: u64) {
        let now = now_millis();
        let lifetime = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        let session = ReplicaSession {
            last_cursor: cursor,
            last_seen: now,
            expires_at: now.saturating_add(lifetime),
        };
        self.sessions.write().insert(instance, session);
    }

    /// Records a pull on a live session. Expired sessions are dropped.
    fn touch_session(&self, instance: &InstanceId, cursor: u64) -> bool {
        let now = now_millis();
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(instance) else {
            return false;
        };
        if now > session.expires_at {
            sessions.remove(instance);
            debug!(replica = %instance, "replica session expired");
            return false;
        }
        session.last_cursor = cursor;
        session.last_seen = now;
        true
    }
}

/// Handler for replication requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a handshake request.
    ///
    /// Version and credential failures are answered with an unsuccessful
    /// response rather than an error.
    pub fn handle_handshake(&self, request: HandshakeRequest) -> ServerResult<HandshakeResponse> {
        if let Err(e) = request.check_version() {
            warn!(replica = %request.instance_id, error = %e, "handshake rejected");
            return Ok(HandshakeResponse::error(e.to_string()));
        }
        if let Err(e) = self.context.authenticate(&request) {
            warn!(replica = %request.instance_id, error = %e, "handshake rejected");
            return Ok(HandshakeResponse::error(e.to_string()));
        }

        self.context
            .register_session(request.instance_id, request.last_cursor);
        let latest = self.context.log.latest_instance_seq()?;
        info!(
            replica = %request.instance_id,
            cursor = request.last_cursor,
            latest,
            "replica connected"
        );
        Ok(HandshakeResponse::success(self.context.log.instance_id(), latest))
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        let known = self
            .context
            .touch_session(&request.instance_id, request.cursor);
        if self.context.config.require_auth && !known {
            return Err(ServerError::NotAuthorized(format!(
                "replica {} has no live session; handshake first",
                request.instance_id
            )));
        }

        let limit = request
            .effective_limit()
            .min(self.context.config.max_pull_batch) as usize;
        let entries = self
            .context
            .log
            .pending_replication_batch(request.cursor, limit)?;
        let pending = self.context.log.pending_count_after(request.cursor)?;
        let has_more = pending > entries.len();
        let new_cursor = entries
            .last()
            .map(|e| e.instance_seq)
            .unwrap_or(request.cursor);

        debug!(
            replica = %request.instance_id,
            cursor = request.cursor,
            entries = entries.len(),
            has_more,
            "serving pull"
        );
        Ok(PullResponse::new(entries, new_cursor, has_more))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modlog_testkit::prelude::*;
    use std::time::Duration;

    fn create_handler(master: &TestNode, config: ServerConfig) -> (RequestHandler, Arc<HandlerContext>) {
        let context = Arc::new(HandlerContext::new(config, master.log.clone()));
        (RequestHandler::new(context.clone()), context)
    }

    #[test]
    fn handshake_success() {
        let master = TestNode::new();
        master.create_contact("Ada");
        let (handler, context) = create_handler(&master, ServerConfig::default());

        let replica = InstanceId::generate();
        let response = handler
            .handle_handshake(HandshakeRequest::new(replica, "", 0))
            .unwrap();
        assert!(response.success);
        assert_eq!(response.master_instance_id, Some(master.instance_id()));
        assert_eq!(response.latest_instance_seq, 1);
        assert_eq!(context.session_count(), 1);
    }

    #[test]
    fn handshake_bad_version() {
        let master = TestNode::new();
        let (handler, context) = create_handler(&master, ServerConfig::default());

        let mut request = HandshakeRequest::new(InstanceId::generate(), "", 0);
        request.protocol_version = 99;
        let response = handler.handle_handshake(request).unwrap();
        assert!(!response.success);
        assert!(response.error.is_some());
        assert_eq!(context.session_count(), 0);
    }

    #[test]
    fn handshake_requires_valid_token() {
        let master = TestNode::new();
        let config = ServerConfig::new().with_auth(b"master-secret".to_vec());
        let (handler, context) = create_handler(&master, config);
        let replica = InstanceId::generate();

        let response = handler
            .handle_handshake(HandshakeRequest::new(replica, "forged", 0))
            .unwrap();
        assert!(!response.success);

        let token = context.validator().unwrap().create_token(&replica).unwrap();
        let response = handler
            .handle_handshake(HandshakeRequest::new(replica, token, 0))
            .unwrap();
        assert!(response.success);
    }

    #[test]
    fn pull_without_handshake_is_refused_when_auth_required() {
        let master = TestNode::new();
        let config = ServerConfig::new().with_auth(b"master-secret".to_vec());
        let (handler, _) = create_handler(&master, config);

        let err = handler
            .handle_pull(PullRequest::new(InstanceId::generate(), 0, 10))
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn pull_after_session_expiry_is_refused() {
        let master = TestNode::new();
        master.create_contact("Ada");
        let config = ServerConfig::new()
            .with_auth(b"master-secret".to_vec())
            .with_token_expiry(Duration::from_millis(200));
        let (handler, context) = create_handler(&master, config);
        let replica = InstanceId::generate();

        let token = context.validator().unwrap().create_token(&replica).unwrap();
        let response = handler
            .handle_handshake(HandshakeRequest::new(replica, token, 0))
            .unwrap();
        assert!(response.success);
        assert_eq!(
            handler.handle_pull(PullRequest::new(replica, 0, 10)).unwrap().entries.len(),
            1
        );

        std::thread::sleep(Duration::from_millis(300));
        let err = handler
            .handle_pull(PullRequest::new(replica, 0, 10))
            .unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(context.session_count(), 0);
    }

    #[test]
    fn pull_empty() {
        let master = TestNode::new();
        let (handler, _) = create_handler(&master, ServerConfig::default());

        let response = handler
            .handle_pull(PullRequest::new(InstanceId::generate(), 0, 10))
            .unwrap();
        assert!(response.entries.is_empty());
        assert_eq!(response.new_cursor, 0);
        assert!(!response.has_more);
    }

    #[test]
    fn pull_skips_local_only_models() {
        let master = TestNode::new();
        master.create_contact("Ada");
        master
            .service
            .create(
                modlog_core::Entity::new("Note").with_field("body", "private"),
                &test_context(),
            )
            .unwrap();
        let (handler, _) = create_handler(&master, ServerConfig::default());

        let response = handler
            .handle_pull(PullRequest::new(InstanceId::generate(), 0, 10))
            .unwrap();
        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.entries[0].record_type.as_str(), "Contact");
    }

    #[test]
    fn pull_pagination() {
        let master = TestNode::new();
        for i in 0..5 {
            master.create_contact(&format!("Contact{i}"));
        }
        let (handler, context) = create_handler(&master, ServerConfig::default());
        let replica = InstanceId::generate();
        handler
            .handle_handshake(HandshakeRequest::new(replica, "", 0))
            .unwrap();

        let response = handler.handle_pull(PullRequest::new(replica, 0, 2)).unwrap();
        assert_eq!(response.entries.len(), 2);
        assert!(response.has_more);

        let response = handler
            .handle_pull(PullRequest::new(replica, response.new_cursor, 2))
            .unwrap();
        assert_eq!(response.entries.len(), 2);
        assert!(response.has_more);
        assert_eq!(context.replica_cursor(&replica), Some(2));
        assert!(context.replica_last_seen(&replica).is_some());

        let response = handler
            .handle_pull(PullRequest::new(replica, response.new_cursor, 2))
            .unwrap();
        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.new_cursor, 5);
        assert!(!response.has_more);
    }

    #[test]
    fn pull_limit_is_capped() {
        let master = TestNode::new();
        for i in 0..5 {
            master.create_contact(&format!("Contact{i}"));
        }
        let (handler, _) = create_handler(&master, ServerConfig::new().with_max_pull_batch(3));

        let response = handler
            .handle_pull(PullRequest::new(InstanceId::generate(), 0, 100))
            .unwrap();
        assert_eq!(response.entries.len(), 3);
        assert!(response.has_more);
    }
}
