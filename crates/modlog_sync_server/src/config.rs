//! Server configuration.

use std::time::Duration;

/// Configuration for the replication server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on entries per pull, whatever the replica asks for.
    pub max_pull_batch: u32,
    /// Whether replicas must present a valid token.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// How long issued tokens stay valid.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a configuration without authentication.
    pub fn new() -> Self {
        Self {
            max_pull_batch: 1000,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token expiry.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_pull_batch, 1000);
        assert!(!config.require_auth);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_pull_batch(50)
            .with_token_expiry(Duration::from_secs(60))
            .with_auth(vec![1, 2, 3, 4]);

        assert_eq!(config.max_pull_batch, 50);
        assert_eq!(config.token_expiry, Duration::from_secs(60));
        assert!(config.require_auth);
        assert_eq!(config.auth_secret, Some(vec![1, 2, 3, 4]));
    }
}
