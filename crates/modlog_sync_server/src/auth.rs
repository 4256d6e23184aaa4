//! Replica authentication.
//!
//! Tokens are signed with HMAC-SHA256 and carry their issue time for
//! expiry checks.
//!
//! ## Token Format
//!
//! - 16 bytes: replica instance id
//! - 8 bytes: timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total: 56 bytes, base64url-encoded (no padding) for transport.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use modlog_core::{now_millis, InstanceId};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 56;
const SIGNED_LEN: usize = 24;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a configuration with a 24 hour expiry.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and checks replica tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `instance_id`.
    pub fn create_token(&self, instance_id: &InstanceId) -> ServerResult<String> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(instance_id.as_bytes());
        token.extend_from_slice(&now_millis().to_be_bytes());

        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Checks that `token` was issued by this server for `expected` and has
    /// not expired.
    pub fn validate_token(&self, token: &str, expected: &InstanceId) -> ServerResult<()> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        if bytes.len() != TOKEN_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }

        let (signed, signature) = bytes.split_at(SIGNED_LEN);
        let (instance, timestamp) = signed.split_at(16);
        if instance != expected.as_bytes() {
            return Err(ServerError::NotAuthorized("instance id mismatch".into()));
        }

        self.mac(signed)?
            .verify_slice(signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(timestamp);
        let issued = u64::from_be_bytes(stamp);
        let expiry = self.config.token_expiry.as_millis() as u64;
        if now_millis() > issued.saturating_add(expiry) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(())
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let replica = InstanceId::generate();

        let token = validator.create_token(&replica).unwrap();
        assert_eq!(URL_SAFE_NO_PAD.decode(&token).unwrap().len(), TOKEN_LEN);
        assert!(validator.validate_token(&token, &replica).is_ok());
    }

    #[test]
    fn reject_wrong_instance() {
        let validator = validator();
        let token = validator.create_token(&InstanceId::generate()).unwrap();
        assert!(validator
            .validate_token(&token, &InstanceId::generate())
            .is_err());
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let replica = InstanceId::generate();

        let mut bytes = URL_SAFE_NO_PAD
            .decode(validator.create_token(&replica).unwrap())
            .unwrap();
        bytes[40] ^= 0xFF;
        let token = URL_SAFE_NO_PAD.encode(bytes);

        assert!(validator.validate_token(&token, &replica).is_err());
    }

    #[test]
    fn reject_other_secret() {
        let replica = InstanceId::generate();
        let token = validator().create_token(&replica).unwrap();
        let other = TokenValidator::new(AuthConfig::new(b"another-secret".to_vec()));
        assert!(other.validate_token(&token, &replica).is_err());
    }

    #[test]
    fn reject_garbage() {
        let validator = validator();
        let replica = InstanceId::generate();
        assert!(validator.validate_token("not a token!", &replica).is_err());
        assert!(validator.validate_token("", &replica).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let validator = TokenValidator::new(
            AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec())
                .with_expiry(Duration::from_secs(0)),
        );
        let replica = InstanceId::generate();
        let token = validator.create_token(&replica).unwrap();

        std::thread::sleep(Duration::from_millis(10));
        assert!(validator.validate_token(&token, &replica).is_err());
    }
}
