//! # modlog Sync Server
//!
//! Master side of modlog replication.
//!
//! This crate provides:
//! - Handshake and pull handlers over the master's [`ModificationLogStore`]
//! - Authentication of replicas (HMAC-SHA256 tokens)
//! - CBOR dispatch for the `/replication/*` endpoints
//!
//! # Architecture
//!
//! The master never pushes. Replicas handshake, then pull batches of the
//! entries that originated on the master (`pending_replication_batch`)
//! after their own cursor. The server keeps a session per replica with the
//! last cursor it asked for.
//!
//! # Authentication
//!
//! ```rust,ignore
//! use modlog_sync_server::{AuthConfig, ServerConfig, TokenValidator};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//!
//! // Issue a token for a replica
//! let validator = TokenValidator::new(AuthConfig::new(secret));
//! let token = validator.create_token(&replica_instance_id)?;
//! ```
//!
//! [`ModificationLogStore`]: modlog_core::ModificationLogStore

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::ReplicationServer;
