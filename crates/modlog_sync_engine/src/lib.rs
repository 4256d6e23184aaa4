//! # modlog Sync Engine
//!
//! Replica side of modlog replication.
//!
//! This crate provides:
//! - [`ReplicationEngine`]: one pull run per call (lock, handshake, pull,
//!   apply each entry in its own transaction, advance the cursor)
//! - Fleet-wide mutual exclusion ([`MemoryLock`], [`FileLock`])
//! - Persisted replication cursor ([`CursorStore`])
//! - Transport abstraction with HTTP and mock implementations
//! - Per-model [`Replicable`] hooks with a default applier fallback
//! - Retry with exponential backoff and operator [`Notifier`]s
//!
//! ## Key Invariants
//!
//! - Entries are applied strictly in ascending `instance_seq` order
//! - An entry and the cursor that covers it commit in one transaction
//! - A failed entry stops the run; the cursor never skips past it
//! - Re-applying an already applied entry is a no-op

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod cursor;
mod engine;
mod error;
mod hooks;
mod http;
mod lock;
mod notify;
mod transport;

pub use applier::{ApplyOutcome, DefaultApplier};
pub use config::{ReplicationConfig, RetryConfig};
pub use cursor::{CursorStore, MemoryCursorStore};
pub use engine::{ReplicationEngine, ReplicationRun, ReplicationState, ReplicationStats};
pub use error::{BackendErrorKind, ReplicationError, ReplicationResult};
pub use hooks::{HookOutcome, HookRegistry, Replicable};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use lock::{FileLock, LockGuard, MemoryLock, ReplicationLock};
pub use notify::{LogNotifier, MemoryNotifier, Notification, Notifier};
pub use transport::{MockTransport, ReplicationTransport};
