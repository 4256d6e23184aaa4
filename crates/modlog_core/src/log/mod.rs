//! Append-only modification log.
//!
//! Every write through the entity service lands here as a [`LogEntry`]
//! carrying the serialized [`Diff`](crate::diff::Diff). The log feeds
//! conflict resolution, replication and undo.

mod backend;
mod entry;
mod query;
mod store;

pub use backend::{LogBackend, MemoryLogBackend};
pub use entry::{ChangeType, LogEntry};
pub use query::LogQuery;
pub use store::{IncomingInstanceGuard, ModificationLogStore};
