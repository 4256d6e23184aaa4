//! # modlog core
//!
//! Modification log, diff and optimistic concurrency engine.
//!
//! This crate provides:
//! - Field-level [`Diff`]s and member-level [`CollectionDiff`]s driven by
//!   per-model [`ModelSchema`] descriptor tables
//! - The append-only [`ModificationLogStore`]
//! - The [`ConcurrencyResolver`] that merges concurrent edits from the log
//! - The [`EntityService`] write path (persist and log in one transaction)
//! - [`Undo`] by backwards replay of log entries
//!
//! Entity storage is a collaborator behind the [`EntityStore`] trait;
//! [`MemoryEntityStore`] and [`MemoryLogBackend`] are in-memory
//! implementations that take part in [`TransactionManager`] transactions.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod context;
pub mod diff;
mod entity;
mod error;
pub mod log;
mod resolver;
mod schema;
mod service;
mod store;
mod transaction;
mod types;
mod undo;
mod value;

pub use collection::EntityCollection;
pub use config::CoreConfig;
pub use context::WriteContext;
pub use diff::{CollectionDiff, Diff, DiffValue};
pub use entity::{Entity, EntityMeta};
pub use error::{ConflictDetails, ConflictKind, CoreError, CoreResult};
pub use log::{
    ChangeType, IncomingInstanceGuard, LogBackend, LogEntry, LogQuery, MemoryLogBackend,
    ModificationLogStore,
};
pub use resolver::{ConcurrencyResolver, Resolution};
pub use schema::{FieldDescriptor, FieldKind, ModelSchema, OmitFields, SchemaRegistry};
pub use service::EntityService;
pub use store::{EntityStore, MemoryEntityStore};
pub use transaction::{TransactionManager, TransactionParticipant};
pub use types::{now_millis, EntityId, InstanceId, ModelName, SequenceNumber, Timestamp};
pub use undo::{SkipReason, SkippedEntry, Undo, UndoOptions, UndoReport};
pub use value::FieldValue;
