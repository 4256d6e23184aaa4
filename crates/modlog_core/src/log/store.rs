//! The modification log store.

use super::backend::LogBackend;
use super::entry::{ChangeType, LogEntry};
use super::query::LogQuery;
use crate::context::WriteContext;
use crate::diff::Diff;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::schema::{OmitFields, SchemaRegistry};
use crate::store::EntityStore;
use crate::types::{now_millis, EntityId, InstanceId, ModelName, SequenceNumber};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Records every field-level change as an immutable, ordered log entry.
pub struct ModificationLogStore {
    instance_id: InstanceId,
    backend: Arc<dyn LogBackend>,
    schemas: Arc<SchemaRegistry>,
    omit: OmitFields,
    incoming: Mutex<Option<Incoming>>,
}

/// The origin of an entry being replayed.
#[derive(Debug, Clone, Copy)]
struct Incoming {
    instance: InstanceId,
    instance_seq: u64,
}

impl ModificationLogStore {
    /// Creates a log store for the local instance.
    pub fn new(
        instance_id: InstanceId,
        backend: Arc<dyn LogBackend>,
        schemas: Arc<SchemaRegistry>,
    ) -> Self {
        Self {
            instance_id,
            backend,
            schemas,
            omit: OmitFields::new(),
            incoming: Mutex::new(None),
        }
    }

    /// Sets fields that are never logged, whatever the model.
    #[must_use]
    pub fn with_omit_fields(mut self, omit: OmitFields) -> Self {
        self.omit = omit;
        self
    }

    /// Id of the local instance.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The schema table.
    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn LogBackend> {
        &self.backend
    }

    /// Logs the change from `old` to `new`.
    ///
    /// `old == None` logs a create, `new == None` a delete whose seq is one
    /// past `old`'s. Returns `Ok(None)` without writing when nothing logged
    /// changed. Must run inside the caller's transaction.
    pub fn write(
        &self,
        new: Option<&Entity>,
        old: Option<&Entity>,
        omit: &OmitFields,
        record_backend: &str,
        ctx: &WriteContext,
    ) -> CoreResult<Option<LogEntry>> {
        let omit = self.omit.union(omit);
        let mut diff = Diff::compute(&self.schemas, old, new, &omit)?;
        if diff.is_empty() {
            debug!(model = %diff.model(), id = ?diff.record_id(), "nothing to log");
            return Ok(None);
        }

        let change_type = match (old, new) {
            (None, _) => ChangeType::Created,
            (_, None) => ChangeType::Deleted,
            _ => ChangeType::Updated,
        };
        let seq = match (new, old) {
            (Some(n), _) => n.seq(),
            (None, Some(o)) => o.seq().next(),
            (None, None) => SequenceNumber::UNSET,
        };
        if !seq.is_set() {
            return Err(CoreError::invalid_operation(format!(
                "cannot log {} of unpersisted {}",
                change_type,
                diff.model()
            )));
        }
        diff.seq = Some(seq);

        let record_id = diff
            .record_id()
            .cloned()
            .ok_or_else(|| CoreError::validation("cannot log an entity without id"))?;
        let schema = self.schemas.require(diff.model())?;

        let incoming = *self.incoming.lock();
        let (instance_id, instance_seq) = match incoming {
            Some(incoming) => (Some(incoming.instance), incoming.instance_seq),
            None if schema.replicable => (Some(self.instance_id), 0),
            None => (None, 0),
        };

        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            application_id: schema.application.clone(),
            record_type: schema.name.clone(),
            record_id,
            record_backend: record_backend.to_string(),
            change_type,
            seq,
            modification_time: now_millis(),
            modifier_account_id: ctx.account_id.clone(),
            payload: diff.to_payload()?,
            instance_id,
            instance_seq,
            client: ctx.client.clone(),
        };

        let stored = self.backend.append(entry)?;
        debug!(
            entry = %stored.label(),
            change = %stored.change_type,
            instance_seq = stored.instance_seq,
            "log entry written"
        );
        Ok(Some(stored))
    }

    /// Reads entries matching `query`, ordered by `instance_seq`.
    pub fn query_range(&self, query: &LogQuery) -> CoreResult<Vec<LogEntry>> {
        self.backend.query(query)
    }

    /// Updated entries of one entity with `after < seq <= up_to`.
    pub fn updates_between(
        &self,
        model: &ModelName,
        id: &EntityId,
        after: SequenceNumber,
        up_to: SequenceNumber,
    ) -> CoreResult<Vec<LogEntry>> {
        self.query_range(
            &LogQuery::for_record(model.clone(), id.clone())
                .with_seq_range(after, up_to)
                .with_change_type(ChangeType::Updated),
        )
    }

    /// Folds the updated entries in `entries` into one diff.
    ///
    /// Entries are folded in seq order; the latest changed value and the
    /// oldest previous value win per field. Returns `None` if no updated
    /// entry is present.
    pub fn aggregate_diff(&self, entries: &[LogEntry]) -> CoreResult<Option<Diff>> {
        let mut updates: Vec<&LogEntry> = entries
            .iter()
            .filter(|e| e.change_type == ChangeType::Updated)
            .collect();
        updates.sort_by_key(|e| e.seq);

        let mut folded: Option<Diff> = None;
        for entry in updates {
            let diff = self.decode_diff(entry)?;
            match folded.as_mut() {
                Some(acc) => acc.merge(&diff),
                None => folded = Some(diff),
            }
        }
        Ok(folded)
    }

    /// Entries originating here with `instance_seq > cursor`, at most `limit`.
    pub fn pending_replication_batch(&self, cursor: u64, limit: usize) -> CoreResult<Vec<LogEntry>> {
        self.query_range(
            &LogQuery::new()
                .with_instance(self.instance_id)
                .with_after_instance_seq(cursor)
                .with_limit(limit),
        )
    }

    /// Number of entries originating here with `instance_seq > cursor`.
    pub fn pending_count_after(&self, cursor: u64) -> CoreResult<usize> {
        self.backend.count(
            &LogQuery::new()
                .with_instance(self.instance_id)
                .with_after_instance_seq(cursor),
        )
    }

    /// Highest `instance_seq` ever issued here, pruned entries included.
    pub fn latest_instance_seq(&self) -> CoreResult<u64> {
        self.backend.latest_instance_seq(Some(self.instance_id))
    }

    /// Deletes entries of entities that no longer exist in `store` at all.
    ///
    /// Soft-deleted entities still exist and keep their history. Only
    /// entries recorded against `store`'s backend are considered.
    pub fn prune(&self, store: &dyn EntityStore) -> CoreResult<usize> {
        let backend_name = store.backend_name();
        let records: BTreeSet<(ModelName, EntityId)> = self
            .backend
            .query(&LogQuery::new())?
            .into_iter()
            .filter(|e| e.record_backend == backend_name)
            .map(|e| (e.record_type, e.record_id))
            .collect();

        let mut gone = HashSet::new();
        for (model, id) in records {
            if !store.exists(&model, &id)? {
                gone.insert((model, id));
            }
        }
        if gone.is_empty() {
            return Ok(0);
        }

        let removed = self.backend.delete_where(&|e: &LogEntry| {
            e.record_backend == backend_name
                && gone.contains(&(e.record_type.clone(), e.record_id.clone()))
        })?;
        info!(records = gone.len(), entries = removed, "pruned log");
        Ok(removed)
    }

    /// Attributes log writes to `(instance, instance_seq)` until the guard
    /// is dropped.
    ///
    /// Used while replaying an incoming entry so the change keeps its
    /// original position in the origin's order. A replay logs at most one
    /// entry; a second write under the same guard fails.
    pub fn incoming_instance(
        &self,
        instance: InstanceId,
        instance_seq: u64,
    ) -> IncomingInstanceGuard<'_> {
        let previous = self.incoming.lock().replace(Incoming {
            instance,
            instance_seq,
        });
        IncomingInstanceGuard {
            slot: &self.incoming,
            previous,
        }
    }

    /// The incoming instance currently in effect, if any.
    pub fn current_incoming(&self) -> Option<InstanceId> {
        self.incoming.lock().map(|incoming| incoming.instance)
    }

    /// Decodes the diff carried by `entry`.
    pub fn decode_diff(&self, entry: &LogEntry) -> CoreResult<Diff> {
        Diff::from_payload(&entry.payload).map_err(|e| {
            CoreError::codec(format!("entry {} ({}): {e}", entry.id, entry.label()))
        })
    }
}

impl std::fmt::Debug for ModificationLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModificationLogStore")
            .field("instance_id", &self.instance_id)
            .field("omit", &self.omit)
            .finish()
    }
}

/// Restores the previous incoming instance when dropped.
pub struct IncomingInstanceGuard<'a> {
    slot: &'a Mutex<Option<Incoming>>,
    previous: Option<Incoming>,
}

impl Drop for IncomingInstanceGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = self.previous;
    }
}
