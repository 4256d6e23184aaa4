//! Storage collaborator contract and an in-memory implementation.
//!
//! The core never owns entity storage. It loads, persists and deletes
//! through [`EntityStore`]; the surrounding CRUD layer provides the real
//! backend.

use crate::context::WriteContext;
use crate::entity::Entity;
use crate::error::{ConflictDetails, ConflictKind, CoreError, CoreResult};
use crate::transaction::TransactionParticipant;
use crate::types::{now_millis, EntityId, ModelName, SequenceNumber};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

/// Storage operations the core needs from the CRUD layer.
pub trait EntityStore: Send + Sync {
    /// Name recorded as `record_backend` in log entries.
    fn backend_name(&self) -> &str;

    /// Loads an entity, including soft-deleted ones.
    ///
    /// Returns `Ok(None)` if it does not exist at all.
    fn load(&self, model: &ModelName, id: &EntityId) -> CoreResult<Option<Entity>>;

    /// Inserts a new entity with seq 1, assigning an id if it has none.
    fn insert(&self, entity: Entity, ctx: &WriteContext) -> CoreResult<Entity> {
        self.insert_at(entity, SequenceNumber::new(1), ctx)
    }

    /// Inserts a new entity with the given seq.
    ///
    /// Used when an id comes back after a hard delete, so its history keeps
    /// counting from where it stopped.
    fn insert_at(&self, entity: Entity, seq: SequenceNumber, ctx: &WriteContext)
        -> CoreResult<Entity>;

    /// Replaces a stored entity and bumps its seq by one.
    ///
    /// `entity.seq()` must equal the stored seq, otherwise the write is
    /// stale and fails with a concurrency conflict.
    fn replace(&self, entity: Entity, ctx: &WriteContext) -> CoreResult<Entity>;

    /// Flags an entity as deleted and bumps its seq.
    fn soft_delete(&self, model: &ModelName, id: &EntityId, ctx: &WriteContext)
        -> CoreResult<Entity>;

    /// Clears the deleted flag and bumps the seq.
    fn undelete(&self, model: &ModelName, id: &EntityId, ctx: &WriteContext) -> CoreResult<Entity>;

    /// Removes an entity for good, returning what was stored.
    fn remove(&self, model: &ModelName, id: &EntityId) -> CoreResult<Option<Entity>>;

    /// Lists every stored entity of a model, including soft-deleted ones.
    fn list(&self, model: &ModelName) -> CoreResult<Vec<Entity>>;

    /// Returns true if the entity exists, soft-deleted or not.
    fn exists(&self, model: &ModelName, id: &EntityId) -> CoreResult<bool> {
        Ok(self.load(model, id)?.is_some())
    }
}

type Key = (ModelName, EntityId);

/// In-memory [`EntityStore`] that takes part in transactions.
///
/// Rollback restores the snapshot taken at begin. Readers outside the
/// writing thread may observe uncommitted state.
pub struct MemoryEntityStore {
    name: String,
    entities: RwLock<BTreeMap<Key, Entity>>,
    snapshot: Mutex<Option<BTreeMap<Key, Entity>>>,
}

impl MemoryEntityStore {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: RwLock::new(BTreeMap::new()),
            snapshot: Mutex::new(None),
        }
    }

    /// Creates a store holding the given entities as-is.
    ///
    /// Entities without an id are skipped.
    pub fn with_entities(name: impl Into<String>, entities: impl IntoIterator<Item = Entity>) -> Self {
        let store = Self::new(name);
        {
            let mut map = store.entities.write();
            for entity in entities {
                if let Some(id) = entity.id().cloned() {
                    map.insert((entity.model().clone(), id), entity);
                }
            }
        }
        store
    }

    /// Returns every stored entity, ordered by model and id.
    pub fn all(&self) -> Vec<Entity> {
        self.entities.read().values().cloned().collect()
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    fn modify<F>(&self, model: &ModelName, id: &EntityId, f: F) -> CoreResult<Entity>
    where
        F: FnOnce(&mut Entity),
    {
        let mut map = self.entities.write();
        let stored = map
            .get_mut(&(model.clone(), id.clone()))
            .ok_or_else(|| CoreError::not_found(model, id))?;
        f(stored);
        stored.set_seq(stored.seq().next());
        Ok(stored.clone())
    }
}

impl EntityStore for MemoryEntityStore {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn load(&self, model: &ModelName, id: &EntityId) -> CoreResult<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .get(&(model.clone(), id.clone()))
            .cloned())
    }

    fn insert_at(
        &self,
        mut entity: Entity,
        seq: SequenceNumber,
        ctx: &WriteContext,
    ) -> CoreResult<Entity> {
        if !seq.is_set() {
            return Err(CoreError::invalid_operation("cannot insert at an unset seq"));
        }
        let id = match entity.id() {
            Some(id) => id.clone(),
            None => {
                let id = EntityId::generate();
                entity.set_id(id.clone());
                id
            }
        };
        let key = (entity.model().clone(), id);

        let mut map = self.entities.write();
        if map.contains_key(&key) {
            return Err(CoreError::invalid_operation(format!(
                "{}/{} already exists",
                key.0, key.1
            )));
        }

        let now = now_millis();
        entity.set_seq(seq);
        let meta = entity.meta_mut();
        meta.created_by = ctx.account_id.clone();
        meta.creation_time = Some(now);
        meta.last_modified_by = ctx.account_id.clone();
        meta.last_modified_time = Some(now);
        meta.is_deleted = false;
        meta.deleted_time = None;
        meta.deleted_by = None;

        map.insert(key, entity.clone());
        Ok(entity)
    }

    fn replace(&self, mut entity: Entity, ctx: &WriteContext) -> CoreResult<Entity> {
        let id = entity
            .id()
            .cloned()
            .ok_or_else(|| CoreError::validation("cannot replace an entity without id"))?;
        let key = (entity.model().clone(), id.clone());

        let mut map = self.entities.write();
        let stored = map
            .get(&key)
            .ok_or_else(|| CoreError::not_found(entity.model(), &id))?;
        if stored.seq() != entity.seq() {
            return Err(CoreError::conflict(ConflictDetails {
                model: entity.model().clone(),
                record_id: Some(id),
                kind: ConflictKind::StaleWrite {
                    expected: entity.seq(),
                    actual: stored.seq(),
                },
            }));
        }

        let mut meta = stored.meta().clone();
        meta.last_modified_by = ctx.account_id.clone();
        meta.last_modified_time = Some(now_millis());
        *entity.meta_mut() = meta;
        entity.set_seq(stored.seq().next());

        map.insert(key, entity.clone());
        Ok(entity)
    }

    fn soft_delete(
        &self,
        model: &ModelName,
        id: &EntityId,
        ctx: &WriteContext,
    ) -> CoreResult<Entity> {
        self.modify(model, id, |e| {
            let meta = e.meta_mut();
            meta.is_deleted = true;
            meta.deleted_time = Some(now_millis());
            meta.deleted_by = ctx.account_id.clone();
        })
    }

    fn undelete(&self, model: &ModelName, id: &EntityId, ctx: &WriteContext) -> CoreResult<Entity> {
        self.modify(model, id, |e| {
            let meta = e.meta_mut();
            meta.is_deleted = false;
            meta.deleted_time = None;
            meta.deleted_by = None;
            meta.last_modified_by = ctx.account_id.clone();
            meta.last_modified_time = Some(now_millis());
        })
    }

    fn remove(&self, model: &ModelName, id: &EntityId) -> CoreResult<Option<Entity>> {
        Ok(self.entities.write().remove(&(model.clone(), id.clone())))
    }

    fn list(&self, model: &ModelName) -> CoreResult<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .iter()
            .filter(|((m, _), _)| m == model)
            .map(|(_, e)| e.clone())
            .collect())
    }
}

impl TransactionParticipant for MemoryEntityStore {
    fn participant_name(&self) -> &str {
        &self.name
    }

    fn begin(&self) -> CoreResult<()> {
        *self.snapshot.lock() = Some(self.entities.read().clone());
        Ok(())
    }

    fn commit(&self) -> CoreResult<()> {
        self.snapshot.lock().take();
        Ok(())
    }

    fn rollback(&self) {
        if let Some(saved) = self.snapshot.lock().take() {
            *self.entities.write() = saved;
        }
    }
}

impl std::fmt::Debug for MemoryEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEntityStore")
            .field("name", &self.name)
            .field("entities", &self.len())
            .finish()
    }
}
