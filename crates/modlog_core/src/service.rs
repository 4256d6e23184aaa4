//! The write path: persist an entity and log the change in one transaction.

use crate::config::CoreConfig;
use crate::context::WriteContext;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::log::ModificationLogStore;
use crate::resolver::ConcurrencyResolver;
use crate::schema::{OmitFields, SchemaRegistry};
use crate::store::EntityStore;
use crate::transaction::TransactionManager;
use crate::types::{EntityId, ModelName, SequenceNumber};
use std::sync::Arc;
use tracing::{debug, info};

/// Entity operations that keep the store and the modification log in step.
///
/// Every mutating call runs inside [`TransactionManager::run`], so nested
/// calls (a replication hook calling `update`, undo calling `delete`) join
/// the caller's transaction.
pub struct EntityService {
    config: CoreConfig,
    schemas: Arc<SchemaRegistry>,
    store: Arc<dyn EntityStore>,
    log: Arc<ModificationLogStore>,
    transactions: Arc<TransactionManager>,
}

impl EntityService {
    /// Wires a service from its collaborators.
    pub fn new(
        config: CoreConfig,
        schemas: Arc<SchemaRegistry>,
        store: Arc<dyn EntityStore>,
        log: Arc<ModificationLogStore>,
        transactions: Arc<TransactionManager>,
    ) -> Self {
        Self {
            config,
            schemas,
            store,
            log,
            transactions,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The schema table.
    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// The entity store.
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// The modification log.
    pub fn log(&self) -> &Arc<ModificationLogStore> {
        &self.log
    }

    /// The transaction manager.
    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// Loads a live (not soft-deleted) entity.
    pub fn get(&self, model: &ModelName, id: &EntityId) -> CoreResult<Option<Entity>> {
        Ok(self
            .store
            .load(model, id)?
            .filter(|e| !e.is_deleted()))
    }

    /// Loads an entity, failing with `NotFound` if it is missing or deleted.
    pub fn require(&self, model: &ModelName, id: &EntityId) -> CoreResult<Entity> {
        self.get(model, id)?
            .ok_or_else(|| CoreError::not_found(model, id))
    }

    /// Creates an entity. An id already set on `entity` is kept.
    pub fn create(&self, entity: Entity, ctx: &WriteContext) -> CoreResult<Entity> {
        self.create_at(entity, SequenceNumber::new(1), ctx)
    }

    /// Creates an entity whose first seq is `seq`.
    ///
    /// Brings back a hard-deleted id: its earlier entries still hold the
    /// seqs below `seq`.
    pub fn create_at(
        &self,
        entity: Entity,
        seq: SequenceNumber,
        ctx: &WriteContext,
    ) -> CoreResult<Entity> {
        self.transactions.run(|| {
            self.check(&entity)?;
            let stored = self.store.insert_at(entity, seq, ctx)?;
            self.log
                .write(Some(&stored), None, &OmitFields::new(), self.store.backend_name(), ctx)?;
            info!(model = %stored.model(), id = ?stored.id(), "entity created");
            Ok(stored)
        })
    }

    /// Creates an entity under a caller-chosen id.
    pub fn create_with_id(
        &self,
        id: EntityId,
        mut entity: Entity,
        ctx: &WriteContext,
    ) -> CoreResult<Entity> {
        entity.set_id(id);
        self.create(entity, ctx)
    }

    /// Updates an entity.
    pub fn update(&self, entity: Entity, ctx: &WriteContext) -> CoreResult<Entity> {
        self.update_with_omit(entity, &OmitFields::new(), ctx)
    }

    /// Updates an entity, leaving the `omit` fields out of the log entry.
    ///
    /// A submission whose seq is behind the stored one goes through the
    /// [`ConcurrencyResolver`] first. Fields the submission does not set
    /// keep their stored values. A submission that changes nothing is not
    /// persisted and the stored entity is returned.
    pub fn update_with_omit(
        &self,
        entity: Entity,
        omit: &OmitFields,
        ctx: &WriteContext,
    ) -> CoreResult<Entity> {
        self.transactions.run(|| {
            let model = entity.model().clone();
            let id = entity
                .id()
                .cloned()
                .ok_or_else(|| CoreError::validation(format!("cannot update {model} without id")))?;
            let server = self.require(&model, &id)?;

            let mut client = entity;
            if client.seq() != server.seq() {
                let resolution = ConcurrencyResolver::new(&self.log).resolve(&mut client, &server)?;
                debug!(
                    model = %model,
                    id = %id,
                    adopted = ?resolution.adopted,
                    merged = ?resolution.merged,
                    "concurrent update merged"
                );
            }
            client.set_seq(server.seq());
            for (name, value) in server.fields() {
                if !client.has(name) {
                    client.set(name.clone(), value.clone());
                }
            }

            if client.fields().eq(server.fields()) {
                debug!(model = %model, id = %id, "update changes nothing");
                return Ok(server);
            }
            self.check(&client)?;

            let stored = self.store.replace(client, ctx)?;
            self.log
                .write(Some(&stored), Some(&server), omit, self.store.backend_name(), ctx)?;
            debug!(model = %model, id = %id, seq = stored.seq().as_u64(), "entity updated");
            Ok(stored)
        })
    }

    /// Deletes an entity: soft for models flagged `soft_delete`, hard otherwise.
    pub fn delete(&self, model: &ModelName, id: &EntityId, ctx: &WriteContext) -> CoreResult<()> {
        if self.schemas.require(model)?.soft_delete {
            self.transactions.run(|| {
                let current = self.require(model, id)?;
                self.store.soft_delete(model, id, ctx)?;
                self.log_delete(&current, ctx)
            })
        } else {
            self.purge(model, id, ctx)
        }
    }

    /// Removes an entity for good, soft-deleted or not.
    pub fn purge(&self, model: &ModelName, id: &EntityId, ctx: &WriteContext) -> CoreResult<()> {
        self.transactions.run(|| {
            let current = self
                .store
                .remove(model, id)?
                .ok_or_else(|| CoreError::not_found(model, id))?;
            self.log_delete(&current, ctx)
        })
    }

    /// Restores a soft-deleted entity. Logged as a create.
    pub fn undelete(&self, model: &ModelName, id: &EntityId, ctx: &WriteContext) -> CoreResult<Entity> {
        self.transactions.run(|| {
            let current = self
                .store
                .load(model, id)?
                .ok_or_else(|| CoreError::not_found(model, id))?;
            if !current.is_deleted() {
                return Err(CoreError::invalid_operation(format!(
                    "{model}/{id} is not deleted"
                )));
            }
            let restored = self.store.undelete(model, id, ctx)?;
            self.log
                .write(Some(&restored), None, &OmitFields::new(), self.store.backend_name(), ctx)?;
            info!(model = %model, id = %id, "entity undeleted");
            Ok(restored)
        })
    }

    fn log_delete(&self, current: &Entity, ctx: &WriteContext) -> CoreResult<()> {
        self.log
            .write(None, Some(current), &OmitFields::new(), self.store.backend_name(), ctx)?;
        info!(model = %current.model(), id = ?current.id(), "entity deleted");
        Ok(())
    }

    fn check(&self, entity: &Entity) -> CoreResult<()> {
        let schema = self.schemas.require(entity.model())?;
        if self.config.validate {
            schema.validate(entity, &self.schemas)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EntityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityService")
            .field("instance_id", &self.config.instance_id)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}
