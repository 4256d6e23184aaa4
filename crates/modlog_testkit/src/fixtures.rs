//! Test fixtures: CRM-like schemas and fully wired nodes.

use modlog_core::{
    CoreConfig, Entity, EntityCollection, EntityId, EntityService, FieldDescriptor, InstanceId,
    MemoryEntityStore, MemoryLogBackend, ModelName, ModelSchema, ModificationLogStore,
    SchemaRegistry, TransactionManager, WriteContext,
};
use std::sync::Arc;

/// Schemas of a small address book: contacts, lists with members, notes.
///
/// `Contact` and `List` are replicable; `Contact` is soft-deleted;
/// `Contact.etag` is never logged; `Note` is local only.
pub fn crm_schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(
            ModelSchema::new("Contact", "Addressbook")
                .field(FieldDescriptor::scalar("name"))
                .field(FieldDescriptor::scalar("email"))
                .field(FieldDescriptor::scalar("phone"))
                .field(FieldDescriptor::scalar("tags"))
                .field(FieldDescriptor::scalar("etag").omitted())
                .replicable(true)
                .soft_delete(true),
        )
        .with(
            ModelSchema::new("List", "Addressbook")
                .field(FieldDescriptor::scalar("name"))
                .field(FieldDescriptor::collection("members", "Member"))
                .replicable(true),
        )
        .with(
            ModelSchema::new("Member", "Addressbook")
                .field(FieldDescriptor::scalar("contact"))
                .field(FieldDescriptor::scalar("role")),
        )
        .with(ModelSchema::new("Note", "Notes").field(FieldDescriptor::scalar("body")))
}

/// One instance with its stores, log and write path wired together.
pub struct TestNode {
    /// The write path.
    pub service: Arc<EntityService>,
    /// Entity storage.
    pub store: Arc<MemoryEntityStore>,
    /// Log storage.
    pub log_backend: Arc<MemoryLogBackend>,
    /// The log store.
    pub log: Arc<ModificationLogStore>,
    /// The transaction manager.
    pub transactions: Arc<TransactionManager>,
}

impl TestNode {
    /// Creates a node with a fresh instance id and [`crm_schemas`].
    pub fn new() -> Self {
        Self::with_instance(InstanceId::generate())
    }

    /// Creates a node with the given instance id.
    pub fn with_instance(instance_id: InstanceId) -> Self {
        Self::with_config(CoreConfig::new().instance_id(instance_id), crm_schemas())
    }

    /// Creates a node from a config and schema table.
    pub fn with_config(config: CoreConfig, schemas: SchemaRegistry) -> Self {
        let schemas = Arc::new(schemas);
        let store = Arc::new(MemoryEntityStore::new("memory"));
        let log_backend = Arc::new(MemoryLogBackend::new());
        let log = Arc::new(
            ModificationLogStore::new(config.instance_id, log_backend.clone(), schemas.clone())
                .with_omit_fields(config.omit_fields.clone()),
        );
        let transactions = Arc::new(TransactionManager::new());
        transactions.register(store.clone());
        transactions.register(log_backend.clone());

        let service = Arc::new(EntityService::new(
            config,
            schemas,
            store.clone(),
            log.clone(),
            transactions.clone(),
        ));
        Self {
            service,
            store,
            log_backend,
            log,
            transactions,
        }
    }

    /// Id of this node's instance.
    pub fn instance_id(&self) -> InstanceId {
        self.log.instance_id()
    }

    /// Creates a contact, panicking on failure.
    pub fn create_contact(&self, name: &str) -> Entity {
        self.service
            .create(contact(name), &test_context())
            .expect("create contact")
    }

    /// Loads a live entity, panicking if it is missing.
    pub fn fetch(&self, model: &str, id: &EntityId) -> Entity {
        self.service
            .require(&ModelName::new(model), id)
            .expect("fetch entity")
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Write context used by fixtures.
pub fn test_context() -> WriteContext {
    WriteContext::account("tester").with_client("testkit")
}

/// An unsaved contact.
pub fn contact(name: &str) -> Entity {
    let email = format!("{}@example.com", name.to_lowercase());
    Entity::new("Contact")
        .with_field("name", name)
        .with_field("email", email)
}

/// A list member with an id and seq 1.
pub fn member(id: &str, role: &str) -> Entity {
    Entity::new("Member")
        .with_id(id)
        .with_seq(1)
        .with_field("contact", id)
        .with_field("role", role)
}

/// An unsaved list holding `members`.
pub fn list(name: &str, members: Vec<Entity>) -> Entity {
    Entity::new("List")
        .with_field("name", name)
        .with_field("members", EntityCollection::from_entities("Member", members))
}
