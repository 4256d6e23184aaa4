//! On-disk instance state.
//!
//! Each instance lives in its own directory. `state.json` holds the
//! instance id, schema table, entities, modification log and replication
//! cursor. Commands load it into in-memory stores, wire a write path over
//! them and save it back when they are done.

use crate::error::{CliError, CliResult};
use modlog_core::{
    CoreConfig, Entity, EntityService, FieldDescriptor, InstanceId, LogEntry, MemoryEntityStore,
    MemoryLogBackend, ModelSchema, ModificationLogStore, SchemaRegistry, TransactionManager,
};
use modlog_sync_engine::MemoryCursorStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Name of the state file inside an instance directory.
pub const STATE_FILE: &str = "state.json";

/// Name of the replication lock file inside an instance directory.
pub const LOCK_FILE: &str = "replication.lock";

/// Backend name recorded in log entries.
const BACKEND_NAME: &str = "local";

#[derive(Serialize, Deserialize)]
struct StateFile {
    instance_id: InstanceId,
    schemas: Vec<ModelSchema>,
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    log: Vec<LogEntry>,
    /// Highest `instance_seq` issued per instance, surviving prunes.
    #[serde(default)]
    instance_seqs: Vec<(Option<InstanceId>, u64)>,
    #[serde(default)]
    cursor: u64,
}

/// Schemas every new instance starts with: an address book.
pub fn default_schemas() -> Vec<ModelSchema> {
    vec![
        ModelSchema::new("Contact", "Addressbook")
            .field(FieldDescriptor::scalar("name"))
            .field(FieldDescriptor::scalar("email"))
            .field(FieldDescriptor::scalar("phone"))
            .field(FieldDescriptor::scalar("tags"))
            .field(FieldDescriptor::scalar("etag").omitted())
            .replicable(true)
            .soft_delete(true),
        ModelSchema::new("List", "Addressbook")
            .field(FieldDescriptor::scalar("name"))
            .field(FieldDescriptor::collection("members", "Member"))
            .replicable(true),
        ModelSchema::new("Member", "Addressbook")
            .field(FieldDescriptor::scalar("contact"))
            .field(FieldDescriptor::scalar("role")),
        ModelSchema::new("Note", "Notes").field(FieldDescriptor::scalar("body")),
    ]
}

/// A loaded instance with its write path wired.
pub struct Instance {
    dir: PathBuf,
    instance_id: InstanceId,
    schemas: Vec<ModelSchema>,
    service: Arc<EntityService>,
    store: Arc<MemoryEntityStore>,
    log_backend: Arc<MemoryLogBackend>,
    cursor: Arc<MemoryCursorStore>,
}

impl Instance {
    /// Creates a new instance in `dir` and saves it.
    pub fn init(dir: &Path, instance_id: Option<InstanceId>) -> CliResult<Self> {
        let path = dir.join(STATE_FILE);
        if path.exists() {
            return Err(CliError::AlreadyInitialized(dir.to_path_buf()));
        }
        fs::create_dir_all(dir)?;

        let state = StateFile {
            instance_id: instance_id.unwrap_or_else(InstanceId::generate),
            schemas: default_schemas(),
            entities: Vec::new(),
            log: Vec::new(),
            instance_seqs: Vec::new(),
            cursor: 0,
        };
        let instance = Self::from_state(dir, state);
        instance.save()?;
        Ok(instance)
    }

    /// Loads the instance stored in `dir`.
    pub fn open(dir: &Path) -> CliResult<Self> {
        let path = dir.join(STATE_FILE);
        if !path.exists() {
            return Err(CliError::NotInitialized(dir.to_path_buf()));
        }
        let state: StateFile = serde_json::from_slice(&fs::read(&path)?)?;
        debug!(
            path = %path.display(),
            entities = state.entities.len(),
            entries = state.log.len(),
            "instance loaded"
        );
        Ok(Self::from_state(dir, state))
    }

    fn from_state(dir: &Path, state: StateFile) -> Self {
        let config = CoreConfig::new().instance_id(state.instance_id);
        let schemas = Arc::new(SchemaRegistry::from_schemas(state.schemas.iter().cloned()));
        let store = Arc::new(MemoryEntityStore::with_entities(BACKEND_NAME, state.entities));
        let log_backend = Arc::new(
            MemoryLogBackend::with_entries(state.log).with_high_water_marks(state.instance_seqs),
        );
        let log = Arc::new(
            ModificationLogStore::new(state.instance_id, log_backend.clone(), schemas.clone())
                .with_omit_fields(config.omit_fields.clone()),
        );
        let transactions = Arc::new(TransactionManager::new());
        transactions.register(store.clone());
        transactions.register(log_backend.clone());

        let service = Arc::new(EntityService::new(
            config,
            schemas,
            store.clone(),
            log,
            transactions,
        ));
        Self {
            dir: dir.to_path_buf(),
            instance_id: state.instance_id,
            schemas: state.schemas,
            service,
            store,
            log_backend,
            cursor: Arc::new(MemoryCursorStore::with_cursor(state.cursor)),
        }
    }

    /// Writes the current state back to disk.
    ///
    /// The file is replaced atomically through a temporary sibling.
    pub fn save(&self) -> CliResult<()> {
        let state = StateFile {
            instance_id: self.instance_id,
            schemas: self.schemas.clone(),
            entities: self.store.all(),
            log: self.log_backend.entries(),
            instance_seqs: self.log_backend.high_water_marks(),
            cursor: self.cursor.current(),
        };
        let path = self.dir.join(STATE_FILE);
        let tmp = self.dir.join(format!("{STATE_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(&state)?)?;
        fs::rename(&tmp, &path)?;
        debug!(
            path = %path.display(),
            entities = state.entities.len(),
            entries = state.log.len(),
            "instance saved"
        );
        Ok(())
    }

    /// The instance directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Id of this instance.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The write path.
    pub fn service(&self) -> &Arc<EntityService> {
        &self.service
    }

    /// The modification log.
    pub fn log(&self) -> &Arc<ModificationLogStore> {
        self.service.log()
    }

    /// Entity storage.
    pub fn store(&self) -> &Arc<MemoryEntityStore> {
        &self.store
    }

    /// Number of stored log entries.
    pub fn log_len(&self) -> usize {
        self.log_backend.len()
    }

    /// The replication cursor.
    pub fn cursor(&self) -> &Arc<MemoryCursorStore> {
        &self.cursor
    }

}

/// Path of the replication lock file of the instance in `dir`.
pub fn lock_path(dir: &Path) -> PathBuf {
    dir.join(LOCK_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modlog_core::{LogQuery, ModelName, WriteContext};
    use modlog_sync_engine::CursorStore;

    #[test]
    fn init_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let created = Instance::init(dir.path(), None).unwrap();
        assert!(dir.path().join(STATE_FILE).exists());

        let opened = Instance::open(dir.path()).unwrap();
        assert_eq!(opened.instance_id(), created.instance_id());
        assert!(opened.store().is_empty());
        assert_eq!(opened.cursor().current(), 0);
    }

    #[test]
    fn init_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        Instance::init(dir.path(), None).unwrap();
        let err = Instance::init(dir.path(), None).err().unwrap();
        assert!(matches!(err, CliError::AlreadyInitialized(_)));
    }

    #[test]
    fn open_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Instance::open(dir.path()).err().unwrap();
        assert!(matches!(err, CliError::NotInitialized(_)));
    }

    #[test]
    fn writes_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let instance = Instance::init(dir.path(), None).unwrap();
        let ctx = WriteContext::account("admin");
        let created = instance
            .service()
            .create(Entity::new("Contact").with_field("name", "Ada"), &ctx)
            .unwrap();
        instance.cursor().store(7).unwrap();
        instance.save().unwrap();

        let reopened = Instance::open(dir.path()).unwrap();
        let id = created.id().cloned().unwrap();
        let loaded = reopened
            .service()
            .require(&ModelName::new("Contact"), &id)
            .unwrap();
        assert_eq!(loaded, created);
        assert_eq!(reopened.log_len(), 1);
        assert_eq!(reopened.cursor().current(), 7);
        let entry = &reopened.log().query_range(&LogQuery::new()).unwrap()[0];
        assert_eq!(reopened.log().decode_diff(entry).unwrap().model().as_str(), "Contact");
    }
}
