//! Entities and their bookkeeping metadata.

use crate::types::{EntityId, ModelName, SequenceNumber, Timestamp};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bookkeeping metadata maintained by the owning store.
///
/// Metadata is never part of a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Account that created the entity.
    pub created_by: Option<String>,
    /// Creation time.
    pub creation_time: Option<Timestamp>,
    /// Account that last modified the entity.
    pub last_modified_by: Option<String>,
    /// Last modification time.
    pub last_modified_time: Option<Timestamp>,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Soft-delete time.
    pub deleted_time: Option<Timestamp>,
    /// Account that soft-deleted the entity.
    pub deleted_by: Option<String>,
}

/// One persistent domain object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    model: ModelName,
    id: Option<EntityId>,
    seq: SequenceNumber,
    fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    meta: EntityMeta,
}

impl Entity {
    /// Creates an empty, id-less entity of the given model.
    pub fn new(model: impl Into<ModelName>) -> Self {
        Self {
            model: model.into(),
            id: None,
            seq: SequenceNumber::UNSET,
            fields: BTreeMap::new(),
            meta: EntityMeta::default(),
        }
    }

    /// Sets the id (builder form).
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the seq (builder form).
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = SequenceNumber::new(seq);
        self
    }

    /// Sets a field (builder form).
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns the model.
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    /// Returns the id, if assigned.
    pub fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    /// Assigns the id.
    pub fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    /// Returns the seq.
    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    /// Overwrites the seq.
    pub fn set_seq(&mut self, seq: SequenceNumber) {
        self.seq = seq;
    }

    /// Returns a field value, `None` if the field was never set.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns a mutable field value.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(name)
    }

    /// Returns true if the field was set (even to null).
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Sets a field value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Unsets a field, returning its previous value.
    pub fn unset(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Iterates set fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Names of all set fields.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Returns the metadata.
    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    /// Returns the metadata mutably (store use).
    pub fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    /// Returns true if the entity is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.meta.is_deleted
    }
}
