//! Typed field-descriptor tables.
//!
//! Every model registers a [`ModelSchema`] once at startup. Diffing,
//! validation and replay consult the table instead of inspecting entity
//! shapes at runtime.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::types::ModelName;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Kind of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain value, compared by equality.
    Scalar,
    /// One-to-many relation, diffed member by member.
    Collection {
        /// Model of the members.
        model: ModelName,
    },
}

/// Describes one field of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Field kind.
    pub kind: FieldKind,
    /// Whether changes to this field are left out of the log.
    #[serde(default)]
    pub omit_from_log: bool,
}

impl FieldDescriptor {
    /// Creates a scalar field descriptor.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
            omit_from_log: false,
        }
    }

    /// Creates a collection field descriptor.
    pub fn collection(name: impl Into<String>, model: impl Into<ModelName>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Collection {
                model: model.into(),
            },
            omit_from_log: false,
        }
    }

    /// Marks the field as omitted from the log.
    #[must_use]
    pub fn omitted(mut self) -> Self {
        self.omit_from_log = true;
        self
    }

    /// Returns true for collection fields.
    pub fn is_collection(&self) -> bool {
        matches!(self.kind, FieldKind::Collection { .. })
    }
}

/// Field table and flags of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Model name.
    pub name: ModelName,
    /// Application owning the model.
    pub application: String,
    /// Field descriptors in declaration order.
    pub fields: Vec<FieldDescriptor>,
    /// Whether writes are stamped with the local instance id for replication.
    #[serde(default)]
    pub replicable: bool,
    /// Whether `delete` only flags entities as deleted.
    #[serde(default)]
    pub soft_delete: bool,
}

impl ModelSchema {
    /// Creates an empty schema.
    pub fn new(name: impl Into<ModelName>, application: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            application: application.into(),
            fields: Vec::new(),
            replicable: false,
            soft_delete: false,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    /// Sets the replicable flag.
    #[must_use]
    pub fn replicable(mut self, value: bool) -> Self {
        self.replicable = value;
        self
    }

    /// Sets the soft-delete flag.
    #[must_use]
    pub fn soft_delete(mut self, value: bool) -> Self {
        self.soft_delete = value;
        self
    }

    /// Looks up a field descriptor.
    pub fn descriptor(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks an entity against this schema, recursing into collections.
    pub fn validate(&self, entity: &Entity, registry: &SchemaRegistry) -> CoreResult<()> {
        if entity.model() != &self.name {
            return Err(CoreError::validation(format!(
                "entity of model {} validated against {}",
                entity.model(),
                self.name
            )));
        }

        for (name, value) in entity.fields() {
            let descriptor = self.descriptor(name).ok_or_else(|| {
                CoreError::validation(format!("{} has no field '{}'", self.name, name))
            })?;

            match (&descriptor.kind, value) {
                (_, FieldValue::Null) => {}
                (FieldKind::Collection { model }, FieldValue::Collection(members)) => {
                    if members.model() != model {
                        return Err(CoreError::validation(format!(
                            "{}.{} holds {} members, expected {}",
                            self.name,
                            name,
                            members.model(),
                            model
                        )));
                    }
                    let member_schema = registry.require(model)?;
                    for member in members.iter() {
                        member_schema.validate(member, registry)?;
                    }
                }
                (FieldKind::Collection { .. }, other) => {
                    return Err(CoreError::validation(format!(
                        "{}.{} expects a collection, got {}",
                        self.name,
                        name,
                        other.type_name()
                    )));
                }
                (FieldKind::Scalar, FieldValue::Collection(_)) => {
                    return Err(CoreError::validation(format!(
                        "{}.{} is scalar, got a collection",
                        self.name, name
                    )));
                }
                (FieldKind::Scalar, _) => {}
            }
        }

        Ok(())
    }
}

/// All model schemas known to a process.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: HashMap<ModelName, ModelSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from a list of schemas.
    pub fn from_schemas(schemas: impl IntoIterator<Item = ModelSchema>) -> Self {
        let mut registry = Self::new();
        for schema in schemas {
            registry.register(schema);
        }
        registry
    }

    /// Adds a schema (builder form).
    #[must_use]
    pub fn with(mut self, schema: ModelSchema) -> Self {
        self.register(schema);
        self
    }

    /// Adds or replaces a schema.
    pub fn register(&mut self, schema: ModelSchema) {
        self.models.insert(schema.name.clone(), schema);
    }

    /// Looks up a schema.
    pub fn get(&self, model: &ModelName) -> Option<&ModelSchema> {
        self.models.get(model)
    }

    /// Looks up a schema, failing with a validation error if it is unknown.
    pub fn require(&self, model: &ModelName) -> CoreResult<&ModelSchema> {
        self.get(model)
            .ok_or_else(|| CoreError::validation(format!("unknown model {model}")))
    }

    /// Iterates all schemas in name order.
    pub fn schemas(&self) -> Vec<&ModelSchema> {
        let mut all: Vec<_> = self.models.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Caller-supplied set of fields to leave out of a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OmitFields(BTreeSet<String>);

impl OmitFields {
    /// Creates an empty omission set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field (builder form).
    #[must_use]
    pub fn with(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into());
        self
    }

    /// Returns true if the field is omitted.
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    /// Returns true if nothing is omitted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the union of both sets.
    #[must_use]
    pub fn union(&self, other: &OmitFields) -> OmitFields {
        OmitFields(self.0.union(&other.0).cloned().collect())
    }

    /// Iterates the omitted field names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for OmitFields {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::EntityCollection;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                ModelSchema::new("List", "Addressbook")
                    .field(FieldDescriptor::scalar("name"))
                    .field(FieldDescriptor::collection("members", "Member")),
            )
            .with(ModelSchema::new("Member", "Addressbook").field(FieldDescriptor::scalar("role")))
    }

    #[test]
    fn validate_accepts_known_fields() {
        let registry = registry();
        let mut members = EntityCollection::new("Member");
        members.add(Entity::new("Member").with_field("role", "admin"));
        let list = Entity::new("List")
            .with_field("name", "team")
            .with_field("members", members);

        let schema = registry.require(&"List".into()).unwrap();
        schema.validate(&list, &registry).unwrap();
    }

    #[test]
    fn validate_rejects_unknown_field() {
        let registry = registry();
        let list = Entity::new("List").with_field("colour", "red");
        let err = registry
            .require(&"List".into())
            .unwrap()
            .validate(&list, &registry)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn validate_rejects_kind_mismatch() {
        let registry = registry();
        let list = Entity::new("List").with_field("members", "not a collection");
        assert!(registry
            .require(&"List".into())
            .unwrap()
            .validate(&list, &registry)
            .is_err());
    }

    #[test]
    fn unknown_model_is_validation_error() {
        let err = registry().require(&"Nope".into()).unwrap_err();
        assert!(err.to_string().contains("unknown model"));
    }

    #[test]
    fn omit_fields_from_iter() {
        let omit: OmitFields = ["a", "b"].into_iter().collect();
        assert!(omit.contains("a"));
        assert!(!omit.contains("c"));
    }
}
