//! Field-level diffs between two snapshots of one entity.
//!
//! A [`Diff`] records new values in `changed` and the values they replaced
//! in `previous`. Collection-valued fields carry a [`CollectionDiff`] on the
//! changed side and the full old collection on the previous side, so an
//! inverted diff restores the exact membership.

mod collection;

pub use collection::CollectionDiff;

use crate::collection::EntityCollection;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::schema::{FieldKind, OmitFields, SchemaRegistry};
use crate::types::{EntityId, ModelName, SequenceNumber};
use crate::value::{values_equal, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One side of a field change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiffValue {
    /// A plain value (including a full collection snapshot).
    Value(FieldValue),
    /// Member-level changes of a collection field.
    Collection(CollectionDiff),
}

impl DiffValue {
    /// Returns the plain value, if this is one.
    pub fn as_value(&self) -> Option<&FieldValue> {
        match self {
            DiffValue::Value(v) => Some(v),
            DiffValue::Collection(_) => None,
        }
    }

    /// Returns the collection diff, if this is one.
    pub fn as_collection_diff(&self) -> Option<&CollectionDiff> {
        match self {
            DiffValue::Collection(cd) => Some(cd),
            DiffValue::Value(_) => None,
        }
    }

    /// Returns true if this side equals the given field value.
    ///
    /// A collection diff never equals a plain value.
    pub fn matches(&self, value: Option<&FieldValue>) -> bool {
        match self {
            DiffValue::Value(v) => values_equal(Some(v), value),
            DiffValue::Collection(_) => false,
        }
    }
}

/// Set of changed fields between two snapshots of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub(crate) model: ModelName,
    pub(crate) record_id: Option<EntityId>,
    pub(crate) seq: Option<SequenceNumber>,
    pub(crate) changed: BTreeMap<String, DiffValue>,
    pub(crate) previous: BTreeMap<String, DiffValue>,
}

impl Diff {
    /// Creates an empty diff.
    pub fn new(model: impl Into<ModelName>) -> Self {
        Self {
            model: model.into(),
            record_id: None,
            seq: None,
            changed: BTreeMap::new(),
            previous: BTreeMap::new(),
        }
    }

    /// Computes the diff from `old` to `new`.
    ///
    /// `old == None` yields a pure-create diff (empty `previous`), `new ==
    /// None` a pure-delete diff (empty `changed`). Fields flagged
    /// `omit_from_log` in the schema or named in `omit` are skipped.
    pub fn compute(
        registry: &SchemaRegistry,
        old: Option<&Entity>,
        new: Option<&Entity>,
        omit: &OmitFields,
    ) -> CoreResult<Diff> {
        let reference = match (old, new) {
            (_, Some(n)) => n,
            (Some(o), None) => o,
            (None, None) => {
                return Err(CoreError::invalid_operation(
                    "diff needs at least one snapshot",
                ))
            }
        };
        if let (Some(o), Some(n)) = (old, new) {
            if o.model() != n.model() {
                return Err(CoreError::validation(format!(
                    "cannot diff {} against {}",
                    o.model(),
                    n.model()
                )));
            }
        }

        let schema = registry.require(reference.model())?;
        let mut diff = Diff::new(schema.name.clone());
        diff.record_id = new
            .and_then(|e| e.id().cloned())
            .or_else(|| old.and_then(|e| e.id().cloned()));
        diff.seq = new
            .or(old)
            .map(Entity::seq)
            .filter(|seq| seq.is_set());

        for descriptor in &schema.fields {
            if descriptor.omit_from_log || omit.contains(&descriptor.name) {
                continue;
            }
            let name = descriptor.name.as_str();
            let old_value = old.and_then(|e| e.get(name));
            let new_value = new.and_then(|e| e.get(name));

            match (old, new) {
                (None, _) => {
                    if let Some(v) = new_value.filter(|v| !v.is_null()) {
                        diff.changed
                            .insert(name.to_string(), DiffValue::Value(v.clone()));
                    }
                }
                (_, None) => {
                    if let Some(v) = old_value.filter(|v| !v.is_null()) {
                        diff.previous
                            .insert(name.to_string(), DiffValue::Value(v.clone()));
                    }
                }
                (Some(_), Some(_)) => {
                    if values_equal(old_value, new_value) {
                        continue;
                    }
                    let changed = match &descriptor.kind {
                        FieldKind::Collection { model } => {
                            let empty = EntityCollection::new(model.clone());
                            let before = old_value
                                .and_then(FieldValue::as_collection)
                                .unwrap_or(&empty);
                            let after = new_value
                                .and_then(FieldValue::as_collection)
                                .unwrap_or(&empty);
                            let cd = before.diff(after, registry)?;
                            if cd.is_empty() {
                                continue;
                            }
                            DiffValue::Collection(cd)
                        }
                        FieldKind::Scalar => {
                            DiffValue::Value(new_value.cloned().unwrap_or(FieldValue::Null))
                        }
                    };
                    diff.changed.insert(name.to_string(), changed);
                    diff.previous.insert(
                        name.to_string(),
                        DiffValue::Value(old_value.cloned().unwrap_or(FieldValue::Null)),
                    );
                }
            }
        }

        Ok(diff)
    }

    /// Returns the model.
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    /// Returns the id of the diffed entity.
    pub fn record_id(&self) -> Option<&EntityId> {
        self.record_id.as_ref()
    }

    /// Returns the seq of the newer snapshot.
    pub fn seq(&self) -> Option<SequenceNumber> {
        self.seq
    }

    /// New values by field.
    pub fn changed(&self) -> &BTreeMap<String, DiffValue> {
        &self.changed
    }

    /// Old values by field.
    pub fn previous(&self) -> &BTreeMap<String, DiffValue> {
        &self.previous
    }

    /// Returns true if the diff records no change at all.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.previous.is_empty()
    }

    /// Returns true if every recorded field is in `omit`.
    pub fn is_empty_ignoring(&self, omit: &OmitFields) -> bool {
        self.changed
            .keys()
            .chain(self.previous.keys())
            .all(|f| omit.contains(f))
    }

    /// Sets every changed field on `entity`.
    pub fn apply(&self, entity: &mut Entity) {
        for (field, value) in &self.changed {
            set_side(entity, field, value);
        }
        if let Some(seq) = self.seq {
            if seq > entity.seq() {
                entity.set_seq(seq);
            }
        }
    }

    /// Sets one changed field on `entity`. Returns false if the diff does
    /// not touch `field`.
    pub fn apply_field(&self, entity: &mut Entity, field: &str) -> bool {
        match self.changed.get(field) {
            Some(value) => {
                set_side(entity, field, value);
                true
            }
            None => false,
        }
    }

    /// Sets every previous field back on `entity`.
    ///
    /// A null previous value unsets the field.
    pub fn invert(&self, entity: &mut Entity) {
        for (field, value) in &self.previous {
            match value {
                DiffValue::Value(FieldValue::Null) => {
                    entity.unset(field);
                }
                other => set_side(entity, field, other),
            }
        }
    }

    /// Folds a later diff into this one.
    ///
    /// Per field the latest changed value wins while the oldest previous
    /// value is kept. Collection diffs on both sides are composed member by
    /// member instead.
    pub fn merge(&mut self, latest: &Diff) {
        for (field, value) in &latest.changed {
            if let (Some(DiffValue::Collection(earlier)), DiffValue::Collection(later)) =
                (self.changed.get_mut(field), value)
            {
                earlier.merge(later);
                continue;
            }
            self.changed.insert(field.clone(), value.clone());
        }
        for (field, value) in &latest.previous {
            self.previous
                .entry(field.clone())
                .or_insert_with(|| value.clone());
        }
        if latest.seq.is_some() {
            self.seq = latest.seq;
        }
        if self.record_id.is_none() {
            self.record_id = latest.record_id.clone();
        }
    }

    /// Serializes the diff as a log payload.
    pub fn to_payload(&self) -> CoreResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| CoreError::codec(format!("encode diff: {e}")))?;
        Ok(bytes)
    }

    /// Deserializes a log payload.
    pub fn from_payload(bytes: &[u8]) -> CoreResult<Diff> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::codec(format!("decode diff: {e}")))
    }

    /// Builds a new entity from the changed side (replay of a create).
    pub fn to_entity(&self) -> Entity {
        let mut entity = Entity::new(self.model.clone());
        if let Some(id) = &self.record_id {
            entity.set_id(id.clone());
        }
        self.apply(&mut entity);
        entity
    }

    /// Builds an entity from the previous side (recreating a deleted one).
    pub fn to_previous_entity(&self) -> Entity {
        let mut entity = Entity::new(self.model.clone());
        if let Some(id) = &self.record_id {
            entity.set_id(id.clone());
        }
        self.invert(&mut entity);
        entity
    }
}

fn set_side(entity: &mut Entity, field: &str, value: &DiffValue) {
    match value {
        DiffValue::Value(v) => entity.set(field, v.clone()),
        DiffValue::Collection(cd) => {
            match entity.get_mut(field).and_then(FieldValue::as_collection_mut) {
                Some(members) => {
                    members.apply_diff(cd);
                }
                None => {
                    let mut members = EntityCollection::new(cd.model().clone());
                    members.apply_diff(cd);
                    entity.set(field, members);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, ModelSchema};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                ModelSchema::new("Contact", "Addressbook")
                    .field(FieldDescriptor::scalar("name"))
                    .field(FieldDescriptor::scalar("email"))
                    .field(FieldDescriptor::scalar("phone"))
                    .field(FieldDescriptor::scalar("photo").omitted()),
            )
            .with(
                ModelSchema::new("List", "Addressbook")
                    .field(FieldDescriptor::scalar("name"))
                    .field(FieldDescriptor::collection("members", "Member")),
            )
            .with(ModelSchema::new("Member", "Addressbook").field(FieldDescriptor::scalar("role")))
    }

    fn contact() -> Entity {
        Entity::new("Contact")
            .with_id("c-1")
            .with_seq(1)
            .with_field("name", "Ada")
            .with_field("email", "ada@example.com")
    }

    #[test]
    fn identical_snapshots_give_empty_diff() {
        let c = contact();
        let diff = Diff::compute(&registry(), Some(&c), Some(&c), &OmitFields::new()).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn update_records_both_sides() {
        let old = contact();
        let new = old.clone().with_seq(2).with_field("email", "ada@lovelace.org");
        let diff = Diff::compute(&registry(), Some(&old), Some(&new), &OmitFields::new()).unwrap();

        assert_eq!(diff.changed().len(), 1);
        assert_eq!(
            diff.changed()["email"],
            DiffValue::Value("ada@lovelace.org".into())
        );
        assert_eq!(
            diff.previous()["email"],
            DiffValue::Value("ada@example.com".into())
        );
        assert_eq!(diff.seq(), Some(SequenceNumber::new(2)));
        assert_eq!(diff.record_id(), Some(&EntityId::from("c-1")));
    }

    #[test]
    fn create_and_delete_are_one_sided() {
        let c = contact();
        let created = Diff::compute(&registry(), None, Some(&c), &OmitFields::new()).unwrap();
        assert!(created.previous().is_empty());
        assert_eq!(created.changed().len(), 2);

        let deleted = Diff::compute(&registry(), Some(&c), None, &OmitFields::new()).unwrap();
        assert!(deleted.changed().is_empty());
        assert_eq!(deleted.previous().len(), 2);
    }

    #[test]
    fn omitted_fields_are_skipped() {
        let old = contact();
        let new = old
            .clone()
            .with_field("photo", FieldValue::Bytes(vec![1, 2, 3]));
        let diff = Diff::compute(&registry(), Some(&old), Some(&new), &OmitFields::new()).unwrap();
        assert!(diff.is_empty());

        let renamed = old.clone().with_field("name", "Augusta");
        let omit = OmitFields::new().with("name");
        let diff = Diff::compute(&registry(), Some(&old), Some(&renamed), &omit).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn is_empty_ignoring_checks_every_key() {
        let old = contact();
        let new = old
            .clone()
            .with_field("name", "Augusta")
            .with_field("phone", "555");
        let diff = Diff::compute(&registry(), Some(&old), Some(&new), &OmitFields::new()).unwrap();
        assert!(!diff.is_empty_ignoring(&OmitFields::new().with("name")));
        assert!(diff.is_empty_ignoring(&["name", "phone"].into_iter().collect()));
    }

    #[test]
    fn invert_restores_scalars() {
        let old = contact();
        let mut new = old
            .clone()
            .with_field("email", "other@example.com")
            .with_field("phone", "555");
        let diff = Diff::compute(&registry(), Some(&old), Some(&new), &OmitFields::new()).unwrap();
        diff.invert(&mut new);
        assert_eq!(new, old);
    }

    #[test]
    fn merge_keeps_latest_changed_and_oldest_previous() {
        let v1 = contact();
        let v2 = v1.clone().with_seq(2).with_field("name", "B");
        let v3 = v2.clone().with_seq(3).with_field("name", "C").with_field("phone", "1");
        let registry = registry();
        let none = OmitFields::new();

        let mut folded = Diff::compute(&registry, Some(&v1), Some(&v2), &none).unwrap();
        folded.merge(&Diff::compute(&registry, Some(&v2), Some(&v3), &none).unwrap());

        assert_eq!(folded.changed()["name"], DiffValue::Value("C".into()));
        assert_eq!(folded.previous()["name"], DiffValue::Value("Ada".into()));
        assert_eq!(folded.previous()["phone"], DiffValue::Value(FieldValue::Null));
        assert_eq!(folded.seq(), Some(SequenceNumber::new(3)));
    }

    #[test]
    fn collection_field_diffs_members() {
        let registry = registry();
        let member = |id: &str, role: &str| {
            Entity::new("Member").with_id(id).with_seq(1).with_field("role", role)
        };
        let old = Entity::new("List").with_id("l-1").with_field(
            "members",
            EntityCollection::from_entities("Member", vec![member("a", "user"), member("b", "user")]),
        );
        let new = Entity::new("List").with_id("l-1").with_field(
            "members",
            EntityCollection::from_entities("Member", vec![member("b", "admin"), member("c", "user")]),
        );

        let diff = Diff::compute(&registry, Some(&old), Some(&new), &OmitFields::new()).unwrap();
        let cd = diff.changed()["members"].as_collection_diff().unwrap();
        assert_eq!(cd.added().ids(), vec![EntityId::from("c")]);
        assert_eq!(cd.removed().ids(), vec![EntityId::from("a")]);
        assert_eq!(cd.modified().len(), 1);

        let mut replayed = old.clone();
        diff.apply(&mut replayed);
        assert_eq!(replayed.get("members"), new.get("members"));

        diff.invert(&mut replayed);
        assert_eq!(replayed.get("members"), old.get("members"));
    }

    #[test]
    fn merge_composes_collection_fields() {
        let registry = registry();
        let none = OmitFields::new();
        let member = |id: &str| Entity::new("Member").with_id(id).with_field("role", "user");
        let list = |ids: &[&str]| {
            Entity::new("List").with_id("l-1").with_field(
                "members",
                EntityCollection::from_entities("Member", ids.iter().map(|id| member(*id))),
            )
        };
        let (v1, v2, v3) = (list(&["a"]), list(&["a", "b"]), list(&["a", "b", "c"]));

        let mut folded = Diff::compute(&registry, Some(&v1), Some(&v2), &none).unwrap();
        folded.merge(&Diff::compute(&registry, Some(&v2), Some(&v3), &none).unwrap());

        let cd = folded.changed()["members"].as_collection_diff().unwrap();
        assert_eq!(cd.added().ids(), vec![EntityId::from("b"), EntityId::from("c")]);
        assert!(folded.previous()["members"].matches(v1.get("members")));

        let mut replayed = v1.clone();
        folded.apply(&mut replayed);
        assert_eq!(replayed.get("members"), v3.get("members"));
    }

    #[test]
    fn payload_decodes_back() {
        let old = contact();
        let new = old.clone().with_seq(2).with_field("phone", "555");
        let diff = Diff::compute(&registry(), Some(&old), Some(&new), &OmitFields::new()).unwrap();
        let bytes = diff.to_payload().unwrap();
        assert_eq!(Diff::from_payload(&bytes).unwrap(), diff);
        assert!(Diff::from_payload(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn to_entity_rebuilds_create() {
        let c = contact();
        let diff = Diff::compute(&registry(), None, Some(&c), &OmitFields::new()).unwrap();
        let rebuilt = diff.to_entity();
        assert_eq!(rebuilt.id(), c.id());
        assert_eq!(rebuilt.get("email"), c.get("email"));
        assert_eq!(rebuilt.seq(), c.seq());
    }
}
