//! Id-indexed, insertion-ordered entity collections (record sets).

use crate::diff::CollectionDiff;
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::schema::SchemaRegistry;
use crate::types::{EntityId, ModelName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// An ordered collection of entities of one model.
///
/// Members are distinguished by id. Members without an id (constructed but
/// not yet persisted) are kept too; diffing treats them as always added on
/// the new side and always removed on the old side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CollectionRepr", into = "CollectionRepr")]
pub struct EntityCollection {
    model: ModelName,
    members: Vec<Entity>,
    positions: HashMap<EntityId, usize>,
}

#[derive(Serialize, Deserialize)]
struct CollectionRepr {
    model: ModelName,
    members: Vec<Entity>,
}

impl From<CollectionRepr> for EntityCollection {
    fn from(repr: CollectionRepr) -> Self {
        Self::from_entities(repr.model, repr.members)
    }
}

impl From<EntityCollection> for CollectionRepr {
    fn from(collection: EntityCollection) -> Self {
        Self {
            model: collection.model,
            members: collection.members,
        }
    }
}

impl EntityCollection {
    /// Creates an empty collection.
    pub fn new(model: impl Into<ModelName>) -> Self {
        Self {
            model: model.into(),
            members: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Creates a collection from entities, in order.
    pub fn from_entities(
        model: impl Into<ModelName>,
        entities: impl IntoIterator<Item = Entity>,
    ) -> Self {
        let mut collection = Self::new(model);
        for entity in entities {
            collection.add(entity);
        }
        collection
    }

    /// Returns the member model.
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    /// Adds a member. A member with an id already present replaces it in place.
    pub fn add(&mut self, entity: Entity) {
        match entity.id().cloned() {
            Some(id) => match self.positions.get(&id) {
                Some(&pos) => self.members[pos] = entity,
                None => {
                    self.positions.insert(id, self.members.len());
                    self.members.push(entity);
                }
            },
            None => self.members.push(entity),
        }
    }

    /// Removes a member by id.
    pub fn remove(&mut self, id: &EntityId) -> Option<Entity> {
        let pos = self.positions.remove(id)?;
        let removed = self.members.remove(pos);
        self.reindex();
        Some(removed)
    }

    /// Looks up a member by id.
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.positions.get(id).map(|&pos| &self.members[pos])
    }

    /// Looks up a member by id, mutably.
    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        match self.positions.get(id) {
            Some(&pos) => self.members.get_mut(pos),
            None => None,
        }
    }

    /// Returns true if a member with this id exists.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.positions.contains_key(id)
    }

    /// Iterates members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.members.iter()
    }

    /// Ids of members that have one, in insertion order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.members.iter().filter_map(|m| m.id().cloned()).collect()
    }

    /// Members that have no id yet.
    pub fn idless(&self) -> impl Iterator<Item = &Entity> {
        self.members.iter().filter(|m| m.id().is_none())
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the collection has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns a new collection with the members matching `predicate`.
    pub fn filter<P>(&self, mut predicate: P) -> EntityCollection
    where
        P: FnMut(&Entity) -> bool,
    {
        EntityCollection::from_entities(
            self.model.clone(),
            self.members.iter().filter(|m| predicate(m)).cloned(),
        )
    }

    /// Computes the diff that turns `self` into `other`.
    pub fn diff(
        &self,
        other: &EntityCollection,
        registry: &SchemaRegistry,
    ) -> CoreResult<CollectionDiff> {
        CollectionDiff::compute(self, other, registry)
    }

    /// Applies a collection diff in place.
    ///
    /// Missing targets for removals and modifications are logged and
    /// skipped. Returns the number of skipped targets.
    pub fn apply_diff(&mut self, diff: &CollectionDiff) -> usize {
        let mut missing = 0;

        for added in diff.added.iter() {
            self.add(added.clone());
        }

        for removed in diff.removed.iter() {
            let Some(id) = removed.id() else {
                // id-less members are located by content
                if !self.remove_idless(removed) {
                    warn!(model = %self.model, "id-less member to remove not found");
                    missing += 1;
                }
                continue;
            };
            if self.remove(id).is_none() {
                warn!(model = %self.model, id = %id, "member to remove not found");
                missing += 1;
            }
        }

        for modified in &diff.modified {
            let target = modified
                .record_id
                .as_ref()
                .and_then(|id| self.positions.get(id).copied());
            match target {
                Some(pos) => modified.apply(&mut self.members[pos]),
                None => {
                    warn!(
                        model = %self.model,
                        id = ?modified.record_id,
                        "member to modify not found"
                    );
                    missing += 1;
                }
            }
        }

        missing
    }

    pub(crate) fn remove_idless(&mut self, like: &Entity) -> bool {
        let found = self
            .members
            .iter()
            .position(|m| m.id().is_none() && m.fields().eq(like.fields()));
        match found {
            Some(pos) => {
                self.members.remove(pos);
                self.reindex();
                true
            }
            None => false,
        }
    }

    fn reindex(&mut self) {
        self.positions.clear();
        for (pos, member) in self.members.iter().enumerate() {
            if let Some(id) = member.id() {
                self.positions.insert(id.clone(), pos);
            }
        }
    }
}

impl PartialEq for EntityCollection {
    /// Same model, same id-set, same field values per member. Order and
    /// member metadata are ignored; id-less members are compared in order.
    fn eq(&self, other: &Self) -> bool {
        if self.model != other.model || self.len() != other.len() {
            return false;
        }

        let by_id = self.members.iter().filter_map(|m| m.id().map(|id| (id, m)));
        for (id, member) in by_id {
            match other.get(id) {
                Some(theirs) if member.fields().eq(theirs.fields()) => {}
                _ => return false,
            }
        }

        self.idless()
            .zip(other.idless())
            .all(|(a, b)| a.fields().eq(b.fields()))
            && self.idless().count() == other.idless().count()
    }
}

impl<'a> IntoIterator for &'a EntityCollection {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, role: &str) -> Entity {
        Entity::new("Member").with_id(id).with_field("role", role)
    }

    #[test]
    fn add_replaces_same_id() {
        let mut c = EntityCollection::new("Member");
        c.add(member("a", "user"));
        c.add(member("b", "user"));
        c.add(member("a", "admin"));

        assert_eq!(c.len(), 2);
        assert_eq!(c.ids(), vec![EntityId::from("a"), EntityId::from("b")]);
        assert_eq!(
            c.get(&"a".into()).and_then(|m| m.get("role")),
            Some(&"admin".into())
        );
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut c = EntityCollection::from_entities(
            "Member",
            vec![member("a", "x"), member("b", "y"), member("c", "z")],
        );
        assert!(c.remove(&"a".into()).is_some());
        assert!(c.remove(&"a".into()).is_none());
        assert_eq!(
            c.get(&"c".into()).and_then(|m| m.get("role")),
            Some(&"z".into())
        );
    }

    #[test]
    fn idless_members_are_tracked() {
        let mut c = EntityCollection::new("Member");
        c.add(Entity::new("Member").with_field("role", "new"));
        c.add(Entity::new("Member").with_field("role", "newer"));
        c.add(member("a", "x"));
        assert_eq!(c.len(), 3);
        assert_eq!(c.idless().count(), 2);
        assert_eq!(c.ids().len(), 1);
    }

    #[test]
    fn filter_keeps_order() {
        let c = EntityCollection::from_entities(
            "Member",
            vec![member("a", "admin"), member("b", "user"), member("c", "admin")],
        );
        let admins = c.filter(|m| m.get("role") == Some(&"admin".into()));
        assert_eq!(admins.ids(), vec![EntityId::from("a"), EntityId::from("c")]);
    }

    #[test]
    fn equality_ignores_order() {
        let a = EntityCollection::from_entities("Member", vec![member("a", "x"), member("b", "y")]);
        let b = EntityCollection::from_entities("Member", vec![member("b", "y"), member("a", "x")]);
        let c = EntityCollection::from_entities("Member", vec![member("b", "y"), member("a", "z")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn serde_rebuilds_index() {
        let c = EntityCollection::from_entities("Member", vec![member("a", "x")]);
        let mut bytes = Vec::new();
        ciborium::into_writer(&c, &mut bytes).unwrap();
        let back: EntityCollection = ciborium::from_reader(bytes.as_slice()).unwrap();
        assert!(back.contains(&"a".into()));
        assert_eq!(back, c);
    }
}
