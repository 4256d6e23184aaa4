use super::Diff;
use crate::collection::EntityCollection;
use crate::error::{CoreError, CoreResult};
use crate::schema::{OmitFields, SchemaRegistry};
use crate::types::ModelName;
use serde::{Deserialize, Serialize};

/// Added, removed and modified members between two collections of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDiff {
    pub(crate) model: ModelName,
    pub(crate) added: EntityCollection,
    pub(crate) removed: EntityCollection,
    pub(crate) modified: Vec<Diff>,
}

impl CollectionDiff {
    /// Compares `a` (before) with `b` (after).
    ///
    /// Id-less members of `a` count as removed and id-less members of `b`
    /// as added. Member diffs that turn out empty are dropped.
    pub fn compute(
        a: &EntityCollection,
        b: &EntityCollection,
        registry: &SchemaRegistry,
    ) -> CoreResult<CollectionDiff> {
        if a.model() != b.model() {
            return Err(CoreError::validation(format!(
                "cannot diff collection of {} against {}",
                a.model(),
                b.model()
            )));
        }

        let model = a.model().clone();
        let removed = a.filter(|m| m.id().map_or(true, |id| !b.contains(id)));
        let added = b.filter(|m| m.id().map_or(true, |id| !a.contains(id)));

        let no_omit = OmitFields::new();
        let mut modified = Vec::new();
        for before in a.iter() {
            let Some(after) = before.id().and_then(|id| b.get(id)) else {
                continue;
            };
            let diff = Diff::compute(registry, Some(before), Some(after), &no_omit)?;
            if !diff.is_empty() {
                modified.push(diff);
            }
        }

        Ok(CollectionDiff {
            model,
            added,
            removed,
            modified,
        })
    }

    /// Member model.
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    /// Members present only on the new side.
    pub fn added(&self) -> &EntityCollection {
        &self.added
    }

    /// Members present only on the old side.
    pub fn removed(&self) -> &EntityCollection {
        &self.removed
    }

    /// Non-empty diffs of members present on both sides.
    pub fn modified(&self) -> &[Diff] {
        &self.modified
    }

    /// Returns true if nothing was added, removed or modified.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Folds a later diff of the same collection into this one.
    ///
    /// A member added here and removed later drops out of both sides. Later
    /// changes to a member added here are applied to the added copy, and
    /// member diffs of the same id are folded with [`Diff::merge`].
    pub fn merge(&mut self, later: &CollectionDiff) {
        for removed in later.removed.iter() {
            match removed.id() {
                Some(id) => {
                    if self.added.remove(id).is_some() {
                        continue;
                    }
                    self.modified.retain(|d| d.record_id.as_ref() != Some(id));
                }
                None => {
                    if self.added.remove_idless(removed) {
                        continue;
                    }
                }
            }
            self.removed.add(removed.clone());
        }

        for modified in &later.modified {
            let Some(id) = modified.record_id.as_ref() else {
                continue;
            };
            if let Some(member) = self.added.get_mut(id) {
                modified.apply(member);
                continue;
            }
            match self
                .modified
                .iter_mut()
                .find(|d| d.record_id.as_ref() == Some(id))
            {
                Some(earlier) => earlier.merge(modified),
                None => self.modified.push(modified.clone()),
            }
        }

        for added in later.added.iter() {
            // re-added after an earlier removal: the add replaces it in place
            if let Some(id) = added.id() {
                self.removed.remove(id);
            }
            self.added.add(added.clone());
        }
    }

    /// Applies the diff to `target`, returning the number of skipped targets.
    pub fn apply(&self, target: &mut EntityCollection) -> usize {
        target.apply_diff(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::schema::{FieldDescriptor, ModelSchema};
    use crate::types::EntityId;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().with(
            ModelSchema::new("Member", "Addressbook")
                .field(FieldDescriptor::scalar("role"))
                .field(FieldDescriptor::scalar("joined").omitted()),
        )
    }

    fn members(ids: &[&str]) -> EntityCollection {
        EntityCollection::from_entities(
            "Member",
            ids.iter()
                .map(|id| Entity::new("Member").with_id(*id).with_field("role", "user")),
        )
    }

    #[test]
    fn abc_against_bcd() {
        let cd = CollectionDiff::compute(&members(&["A", "B", "C"]), &members(&["B", "C", "D"]), &registry())
            .unwrap();
        assert_eq!(cd.added().ids(), vec![EntityId::from("D")]);
        assert_eq!(cd.removed().ids(), vec![EntityId::from("A")]);
        assert!(cd.modified().is_empty());
    }

    #[test]
    fn unchanged_members_are_not_modified() {
        let a = members(&["A"]);
        let mut b = members(&["A"]);
        if let Some(m) = b.get_mut(&"A".into()) {
            m.set("joined", 2024_i64);
        }
        let cd = CollectionDiff::compute(&a, &b, &registry()).unwrap();
        assert!(cd.is_empty());
    }

    #[test]
    fn idless_members_always_differ() {
        let mut a = members(&["A"]);
        a.add(Entity::new("Member").with_field("role", "draft"));
        let mut b = members(&["A"]);
        b.add(Entity::new("Member").with_field("role", "draft"));

        let cd = CollectionDiff::compute(&a, &b, &registry()).unwrap();
        assert_eq!(cd.added().len(), 1);
        assert_eq!(cd.removed().len(), 1);

        let mut applied = a.clone();
        assert_eq!(cd.apply(&mut applied), 0);
        assert_eq!(applied, b);
    }

    #[test]
    fn missing_targets_are_counted() {
        let cd = CollectionDiff::compute(&members(&["A", "B"]), &members(&["B"]), &registry()).unwrap();
        let mut unrelated = members(&["X"]);
        assert_eq!(cd.apply(&mut unrelated), 1);
        assert_eq!(unrelated.ids(), vec![EntityId::from("X")]);
    }

    #[test]
    fn merge_composes_successive_edits() {
        let registry = registry();
        let v1 = members(&["A", "B"]);
        let v2 = members(&["A", "B", "C"]);
        let mut v3 = members(&["B", "D"]);
        if let Some(m) = v3.get_mut(&"B".into()) {
            m.set("role", "admin");
        }
        let mut v4 = members(&["B", "D", "E"]);
        if let Some(m) = v4.get_mut(&"B".into()) {
            m.set("role", "admin");
        }
        // C comes and goes within the folded range
        let mut v2_to_v3 = CollectionDiff::compute(&v2, &v3, &registry).unwrap();
        v2_to_v3.merge(&CollectionDiff::compute(&v3, &v4, &registry).unwrap());
        let mut folded = CollectionDiff::compute(&v1, &v2, &registry).unwrap();
        folded.merge(&v2_to_v3);

        let mut added = folded.added().ids();
        added.sort();
        assert_eq!(added, vec![EntityId::from("D"), EntityId::from("E")]);
        assert_eq!(folded.removed().ids(), vec![EntityId::from("A")]);
        assert_eq!(folded.modified().len(), 1);

        let mut replayed = v1.clone();
        assert_eq!(folded.apply(&mut replayed), 0);
        assert_eq!(replayed, v4);
    }

    #[test]
    fn merge_keeps_readded_member() {
        let registry = registry();
        let v1 = members(&["A"]);
        let v2 = members(&[]);
        let mut v3 = members(&["A"]);
        if let Some(m) = v3.get_mut(&"A".into()) {
            m.set("role", "admin");
        }
        let mut folded = CollectionDiff::compute(&v1, &v2, &registry).unwrap();
        folded.merge(&CollectionDiff::compute(&v2, &v3, &registry).unwrap());

        assert!(folded.removed().is_empty());
        let mut replayed = v1.clone();
        folded.apply(&mut replayed);
        assert_eq!(replayed, v3);
    }

    #[test]
    fn model_mismatch_is_rejected() {
        let other = EntityCollection::new("Contact");
        assert!(CollectionDiff::compute(&members(&["A"]), &other, &registry()).is_err());
    }
}
