//! Property tests for diffs, collections, sequence counting and merging.

use modlog_core::{
    ChangeType, CollectionDiff, Diff, Entity, EntityCollection, EntityId, FieldValue, LogQuery, ModelName, OmitFields,
};
use modlog_testkit::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Rename(String),
    ToggleDeleted,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => "[A-Z][a-z]{1,8}".prop_map(Op::Rename),
        1 => Just(Op::ToggleDeleted),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn seq_counts_mutations(ops in prop::collection::vec(op_strategy(), 0..12)) {
        let node = TestNode::new();
        let ctx = test_context();
        let model = ModelName::new("Contact");
        let created = node.create_contact("Start");
        let id = created.id().cloned().unwrap();

        let mut mutations = 1u64;
        let mut deleted = false;
        let mut last_name = "Start".to_string();
        for op in ops {
            match op {
                Op::Rename(name) if !deleted => {
                    let current = node.fetch("Contact", &id);
                    node.service.update(current.with_field("name", name.as_str()), &ctx).unwrap();
                    if name != last_name {
                        mutations += 1;
                        last_name = name;
                    }
                }
                Op::Rename(_) => {}
                Op::ToggleDeleted if deleted => {
                    node.service.undelete(&model, &id, &ctx).unwrap();
                    deleted = false;
                    mutations += 1;
                }
                Op::ToggleDeleted => {
                    node.service.delete(&model, &id, &ctx).unwrap();
                    deleted = true;
                    mutations += 1;
                }
            }
        }

        let stored = node.store.all().into_iter().find(|e| e.id() == Some(&id)).unwrap();
        prop_assert_eq!(stored.seq().as_u64(), mutations);

        let logged = node.log.query_range(&LogQuery::for_record(model, id)).unwrap();
        prop_assert_eq!(logged.len() as u64, mutations);
        prop_assert_eq!(logged[0].change_type, ChangeType::Created);
    }

    #[test]
    fn diff_of_identical_snapshots_is_empty(contact in contact_strategy()) {
        let schemas = crm_schemas();
        let diff = Diff::compute(&schemas, Some(&contact), Some(&contact), &OmitFields::new()).unwrap();
        prop_assert!(diff.is_empty());
    }

    #[test]
    fn invert_restores_old_scalars(old in contact_strategy(), new in contact_strategy()) {
        let schemas = crm_schemas();
        let diff = Diff::compute(&schemas, Some(&old), Some(&new), &OmitFields::new()).unwrap();
        let mut reverted = new.clone();
        diff.invert(&mut reverted);
        prop_assert_eq!(reverted, old);
    }

    #[test]
    fn apply_diff_reaches_target(a in member_collection_strategy(), b in member_collection_strategy()) {
        let schemas = crm_schemas();
        let cd = a.diff(&b, &schemas).unwrap();
        let mut applied = a.clone();
        prop_assert_eq!(applied.apply_diff(&cd), 0);
        prop_assert_eq!(applied, b);
    }

    #[test]
    fn disjoint_edits_merge((client_fields, concurrent_fields) in disjoint_fields_strategy()) {
        let node = TestNode::new();
        let ctx = test_context();
        let mut base = Entity::new("Contact");
        for field in ["name", "email", "phone", "tags"] {
            base.set(field, format!("base-{field}"));
        }
        let base = node.service.create(base, &ctx).unwrap();

        let mut theirs = base.clone();
        for field in &concurrent_fields {
            theirs.set(*field, format!("theirs-{field}"));
        }
        node.service.update(theirs, &ctx).unwrap();

        let mut mine = base.clone();
        for field in &client_fields {
            mine.set(*field, format!("mine-{field}"));
        }
        let merged = node.service.update(mine, &ctx).unwrap();

        for field in &client_fields {
            prop_assert_eq!(merged.get(field), Some(&FieldValue::Text(format!("mine-{field}"))));
        }
        for field in &concurrent_fields {
            prop_assert_eq!(merged.get(field), Some(&FieldValue::Text(format!("theirs-{field}"))));
        }
    }

    #[test]
    fn competing_edits_conflict(field in prop::sample::select(vec!["name", "email", "phone", "tags"])) {
        let node = TestNode::new();
        let ctx = test_context();
        let base = node
            .service
            .create(Entity::new("Contact").with_field(field, "original"), &ctx)
            .unwrap();
        node.service.update(base.clone().with_field(field, "theirs"), &ctx).unwrap();

        let err = node.service.update(base.with_field(field, "mine"), &ctx).unwrap_err();
        prop_assert!(err.is_conflict());
    }
}

#[test]
fn abc_against_bcd() {
    let schemas = crm_schemas();
    let a = EntityCollection::from_entities(
        "Member",
        vec![member("A", "user"), member("B", "user"), member("C", "user")],
    );
    let b = EntityCollection::from_entities(
        "Member",
        vec![member("B", "user"), member("C", "user"), member("D", "user")],
    );
    let cd = CollectionDiff::compute(&a, &b, &schemas).unwrap();
    assert_eq!(cd.added().ids(), vec![EntityId::from("D")]);
    assert_eq!(cd.removed().ids(), vec![EntityId::from("A")]);
    assert!(cd.modified().is_empty());
}
