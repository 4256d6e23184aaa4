//! Property-based test generators using proptest.
//!
//! Generated entities never hold explicit nulls: an absent field and a null
//! field compare equal for diffing, so round trips are checked on set
//! fields only.

use modlog_core::{Entity, EntityCollection, FieldValue};
use proptest::prelude::*;

/// Strategy for plain (non-collection) field values.
pub fn scalar_value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Integer),
        "[a-z ]{0,12}".prop_map(FieldValue::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(FieldValue::Bytes),
    ]
}

/// Strategy for contacts with id `c-1` and a random subset of fields set.
pub fn contact_strategy() -> impl Strategy<Value = Entity> {
    (
        prop::option::of(scalar_value_strategy()),
        prop::option::of(scalar_value_strategy()),
        prop::option::of(scalar_value_strategy()),
        prop::option::of(scalar_value_strategy()),
    )
        .prop_map(|(name, email, phone, tags)| {
            let mut entity = Entity::new("Contact").with_id("c-1").with_seq(1);
            for (field, value) in [("name", name), ("email", email), ("phone", phone), ("tags", tags)] {
                if let Some(value) = value {
                    entity.set(field, value);
                }
            }
            entity
        })
}

/// Strategy for member collections drawn from a pool of eight ids.
pub fn member_collection_strategy() -> impl Strategy<Value = EntityCollection> {
    prop::collection::btree_map(0u8..8, "(admin|user|guest)", 0..8).prop_map(|members| {
        EntityCollection::from_entities(
            "Member",
            members.into_iter().map(|(n, role)| {
                Entity::new("Member")
                    .with_id(format!("m-{n}"))
                    .with_seq(1)
                    .with_field("contact", format!("c-{n}"))
                    .with_field("role", role)
            }),
        )
    })
}

/// Strategy for disjoint pairs of contact fields: (client fields, concurrent fields).
pub fn disjoint_fields_strategy() -> impl Strategy<Value = (Vec<&'static str>, Vec<&'static str>)> {
    const FIELDS: [&str; 4] = ["name", "email", "phone", "tags"];
    prop::collection::vec(prop::bool::ANY, 4).prop_map(|mask| {
        let mut client = Vec::new();
        let mut concurrent = Vec::new();
        for (field, to_client) in FIELDS.iter().zip(mask) {
            if to_client {
                client.push(*field);
            } else {
                concurrent.push(*field);
            }
        }
        (client, concurrent)
    })
}
