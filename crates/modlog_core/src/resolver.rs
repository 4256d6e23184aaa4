//! Optimistic concurrency resolution.
//!
//! No locks are held between a client reading an entity and submitting
//! its update. When the submitted seq is behind the stored one, the
//! resolver folds the intervening log entries into one diff and merges it
//! into the submission field by field:
//!
//! 1. field not set by the client: adopt the concurrent value
//! 2. client value equals the value before the concurrent edits: adopt
//! 3. client value equals the concurrent value: already in agreement
//! 4. both sides are collections: merge member by member
//! 5. anything else is an unresolvable [`ConcurrencyConflict`]
//!
//! [`ConcurrencyConflict`]: crate::error::CoreError::ConcurrencyConflict

use crate::collection::EntityCollection;
use crate::diff::{CollectionDiff, Diff, DiffValue};
use crate::entity::Entity;
use crate::error::{ConflictDetails, ConflictKind, CoreError, CoreResult};
use crate::log::ModificationLogStore;
use crate::value::FieldValue;
use tracing::debug;

/// What the resolver did to a client submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Fields taken over from the concurrent edits.
    pub adopted: Vec<String>,
    /// Fields the client had already set to the concurrent value.
    pub agreed: Vec<String>,
    /// Collection fields merged member by member.
    pub merged: Vec<String>,
}

impl Resolution {
    /// Returns true if no concurrent change was found.
    pub fn is_uncontended(&self) -> bool {
        self.adopted.is_empty() && self.agreed.is_empty() && self.merged.is_empty()
    }
}

/// Detects and merges concurrent edits using the modification log.
pub struct ConcurrencyResolver<'a> {
    log: &'a ModificationLogStore,
}

impl<'a> ConcurrencyResolver<'a> {
    /// Creates a resolver reading from `log`.
    pub fn new(log: &'a ModificationLogStore) -> Self {
        Self { log }
    }

    /// Merges concurrent edits recorded since `client.seq()` into `client`.
    ///
    /// On success `client` holds the merged submission; its seq is left
    /// untouched for the caller to set. On conflict `client` may be
    /// partially merged and must be discarded.
    pub fn resolve(&self, client: &mut Entity, server: &Entity) -> CoreResult<Resolution> {
        if client.seq() == server.seq() {
            return Ok(Resolution::default());
        }

        let id = server
            .id()
            .cloned()
            .ok_or_else(|| CoreError::validation("server entity has no id"))?;
        if client.seq() > server.seq() {
            return Err(CoreError::conflict(ConflictDetails {
                model: server.model().clone(),
                record_id: Some(id),
                kind: ConflictKind::StaleWrite {
                    expected: client.seq(),
                    actual: server.seq(),
                },
            }));
        }

        let entries = self
            .log
            .updates_between(server.model(), &id, client.seq(), server.seq())?;
        let Some(concurrent) = self.log.aggregate_diff(&entries)? else {
            debug!(model = %server.model(), id = %id, "no logged concurrent updates");
            return Ok(Resolution::default());
        };

        debug!(
            model = %server.model(),
            id = %id,
            client_seq = client.seq().as_u64(),
            server_seq = server.seq().as_u64(),
            entries = entries.len(),
            "resolving concurrent update"
        );
        merge_fields(client, &concurrent, Some(server))
    }
}

/// Merges `concurrent` into `client`.
///
/// Adopted values come from `server` when given, otherwise from the
/// diff's changed side (collection members have no stored copy of their own).
fn merge_fields(
    client: &mut Entity,
    concurrent: &Diff,
    server: Option<&Entity>,
) -> CoreResult<Resolution> {
    let mut resolution = Resolution::default();

    for (field, changed) in concurrent.changed() {
        let previous = concurrent.previous().get(field);
        let client_value = client.get(field);

        let untouched =
            client_value.is_none() || previous.is_some_and(|p| p.matches(client_value));
        if untouched {
            adopt(client, concurrent, server, field);
            resolution.adopted.push(field.clone());
            continue;
        }

        if changed.matches(client_value) {
            resolution.agreed.push(field.clone());
            continue;
        }

        if let DiffValue::Collection(cd) = changed {
            if let Some(members) = client
                .get_mut(field)
                .and_then(FieldValue::as_collection_mut)
            {
                merge_collection(members, cd, field)?;
                resolution.merged.push(field.clone());
                continue;
            }
        }

        return Err(CoreError::conflict(ConflictDetails {
            model: client.model().clone(),
            record_id: client.id().cloned(),
            kind: ConflictKind::Field {
                field: field.clone(),
                client_value: client.get(field).cloned(),
                concurrent_previous: previous.cloned(),
                concurrent_changed: Some(changed.clone()),
            },
        }));
    }

    Ok(resolution)
}

fn adopt(client: &mut Entity, concurrent: &Diff, server: Option<&Entity>, field: &str) {
    match server {
        Some(server) => match server.get(field) {
            Some(value) => client.set(field, value.clone()),
            None => {
                client.unset(field);
            }
        },
        None => {
            concurrent.apply_field(client, field);
        }
    }
}

fn merge_collection(
    members: &mut EntityCollection,
    concurrent: &CollectionDiff,
    field: &str,
) -> CoreResult<()> {
    for added in concurrent.added().iter() {
        let present = match added.id() {
            Some(id) => members.contains(id),
            None => members
                .idless()
                .any(|m| m.fields().eq(added.fields())),
        };
        if !present {
            members.add(added.clone());
        }
    }

    for removed in concurrent.removed().iter() {
        if let Some(id) = removed.id() {
            members.remove(id);
        }
    }

    for modified in concurrent.modified() {
        let Some(id) = modified.record_id() else {
            continue;
        };
        let Some(member) = members.get_mut(id) else {
            // removed on the client side; the removal wins
            debug!(field, member = %id, "concurrently modified member was removed by client");
            continue;
        };
        if !member.seq().is_set() {
            return Err(CoreError::conflict(ConflictDetails {
                model: member.model().clone(),
                record_id: Some(id.clone()),
                kind: ConflictKind::Unversioned {
                    field: field.to_string(),
                },
            }));
        }
        if modified.seq().is_some_and(|seq| member.seq() >= seq) {
            continue;
        }

        merge_fields(member, modified, None)?;
        if let Some(seq) = modified.seq() {
            if seq > member.seq() {
                member.set_seq(seq);
            }
        }
    }

    Ok(())
}
