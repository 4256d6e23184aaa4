//! Default handling of replicated log entries.

use modlog_core::{
    ChangeType, CoreError, CoreResult, Diff, EntityService, LogEntry, WriteContext,
};
use tracing::debug;

/// What applying one entry did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The entry changed the local store.
    Applied,
    /// The local store already reflects the entry.
    AlreadyApplied,
}

/// Applies entries of models that have no [`Replicable`](crate::Replicable)
/// hook.
///
/// Every branch compares the local seq with the entry's seq first, so an
/// entry that was applied before a crash is recognized and skipped when the
/// run is retried.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultApplier;

impl DefaultApplier {
    /// Creates the applier.
    pub fn new() -> Self {
        Self
    }

    /// Applies `entry`, whose payload decoded to `diff`.
    ///
    /// - `created`: creates the entity under the entry's id and seq, or
    ///   undeletes a soft-deleted one.
    /// - `updated`: applies the diff to the current entity and persists it.
    ///   Fails with `NotFound` if the entity is missing.
    /// - `deleted`: deletes the entity (soft or hard per its schema).
    pub fn apply(
        &self,
        service: &EntityService,
        entry: &LogEntry,
        diff: &Diff,
    ) -> CoreResult<ApplyOutcome> {
        let ctx = WriteContext {
            account_id: entry.modifier_account_id.clone(),
            client: entry.client.clone(),
        };
        let model = &entry.record_type;
        let id = &entry.record_id;
        let existing = service.store().load(model, id)?;

        let outcome = match entry.change_type {
            ChangeType::Created => match existing {
                Some(current) if current.is_deleted() && current.seq() < entry.seq => {
                    service.undelete(model, id, &ctx)?;
                    ApplyOutcome::Applied
                }
                Some(_) => ApplyOutcome::AlreadyApplied,
                None => {
                    let mut entity = diff.to_entity();
                    entity.set_id(id.clone());
                    service.create_at(entity, entry.seq, &ctx)?;
                    ApplyOutcome::Applied
                }
            },
            ChangeType::Updated => {
                let current = existing
                    .filter(|e| !e.is_deleted())
                    .ok_or_else(|| CoreError::not_found(model, id))?;
                if current.seq() >= entry.seq {
                    ApplyOutcome::AlreadyApplied
                } else {
                    let mut target = current.clone();
                    diff.apply(&mut target);
                    target.set_seq(current.seq());
                    service.update(target, &ctx)?;
                    ApplyOutcome::Applied
                }
            }
            ChangeType::Deleted => match existing {
                Some(current) if !current.is_deleted() => {
                    service.delete(model, id, &ctx)?;
                    ApplyOutcome::Applied
                }
                _ => ApplyOutcome::AlreadyApplied,
            },
        };

        debug!(entry = %entry.label(), outcome = ?outcome, "replicated entry applied");
        Ok(outcome)
    }
}
