//! Undo by replaying the log backwards.

use crate::context::WriteContext;
use crate::error::{CoreError, CoreResult};
use crate::log::{ChangeType, LogEntry, LogQuery};
use crate::service::EntityService;
use crate::diff::DiffValue;
use crate::types::{EntityId, ModelName, SequenceNumber};
use crate::value::FieldValue;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Options of an undo run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndoOptions {
    /// Revert updates even if the entity was modified afterwards.
    pub overwrite: bool,
    /// Report what would be undone without keeping any change.
    pub dry_run: bool,
}

impl UndoOptions {
    /// Sets the overwrite flag.
    #[must_use]
    pub const fn overwrite(mut self, value: bool) -> Self {
        self.overwrite = value;
        self
    }

    /// Sets the dry-run flag.
    #[must_use]
    pub const fn dry_run(mut self, value: bool) -> Self {
        self.dry_run = value;
        self
    }
}

/// Why an entry was not undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The entity changed after the entry; its seq is now `current`.
    ModifiedLater {
        /// Seq currently stored.
        current: SequenceNumber,
    },
    /// The entity no longer exists.
    Missing,
    /// The entity to recreate is already live.
    AlreadyPresent,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ModifiedLater { current } => write!(f, "modified later ({current})"),
            SkipReason::Missing => f.write_str("entity missing"),
            SkipReason::AlreadyPresent => f.write_str("entity already present"),
        }
    }
}

/// An entry left alone by an undo run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    /// Log entry id.
    pub entry_id: String,
    /// Entry label (`Model/id@seq:N`).
    pub label: String,
    /// Why it was skipped.
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Outcome of an undo run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UndoReport {
    /// Ids of undone entries, in processing order.
    pub undone: Vec<String>,
    /// Entries that were not undone.
    pub skipped: Vec<SkippedEntry>,
    /// Whether the run was rolled back.
    pub dry_run: bool,
}

/// Entities already rewound by this run: stored seq and the seq whose
/// state they now hold.
type Rewound = HashMap<(ModelName, EntityId), (SequenceNumber, SequenceNumber)>;

enum Flow {
    DryRun(UndoReport),
    Failed(CoreError),
}

impl From<CoreError> for Flow {
    fn from(e: CoreError) -> Self {
        Flow::Failed(e)
    }
}

/// Reverts the changes recorded by a set of log entries.
pub struct Undo<'a> {
    service: &'a EntityService,
}

impl<'a> Undo<'a> {
    /// Creates an undo runner over `service`.
    pub fn new(service: &'a EntityService) -> Self {
        Self { service }
    }

    /// Undoes every entry matching `query`, newest first.
    ///
    /// The whole run is one transaction. A dry run is rolled back at the
    /// end and must not be nested in another transaction.
    pub fn run(
        &self,
        query: &LogQuery,
        options: UndoOptions,
        ctx: &WriteContext,
    ) -> CoreResult<UndoReport> {
        let transactions = self.service.transactions();
        if options.dry_run && transactions.in_transaction() {
            return Err(CoreError::invalid_operation(
                "dry-run undo cannot join an open transaction",
            ));
        }

        let mut entries = self.service.log().query_range(query)?;
        entries.reverse();
        info!(entries = entries.len(), dry_run = options.dry_run, "undo started");

        let outcome = transactions.run(|| {
            let mut report = UndoReport {
                dry_run: options.dry_run,
                ..UndoReport::default()
            };
            let mut rewound = Rewound::new();
            for entry in &entries {
                match self.undo_entry(entry, options, ctx, &mut rewound)? {
                    None => report.undone.push(entry.id.clone()),
                    Some(reason) => {
                        debug!(entry = %entry.label(), %reason, "undo skipped");
                        report.skipped.push(SkippedEntry {
                            entry_id: entry.id.clone(),
                            label: entry.label(),
                            reason,
                        });
                    }
                }
            }
            if options.dry_run {
                Err(Flow::DryRun(report))
            } else {
                Ok(report)
            }
        });

        let report = match outcome {
            Ok(report) | Err(Flow::DryRun(report)) => report,
            Err(Flow::Failed(e)) => return Err(e),
        };
        info!(
            undone = report.undone.len(),
            skipped = report.skipped.len(),
            "undo finished"
        );
        Ok(report)
    }

    fn undo_entry(
        &self,
        entry: &LogEntry,
        options: UndoOptions,
        ctx: &WriteContext,
        rewound: &mut Rewound,
    ) -> CoreResult<Option<SkipReason>> {
        let service = self.service;
        let model = &entry.record_type;
        let id = &entry.record_id;
        let key = (model.clone(), id.clone());
        let diff = service.log().decode_diff(entry)?;
        let before_entry = SequenceNumber::new(entry.seq.as_u64().saturating_sub(1));

        match entry.change_type {
            ChangeType::Created => {
                if service.get(model, id)?.is_none() {
                    return Ok(Some(SkipReason::Missing));
                }
                service.delete(model, id, ctx)?;
            }
            ChangeType::Deleted => match service.store().load(model, id)? {
                Some(current) if current.is_deleted() => {
                    let restored = service.undelete(model, id, ctx)?;
                    rewound.insert(key, (restored.seq(), before_entry));
                }
                Some(_) => return Ok(Some(SkipReason::AlreadyPresent)),
                None => {
                    let restored =
                        service.create_at(diff.to_previous_entity(), entry.seq.next(), ctx)?;
                    rewound.insert(key, (restored.seq(), before_entry));
                }
            },
            ChangeType::Updated => {
                let Some(current) = service.get(model, id)? else {
                    return Ok(Some(SkipReason::Missing));
                };
                let effective = match rewound.get(&key) {
                    Some(&(stored, holds)) if stored == current.seq() => holds,
                    _ => current.seq(),
                };
                if !options.overwrite && effective != entry.seq {
                    return Ok(Some(SkipReason::ModifiedLater {
                        current: current.seq(),
                    }));
                }
                let mut reverted = current;
                diff.invert(&mut reverted);
                // null previous values must survive the update's patch fill
                for (field, value) in diff.previous() {
                    if matches!(value, DiffValue::Value(FieldValue::Null)) {
                        reverted.set(field.clone(), FieldValue::Null);
                    }
                }
                let stored = service.update(reverted, ctx)?;
                rewound.insert(key, (stored.seq(), before_entry));
            }
        }
        Ok(None)
    }
}
