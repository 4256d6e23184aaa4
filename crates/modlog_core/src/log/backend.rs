//! Persistence of log entries.

use super::entry::LogEntry;
use super::query::LogQuery;
use crate::error::{ConflictDetails, ConflictKind, CoreError, CoreResult};
use crate::transaction::TransactionParticipant;
use crate::types::InstanceId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

/// Append-only table of log entries.
///
/// Conceptually keyed by entry id with lookup paths on
/// `(record_type, record_id, seq)` and `(instance_id, instance_seq)`.
pub trait LogBackend: Send + Sync {
    /// Appends an entry and returns it as stored.
    ///
    /// An entry whose `instance_seq` is 0 gets the next value for its
    /// `instance_id`, one past the highest ever issued. A non-zero
    /// `instance_seq` (a replayed entry) is stored as given. Fails with a
    /// log-collision conflict if an entry with the same
    /// `(seq, record_type, record_id)` exists, and with an invalid-operation
    /// error if the `(instance_id, instance_seq)` pair is taken.
    fn append(&self, entry: LogEntry) -> CoreResult<LogEntry>;

    /// Returns matching entries ordered by `instance_seq`, then append order.
    fn query(&self, query: &LogQuery) -> CoreResult<Vec<LogEntry>>;

    /// Counts matching entries, ignoring the query limit.
    fn count(&self, query: &LogQuery) -> CoreResult<usize>;

    /// Deletes entries matching `predicate`, returning how many were removed.
    ///
    /// Never lowers the `instance_seq` high-water marks.
    fn delete_where(&self, predicate: &dyn Fn(&LogEntry) -> bool) -> CoreResult<usize>;

    /// Highest `instance_seq` ever stored for `instance` (0 if none), even if
    /// that entry was deleted since.
    fn latest_instance_seq(&self, instance: Option<InstanceId>) -> CoreResult<u64>;
}

#[derive(Debug, Clone, Default)]
struct LogState {
    entries: Vec<LogEntry>,
    high_water: HashMap<Option<InstanceId>, u64>,
}

impl LogState {
    fn raise(&mut self, instance: Option<InstanceId>, instance_seq: u64) {
        let mark = self.high_water.entry(instance).or_insert(0);
        *mark = (*mark).max(instance_seq);
    }
}

/// In-memory [`LogBackend`] that takes part in transactions.
pub struct MemoryLogBackend {
    state: RwLock<LogState>,
    snapshot: Mutex<Option<LogState>>,
}

impl MemoryLogBackend {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::with_entries(Vec::new())
    }

    /// Creates a log holding previously persisted entries.
    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        let mut state = LogState::default();
        for entry in &entries {
            state.raise(entry.instance_id, entry.instance_seq);
        }
        state.entries = entries;
        Self {
            state: RwLock::new(state),
            snapshot: Mutex::new(None),
        }
    }

    /// Restores `instance_seq` high-water marks saved with
    /// [`high_water_marks`](Self::high_water_marks). Marks only ever rise.
    #[must_use]
    pub fn with_high_water_marks(
        self,
        marks: impl IntoIterator<Item = (Option<InstanceId>, u64)>,
    ) -> Self {
        {
            let mut state = self.state.write();
            for (instance, instance_seq) in marks {
                state.raise(instance, instance_seq);
            }
        }
        self
    }

    /// Highest `instance_seq` issued per instance, including pruned entries.
    pub fn high_water_marks(&self) -> Vec<(Option<InstanceId>, u64)> {
        let mut marks: Vec<_> = self
            .state
            .read()
            .high_water
            .iter()
            .map(|(instance, seq)| (*instance, *seq))
            .collect();
        marks.sort();
        marks
    }

    /// Returns every entry in append order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.state.read().entries.clone()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

impl Default for MemoryLogBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBackend for MemoryLogBackend {
    fn append(&self, mut entry: LogEntry) -> CoreResult<LogEntry> {
        let mut state = self.state.write();

        let taken = state.entries.iter().any(|e| {
            e.seq == entry.seq
                && e.record_type == entry.record_type
                && e.record_id == entry.record_id
        });
        if taken {
            return Err(CoreError::conflict(ConflictDetails {
                model: entry.record_type.clone(),
                record_id: Some(entry.record_id.clone()),
                kind: ConflictKind::LogCollision { seq: entry.seq },
            }));
        }

        if entry.instance_seq == 0 {
            let mark = state.high_water.get(&entry.instance_id).copied().unwrap_or(0);
            entry.instance_seq = mark + 1;
        } else if state.entries.iter().any(|e| {
            e.instance_id == entry.instance_id && e.instance_seq == entry.instance_seq
        }) {
            return Err(CoreError::invalid_operation(format!(
                "{} reuses instance_seq {}",
                entry.label(),
                entry.instance_seq
            )));
        }

        state.raise(entry.instance_id, entry.instance_seq);
        state.entries.push(entry.clone());
        Ok(entry)
    }

    fn query(&self, query: &LogQuery) -> CoreResult<Vec<LogEntry>> {
        let mut found: Vec<LogEntry> = self
            .state
            .read()
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.instance_seq);
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn count(&self, query: &LogQuery) -> CoreResult<usize> {
        Ok(self
            .state
            .read()
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .count())
    }

    fn delete_where(&self, predicate: &dyn Fn(&LogEntry) -> bool) -> CoreResult<usize> {
        let mut state = self.state.write();
        let before = state.entries.len();
        state.entries.retain(|e| !predicate(e));
        Ok(before - state.entries.len())
    }

    fn latest_instance_seq(&self, instance: Option<InstanceId>) -> CoreResult<u64> {
        Ok(self
            .state
            .read()
            .high_water
            .get(&instance)
            .copied()
            .unwrap_or(0))
    }
}

impl TransactionParticipant for MemoryLogBackend {
    fn participant_name(&self) -> &str {
        "modlog"
    }

    fn begin(&self) -> CoreResult<()> {
        *self.snapshot.lock() = Some(self.state.read().clone());
        Ok(())
    }

    fn commit(&self) -> CoreResult<()> {
        self.snapshot.lock().take();
        Ok(())
    }

    fn rollback(&self) {
        if let Some(saved) = self.snapshot.lock().take() {
            *self.state.write() = saved;
        }
    }
}

impl std::fmt::Debug for MemoryLogBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLogBackend")
            .field("entries", &self.len())
            .finish()
    }
}
