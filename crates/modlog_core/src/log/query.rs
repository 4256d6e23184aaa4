//! Log entry filters.

use super::entry::{ChangeType, LogEntry};
use crate::types::{EntityId, InstanceId, ModelName, SequenceNumber, Timestamp};

/// Filter over log entries.
///
/// All criteria are optional and combined with AND. Results are ordered by
/// `instance_seq` ascending, ties broken by append order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Record type to match.
    pub record_type: Option<ModelName>,
    /// Record id to match.
    pub record_id: Option<EntityId>,
    /// Earliest modification time (inclusive).
    pub from: Option<Timestamp>,
    /// Latest modification time (inclusive).
    pub until: Option<Timestamp>,
    /// Lowest seq (exclusive).
    pub seq_after: Option<SequenceNumber>,
    /// Highest seq (inclusive).
    pub seq_up_to: Option<SequenceNumber>,
    /// Change type to match.
    pub change_type: Option<ChangeType>,
    /// Originating instance to match.
    pub instance_id: Option<InstanceId>,
    /// Lowest instance seq (exclusive).
    pub after_instance_seq: Option<u64>,
    /// Maximum number of entries.
    pub limit: Option<usize>,
}

impl LogQuery {
    /// Matches every entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries of one entity.
    pub fn for_record(record_type: impl Into<ModelName>, record_id: impl Into<EntityId>) -> Self {
        Self::new()
            .with_record_type(record_type)
            .with_record_id(record_id)
    }

    /// Restricts to a record type.
    #[must_use]
    pub fn with_record_type(mut self, record_type: impl Into<ModelName>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    /// Restricts to a record id.
    #[must_use]
    pub fn with_record_id(mut self, record_id: impl Into<EntityId>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Restricts to entries modified at or after `from`.
    #[must_use]
    pub fn with_from(mut self, from: Timestamp) -> Self {
        self.from = Some(from);
        self
    }

    /// Restricts to entries modified at or before `until`.
    #[must_use]
    pub fn with_until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    /// Restricts to `after < seq <= up_to`.
    #[must_use]
    pub fn with_seq_range(mut self, after: SequenceNumber, up_to: SequenceNumber) -> Self {
        self.seq_after = Some(after);
        self.seq_up_to = Some(up_to);
        self
    }

    /// Restricts to a change type.
    #[must_use]
    pub fn with_change_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = Some(change_type);
        self
    }

    /// Restricts to entries originating from `instance`.
    #[must_use]
    pub fn with_instance(mut self, instance: InstanceId) -> Self {
        self.instance_id = Some(instance);
        self
    }

    /// Restricts to `instance_seq > cursor`.
    #[must_use]
    pub fn with_after_instance_seq(mut self, cursor: u64) -> Self {
        self.after_instance_seq = Some(cursor);
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `entry` passes every criterion (the limit aside).
    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.record_type
            .as_ref()
            .map_or(true, |t| &entry.record_type == t)
            && self.record_id.as_ref().map_or(true, |id| &entry.record_id == id)
            && self.from.map_or(true, |t| entry.modification_time >= t)
            && self.until.map_or(true, |t| entry.modification_time <= t)
            && self.seq_after.map_or(true, |s| entry.seq > s)
            && self.seq_up_to.map_or(true, |s| entry.seq <= s)
            && self.change_type.map_or(true, |c| entry.change_type == c)
            && self.instance_id.map_or(true, |i| entry.instance_id == Some(i))
            && self
                .after_instance_seq
                .map_or(true, |c| entry.instance_seq > c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u64, change_type: ChangeType, time: Timestamp) -> LogEntry {
        LogEntry {
            id: format!("e-{seq}"),
            application_id: "Addressbook".into(),
            record_type: "Contact".into(),
            record_id: "c-1".into(),
            record_backend: "memory".into(),
            change_type,
            seq: SequenceNumber::new(seq),
            modification_time: time,
            modifier_account_id: None,
            payload: Vec::new(),
            instance_id: None,
            instance_seq: seq,
            client: None,
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(LogQuery::new().matches(&entry(1, ChangeType::Created, 0)));
    }

    #[test]
    fn seq_range_is_half_open() {
        let q = LogQuery::for_record("Contact", "c-1")
            .with_seq_range(SequenceNumber::new(5), SequenceNumber::new(7));
        assert!(!q.matches(&entry(5, ChangeType::Updated, 0)));
        assert!(q.matches(&entry(6, ChangeType::Updated, 0)));
        assert!(q.matches(&entry(7, ChangeType::Updated, 0)));
        assert!(!q.matches(&entry(8, ChangeType::Updated, 0)));
    }

    #[test]
    fn time_window_and_type() {
        let q = LogQuery::new()
            .with_from(10)
            .with_until(20)
            .with_change_type(ChangeType::Deleted);
        assert!(q.matches(&entry(1, ChangeType::Deleted, 15)));
        assert!(!q.matches(&entry(1, ChangeType::Updated, 15)));
        assert!(!q.matches(&entry(1, ChangeType::Deleted, 21)));
    }

    #[test]
    fn instance_filter_requires_stamp() {
        let instance = InstanceId::generate();
        let q = LogQuery::new().with_instance(instance);
        let mut e = entry(1, ChangeType::Created, 0);
        assert!(!q.matches(&e));
        e.instance_id = Some(instance);
        assert!(q.matches(&e));
    }
}
