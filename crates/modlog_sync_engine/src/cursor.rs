//! Persisted replication cursor.

use crate::error::ReplicationResult;
use modlog_core::{CoreResult, TransactionParticipant};
use parking_lot::Mutex;

/// Stores the `instance_seq` of the last entry applied from the master.
///
/// The cursor takes part in the same transactions as the entity store and
/// log, so an entry and the cursor covering it commit or roll back together.
pub trait CursorStore: TransactionParticipant {
    /// Reads the committed cursor (0 before the first run).
    fn load(&self) -> ReplicationResult<u64>;

    /// Advances the cursor inside the current transaction.
    fn store(&self, cursor: u64) -> ReplicationResult<()>;
}

#[derive(Debug, Default)]
struct CursorState {
    value: u64,
    snapshot: Option<u64>,
}

/// In-memory cursor store.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    state: Mutex<CursorState>,
}

impl MemoryCursorStore {
    /// Creates a store at cursor 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store at a previously persisted cursor.
    pub fn with_cursor(cursor: u64) -> Self {
        Self {
            state: Mutex::new(CursorState {
                value: cursor,
                snapshot: None,
            }),
        }
    }

    /// The current value, committed or not.
    pub fn current(&self) -> u64 {
        self.state.lock().value
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> ReplicationResult<u64> {
        Ok(self.current())
    }

    fn store(&self, cursor: u64) -> ReplicationResult<()> {
        self.state.lock().value = cursor;
        Ok(())
    }
}

impl TransactionParticipant for MemoryCursorStore {
    fn participant_name(&self) -> &str {
        "replication-cursor"
    }

    fn begin(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.snapshot = Some(state.value);
        Ok(())
    }

    fn commit(&self) -> CoreResult<()> {
        self.state.lock().snapshot = None;
        Ok(())
    }

    fn rollback(&self) {
        let mut state = self.state.lock();
        if let Some(saved) = state.snapshot.take() {
            state.value = saved;
        }
    }
}
