//! Reference-counted transactions over registered participants.
//!
//! Every multi-step mutation (entity write plus log entry, or one replicated
//! entry plus its cursor) runs inside [`TransactionManager::run`]. Nested
//! calls on the same thread join the outer transaction; only the outermost
//! call begins, commits or rolls back.

use crate::error::{CoreError, CoreResult};
use parking_lot::{ReentrantMutex, RwLock};
use std::cell::Cell;
use std::sync::Arc;
use tracing::{debug, warn};

/// A resource taking part in transactions (entity store, log backend, cursor).
pub trait TransactionParticipant: Send + Sync {
    /// Name used in logs.
    fn participant_name(&self) -> &str;

    /// Starts tracking changes so they can be rolled back.
    fn begin(&self) -> CoreResult<()>;

    /// Makes tracked changes final.
    fn commit(&self) -> CoreResult<()>;

    /// Discards tracked changes.
    fn rollback(&self);
}

#[derive(Debug, Clone, Copy, Default)]
struct TxnState {
    depth: u32,
    rollback_only: bool,
}

/// Runs closures transactionally across all registered participants.
///
/// Only one thread can be inside a transaction at a time; the lock is
/// reentrant so nested calls on that thread share the outer transaction.
pub struct TransactionManager {
    writer: ReentrantMutex<Cell<TxnState>>,
    participants: RwLock<Vec<Arc<dyn TransactionParticipant>>>,
}

impl TransactionManager {
    /// Creates a manager with no participants.
    pub fn new() -> Self {
        Self {
            writer: ReentrantMutex::new(Cell::new(TxnState::default())),
            participants: RwLock::new(Vec::new()),
        }
    }

    /// Registers a participant. Takes effect from the next outermost begin.
    ///
    /// Registering the same participant twice is a no-op.
    pub fn register(&self, participant: Arc<dyn TransactionParticipant>) {
        let mut participants = self.participants.write();
        let ptr = Arc::as_ptr(&participant) as *const ();
        if participants.iter().any(|p| Arc::as_ptr(p) as *const () == ptr) {
            return;
        }
        participants.push(participant);
    }

    /// Number of registered participants.
    pub fn participant_count(&self) -> usize {
        self.participants.read().len()
    }

    /// Returns true if the calling thread is inside a transaction.
    pub fn in_transaction(&self) -> bool {
        self.writer
            .try_lock()
            .map(|state| state.get().depth > 0)
            .unwrap_or(false)
    }

    /// Runs `f` inside a transaction.
    ///
    /// The outermost call commits when `f` succeeds and rolls back when it
    /// fails. A failure inside a nested call marks the whole transaction
    /// rollback-only, so the outer commit turns into a rollback even if the
    /// outer closure swallowed the error.
    pub fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<CoreError>,
    {
        let state = self.writer.lock();
        let outer = state.get();

        if outer.depth == 0 {
            self.begin_all()?;
            state.set(TxnState {
                depth: 1,
                rollback_only: false,
            });
        } else {
            state.set(TxnState {
                depth: outer.depth + 1,
                ..outer
            });
        }

        let result = f();

        let inner = state.get();
        let rollback_only = inner.rollback_only || result.is_err();
        state.set(TxnState {
            depth: inner.depth - 1,
            rollback_only,
        });

        if inner.depth > 1 {
            return result;
        }

        state.set(TxnState::default());
        match result {
            Ok(_) if rollback_only => {
                self.rollback_all();
                Err(CoreError::transaction_aborted("nested operation failed").into())
            }
            Ok(value) => match self.commit_all() {
                Ok(()) => Ok(value),
                Err(e) => {
                    self.rollback_all();
                    Err(e.into())
                }
            },
            Err(e) => {
                self.rollback_all();
                Err(e)
            }
        }
    }

    fn begin_all(&self) -> CoreResult<()> {
        let participants = self.participants.read();
        for (started, participant) in participants.iter().enumerate() {
            if let Err(e) = participant.begin() {
                for p in participants.iter().take(started) {
                    p.rollback();
                }
                return Err(e);
            }
        }
        debug!(participants = participants.len(), "transaction started");
        Ok(())
    }

    fn commit_all(&self) -> CoreResult<()> {
        for participant in self.participants.read().iter() {
            participant.commit()?;
        }
        debug!("transaction committed");
        Ok(())
    }

    fn rollback_all(&self) {
        for participant in self.participants.read().iter() {
            participant.rollback();
        }
        warn!("transaction rolled back");
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("participants", &self.participant_count())
            .finish()
    }
}
