//! Fleet-wide mutual exclusion for the pull loop.
//!
//! Acquisition never blocks: a replica that finds the lock taken skips the
//! run and tries again on its next schedule.

use crate::error::{ReplicationError, ReplicationResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A non-blocking lock shared by every replica process of a fleet.
pub trait ReplicationLock: Send + Sync {
    /// Name of the lock.
    fn name(&self) -> &str;

    /// Takes the lock if it is free. Returns false if someone holds it.
    fn try_lock(&self) -> ReplicationResult<bool>;

    /// Releases a lock taken by [`try_lock`](Self::try_lock).
    fn unlock(&self);
}

/// Holds a [`ReplicationLock`] until dropped.
pub struct LockGuard<'a> {
    lock: &'a dyn ReplicationLock,
}

impl<'a> LockGuard<'a> {
    /// Takes `lock`, or returns `None` if it is already held.
    pub fn acquire(lock: &'a dyn ReplicationLock) -> ReplicationResult<Option<Self>> {
        if lock.try_lock()? {
            debug!(lock = lock.name(), "replication lock acquired");
            Ok(Some(Self { lock }))
        } else {
            Ok(None)
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
        debug!(lock = self.lock.name(), "replication lock released");
    }
}

/// In-process lock. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct MemoryLock {
    name: String,
    held: Arc<AtomicBool>,
}

impl MemoryLock {
    /// Creates a free lock.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true if the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl ReplicationLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_lock(&self) -> ReplicationResult<bool> {
        Ok(self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    fn unlock(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

/// Advisory lock on a file, shared by every process that can see the path.
pub struct FileLock {
    name: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileLock {
    /// Creates a lock on `path`. The file is created on first acquisition.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
            file: Mutex::new(None),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReplicationLock for FileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_lock(&self) -> ReplicationResult<bool> {
        let mut slot = self.file.lock();
        if slot.is_some() {
            return Ok(false);
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|e| ReplicationError::lock(format!("open {}: {e}", self.name)))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                *slot = Some(file);
                Ok(true)
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(false),
            Err(e) => Err(ReplicationError::lock(format!("lock {}: {e}", self.name))),
        }
    }

    fn unlock(&self) {
        if let Some(file) = self.file.lock().take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(lock = %self.name, error = %e, "failed to release file lock");
            }
        }
    }
}
