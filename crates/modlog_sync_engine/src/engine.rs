//! Replication engine state machine.

use crate::applier::{ApplyOutcome, DefaultApplier};
use crate::config::ReplicationConfig;
use crate::cursor::CursorStore;
use crate::error::{ReplicationError, ReplicationResult};
use crate::hooks::{HookOutcome, HookRegistry, Replicable};
use crate::lock::{LockGuard, MemoryLock, ReplicationLock};
use crate::notify::{LogNotifier, Notification, Notifier};
use crate::transport::ReplicationTransport;
use modlog_core::{CoreError, EntityService, InstanceId, LogEntry};
use modlog_sync_protocol::{HandshakeRequest, ProtocolError, PullRequest, PullResponse};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationState {
    /// Engine is idle, not replicating.
    Idle,
    /// Engine is authenticating to the master.
    Connecting,
    /// Engine is fetching a batch.
    Pulling,
    /// Engine is applying entries.
    Applying,
    /// Engine has completed a run.
    Synced,
    /// The last run failed.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl ReplicationState {
    /// Returns true if a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReplicationState::Connecting | ReplicationState::Pulling | ReplicationState::Applying
        )
    }

    /// Returns true if the engine can start a new run.
    pub fn can_start_run(&self) -> bool {
        !self.is_active()
    }
}

/// Statistics about replication runs.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    /// Runs that completed without error.
    pub runs_completed: u64,
    /// Runs skipped because another puller held the lock.
    pub runs_skipped: u64,
    /// Runs that failed.
    pub runs_failed: u64,
    /// Entries that changed the local store.
    pub entries_applied: u64,
    /// Entries found already applied.
    pub entries_skipped: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Cursor after the last run.
    pub cursor: u64,
    /// When the last run finished.
    pub last_run_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a replication run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRun {
    /// False if another puller held the lock and nothing was done.
    pub lock_acquired: bool,
    /// Entries that changed the local store.
    pub applied: u64,
    /// Entries found already applied.
    pub skipped: u64,
    /// Cursor after the run.
    pub cursor: u64,
    /// Whether the master has entries past the fetched batch.
    pub has_more: bool,
    /// Master's latest `instance_seq` at handshake time.
    pub master_latest: u64,
}

impl ReplicationRun {
    fn lock_held(cursor: u64) -> Self {
        Self {
            lock_acquired: false,
            applied: 0,
            skipped: 0,
            cursor,
            has_more: false,
            master_latest: 0,
        }
    }
}

/// Pulls log entries from a master and applies them locally.
///
/// Each run takes the fleet-wide lock, authenticates, fetches one batch
/// after the persisted cursor and applies it entry by entry. Every entry
/// runs in its own transaction together with the cursor update, so a
/// failure leaves the cursor on the last committed entry.
pub struct ReplicationEngine<T: ReplicationTransport> {
    config: ReplicationConfig,
    service: Arc<EntityService>,
    transport: Arc<T>,
    cursor: Arc<dyn CursorStore>,
    lock: Arc<dyn ReplicationLock>,
    hooks: HookRegistry,
    applier: DefaultApplier,
    notifier: Arc<dyn Notifier>,
    state: RwLock<ReplicationState>,
    stats: RwLock<ReplicationStats>,
    cancelled: AtomicBool,
}

impl<T: ReplicationTransport> ReplicationEngine<T> {
    /// Creates an engine.
    ///
    /// The cursor store is registered with the service's transaction
    /// manager so it commits and rolls back with applied entries.
    pub fn new<C: CursorStore + 'static>(
        config: ReplicationConfig,
        service: Arc<EntityService>,
        transport: T,
        cursor: Arc<C>,
    ) -> Self {
        service.transactions().register(cursor.clone());
        let lock = MemoryLock::new(config.lock_name.clone());
        Self {
            config,
            service,
            transport: Arc::new(transport),
            cursor,
            lock: Arc::new(lock),
            hooks: HookRegistry::new(),
            applier: DefaultApplier::new(),
            notifier: Arc::new(LogNotifier),
            state: RwLock::new(ReplicationState::Idle),
            stats: RwLock::new(ReplicationStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Replaces the default in-process lock.
    pub fn with_lock<L: ReplicationLock + 'static>(mut self, lock: L) -> Self {
        self.lock = Arc::new(lock);
        self
    }

    /// Replaces the default tracing notifier.
    pub fn with_notifier<N: Notifier + 'static>(mut self, notifier: Arc<N>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Registers a domain hook.
    pub fn with_hook(mut self, hook: Arc<dyn Replicable>) -> Self {
        self.hooks.register(hook);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> ReplicationState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ReplicationStats {
        self.stats.read().clone()
    }

    /// The committed cursor.
    pub fn cursor(&self) -> ReplicationResult<u64> {
        self.cursor.load()
    }

    /// Stops the current run at the next entry boundary.
    ///
    /// Stays in effect until [`reset_cancel`](Self::reset_cancel).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> ReplicationResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(ReplicationError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: ReplicationState) {
        *self.state.write() = state;
    }

    /// Performs one run: at most one batch of `batch_limit` entries.
    ///
    /// Returns a run with `lock_acquired == false` if another puller holds
    /// the lock.
    pub fn run_once(&self) -> ReplicationResult<ReplicationRun> {
        let state = self.state();
        if !state.can_start_run() {
            return Err(ReplicationError::InvalidStateTransition {
                from: format!("{state:?}"),
                to: "run".into(),
            });
        }

        let Some(_guard) = LockGuard::acquire(self.lock.as_ref())? else {
            let cursor = self.cursor.load()?;
            info!(lock = self.lock.name(), cursor, "replication lock held elsewhere, skipping run");
            self.stats.write().runs_skipped += 1;
            return Ok(ReplicationRun::lock_held(cursor));
        };

        match self.run_locked() {
            Ok(run) => {
                self.set_state(ReplicationState::Synced);
                let mut stats = self.stats.write();
                stats.runs_completed += 1;
                stats.cursor = run.cursor;
                stats.last_run_time = Some(Instant::now());
                stats.last_error = None;
                info!(
                    applied = run.applied,
                    skipped = run.skipped,
                    cursor = run.cursor,
                    has_more = run.has_more,
                    "replication run finished"
                );
                Ok(run)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Runs until the master reports no more entries.
    ///
    /// Stops early if the lock is held elsewhere or a run makes no
    /// progress. The returned run sums the counts of every run.
    pub fn run_until_caught_up(&self) -> ReplicationResult<ReplicationRun> {
        let mut total = self.run_once()?;
        while total.lock_acquired && total.has_more {
            let before = total.cursor;
            let run = self.run_once()?;
            total.applied += run.applied;
            total.skipped += run.skipped;
            total.cursor = run.cursor;
            total.has_more = run.has_more;
            total.master_latest = run.master_latest;
            if !run.lock_acquired || run.cursor == before {
                break;
            }
        }
        Ok(total)
    }

    /// Performs a run, retrying retryable failures with backoff.
    pub fn run_with_retry(&self) -> ReplicationResult<ReplicationRun> {
        self.retrying(|| self.run_once())
    }

    /// Catches up, then repeats every `sync_interval` until cancelled.
    ///
    /// Failed runs are logged and retried on the next round from the same
    /// cursor. Without an interval a single round is made.
    pub fn run_scheduled(&self) -> ReplicationResult<ReplicationStats> {
        loop {
            self.check_cancelled()?;
            if let Err(e) = self.retrying(|| self.run_until_caught_up()) {
                if matches!(e, ReplicationError::Cancelled) {
                    return Err(e);
                }
                warn!(error = %e, "scheduled replication round failed");
            }

            let Some(interval) = self.config.sync_interval else {
                return Ok(self.stats());
            };
            self.sleep_unless_cancelled(interval)?;
        }
    }

    fn retrying<F>(&self, mut run: F) -> ReplicationResult<ReplicationRun>
    where
        F: FnMut() -> ReplicationResult<ReplicationRun>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                self.set_state(ReplicationState::RetryWait);
                let delay = retry.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying replication");
                std::thread::sleep(delay);
                self.stats.write().retries += 1;
            }

            self.check_cancelled()?;
            match run() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    warn!(attempt, error = %e, "replication run failed, will retry");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn sleep_unless_cancelled(&self, interval: Duration) -> ReplicationResult<()> {
        let step = Duration::from_millis(50).min(interval);
        let deadline = Instant::now() + interval;
        while Instant::now() < deadline {
            self.check_cancelled()?;
            std::thread::sleep(step);
        }
        Ok(())
    }

    fn run_locked(&self) -> ReplicationResult<ReplicationRun> {
        self.check_cancelled()?;
        let cursor = self.cursor.load()?;

        self.set_state(ReplicationState::Connecting);
        let (master, master_latest) = self.handshake(cursor)?;
        self.check_cancelled()?;

        self.set_state(ReplicationState::Pulling);
        let request = PullRequest::new(self.config.instance_id, cursor, self.config.batch_limit);
        let batch = self.transport.pull(&request)?;
        check_batch(&batch, master, cursor)?;
        debug!(
            cursor,
            entries = batch.entries.len(),
            has_more = batch.has_more,
            "pulled replication batch"
        );

        self.set_state(ReplicationState::Applying);
        let mut run = ReplicationRun {
            lock_acquired: true,
            applied: 0,
            skipped: 0,
            cursor,
            has_more: batch.has_more,
            master_latest,
        };
        for entry in &batch.entries {
            self.check_cancelled()?;
            let outcome = self
                .apply_entry(entry)
                .map_err(|e| ReplicationError::apply(&entry.label(), e))?;

            run.cursor = entry.instance_seq;
            let mut stats = self.stats.write();
            stats.cursor = run.cursor;
            match outcome {
                ApplyOutcome::Applied => {
                    run.applied += 1;
                    stats.entries_applied += 1;
                }
                ApplyOutcome::AlreadyApplied => {
                    run.skipped += 1;
                    stats.entries_skipped += 1;
                }
            }
        }
        Ok(run)
    }

    fn handshake(&self, cursor: u64) -> ReplicationResult<(InstanceId, u64)> {
        let mut request =
            HandshakeRequest::new(self.config.instance_id, self.config.auth_token.clone(), cursor);
        request.protocol_version = self.config.protocol_version;

        let response = self.transport.handshake(&request)?;
        if !response.success {
            return Err(ReplicationError::auth(
                response
                    .error
                    .unwrap_or_else(|| "handshake rejected".into()),
            ));
        }
        if response.protocol_version != self.config.protocol_version {
            return Err(ProtocolError::VersionMismatch {
                expected: self.config.protocol_version,
                actual: response.protocol_version,
            }
            .into());
        }
        let master = response
            .master_instance_id
            .ok_or_else(|| ReplicationError::transport_fatal("master did not send its instance id"))?;
        debug!(master = %master, latest = response.latest_instance_seq, "handshake accepted");
        Ok((master, response.latest_instance_seq))
    }

    /// Applies one entry and stores the cursor in a single transaction.
    fn apply_entry(&self, entry: &LogEntry) -> ReplicationResult<ApplyOutcome> {
        let log = self.service.log();
        let origin = entry.instance_id.ok_or_else(|| {
            CoreError::validation(format!("{} carries no instance id", entry.label()))
        })?;
        let diff = log.decode_diff(entry)?;

        self.service.transactions().run(|| {
            let _incoming = log.incoming_instance(origin, entry.instance_seq);
            let hooked = match self.hooks.get(&entry.record_type) {
                Some(hook) => hook.replicate(entry, &diff, &self.service)?,
                None => HookOutcome::NotImplemented,
            };
            let outcome = match hooked {
                HookOutcome::Applied => ApplyOutcome::Applied,
                HookOutcome::NotImplemented => self.applier.apply(&self.service, entry, &diff)?,
            };
            self.cursor.store(entry.instance_seq)?;
            Ok(outcome)
        })
    }

    fn handle_error(&self, error: &ReplicationError) {
        let state = match error {
            ReplicationError::Cancelled => ReplicationState::Idle,
            _ => ReplicationState::Error,
        };
        self.set_state(state);
        {
            let mut stats = self.stats.write();
            stats.runs_failed += 1;
            stats.last_run_time = Some(Instant::now());
            stats.last_error = Some(error.to_string());
        }

        if matches!(error, ReplicationError::Cancelled) {
            info!("replication run cancelled");
            return;
        }
        let cursor = self.stats.read().cursor;
        warn!(error = %error, cursor, "replication run failed");
        self.notifier.notify(&Notification {
            recipients: self.config.notify_recipients.clone(),
            subject: format!("replication from {} failed", self.config.master_url),
            body: format!("{error} (cursor {cursor})"),
        });
    }
}

/// Rejects batches that would break ordering: every entry must come from
/// `master`, and `instance_seq` must strictly ascend past `cursor`.
fn check_batch(batch: &PullResponse, master: InstanceId, cursor: u64) -> ReplicationResult<()> {
    let mut last = cursor;
    for entry in &batch.entries {
        if !entry.originates_from(master) {
            return Err(ReplicationError::transport_fatal(format!(
                "{} does not originate from master {master}",
                entry.label()
            )));
        }
        if entry.instance_seq <= last {
            return Err(ReplicationError::transport_fatal(format!(
                "{} out of order: instance_seq {} after {last}",
                entry.label(),
                entry.instance_seq
            )));
        }
        last = entry.instance_seq;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemoryCursorStore;
    use crate::notify::MemoryNotifier;
    use crate::transport::MockTransport;
    use crate::RetryConfig;
    use modlog_core::ModelName;
    use modlog_sync_protocol::HandshakeResponse;
    use modlog_testkit::prelude::*;

    struct Fixture {
        master: TestNode,
        replica: TestNode,
        cursor: Arc<MemoryCursorStore>,
        notifier: Arc<MemoryNotifier>,
        lock: MemoryLock,
        engine: ReplicationEngine<MockTransport>,
    }

    fn fixture() -> Fixture {
        let master = TestNode::new();
        let replica = TestNode::new();
        let cursor = Arc::new(MemoryCursorStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let lock = MemoryLock::new("test");
        let config = ReplicationConfig::new(replica.instance_id(), "mock://master")
            .with_auth_token("token")
            .with_notify_recipient("ops@example.com")
            .with_retry(RetryConfig::no_retry());
        let engine = ReplicationEngine::new(
            config,
            replica.service.clone(),
            MockTransport::new(),
            cursor.clone(),
        )
        .with_lock(lock.clone())
        .with_notifier(notifier.clone());
        Fixture {
            master,
            replica,
            cursor,
            notifier,
            lock,
            engine,
        }
    }

    fn serve(f: &Fixture, entries: Vec<LogEntry>, has_more: bool) {
        let latest = f.master.log.latest_instance_seq().unwrap();
        let transport = f.engine.transport();
        transport.set_handshake_response(HandshakeResponse::success(f.master.instance_id(), latest));
        let new_cursor = entries.last().map_or(0, |e| e.instance_seq);
        transport.set_pull_response(PullResponse::new(entries, new_cursor, has_more));
    }

    #[test]
    fn state_transitions() {
        assert!(ReplicationState::Idle.can_start_run());
        assert!(ReplicationState::Error.can_start_run());
        assert!(ReplicationState::RetryWait.can_start_run());
        assert!(!ReplicationState::Applying.can_start_run());
        assert!(ReplicationState::Pulling.is_active());
        assert!(!ReplicationState::Synced.is_active());
    }

    #[test]
    fn run_applies_batch_and_advances_cursor() {
        let f = fixture();
        let ada = f.master.create_contact("Ada");
        f.master.create_contact("Grace");
        serve(&f, f.master.log_backend.entries(), false);

        let run = f.engine.run_once().unwrap();
        assert!(run.lock_acquired);
        assert_eq!(run.applied, 2);
        assert_eq!(run.cursor, 2);
        assert_eq!(f.cursor.current(), 2);
        assert_eq!(f.engine.state(), ReplicationState::Synced);

        let copy = f.replica.fetch("Contact", ada.id().unwrap());
        assert_eq!(copy.get("name"), Some(&"Ada".into()));

        // Replayed changes keep the master's instance id and instance_seq.
        let origin: Vec<_> = f
            .master
            .log_backend
            .entries()
            .into_iter()
            .map(|e| (e.instance_id, e.instance_seq, e.record_id))
            .collect();
        let replayed: Vec<_> = f
            .replica
            .log_backend
            .entries()
            .into_iter()
            .map(|e| (e.instance_id, e.instance_seq, e.record_id))
            .collect();
        assert_eq!(replayed, origin);
        assert_eq!(f.replica.log.latest_instance_seq().unwrap(), 0);
    }

    #[test]
    fn held_lock_skips_run() {
        let f = fixture();
        f.master.create_contact("Ada");
        serve(&f, f.master.log_backend.entries(), false);

        let other = f.lock.clone();
        assert!(other.try_lock().unwrap());
        let run = f.engine.run_once().unwrap();
        assert!(!run.lock_acquired);
        assert_eq!(f.cursor.current(), 0);
        assert!(f.engine.transport().pull_requests().is_empty());
        assert_eq!(f.engine.stats().runs_skipped, 1);
    }

    #[test]
    fn rejected_handshake_is_auth_error() {
        let f = fixture();
        f.engine
            .transport()
            .set_handshake_response(HandshakeResponse::error("bad token"));

        let err = f.engine.run_once().unwrap_err();
        assert_eq!(err.backend_kind(), Some(crate::BackendErrorKind::Auth));
        assert_eq!(f.engine.state(), ReplicationState::Error);
        assert!(!f.lock.is_held());

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["ops@example.com".to_string()]);
    }

    #[test]
    fn out_of_order_batch_is_rejected() {
        let f = fixture();
        f.master.create_contact("Ada");
        f.master.create_contact("Grace");
        let mut entries = f.master.log_backend.entries();
        entries.reverse();
        serve(&f, entries, false);

        assert!(f.engine.run_once().is_err());
        assert_eq!(f.cursor.current(), 0);
        assert!(f.replica.store.is_empty());
    }

    #[test]
    fn failing_entry_stops_batch() {
        let f = fixture();
        let ada = f.master.create_contact("Ada");
        f.master
            .service
            .update(ada.with_field("phone", "555"), &test_context())
            .unwrap();
        f.master.create_contact("Grace");

        // Skip the create so the update has nothing to apply to.
        let entries: Vec<LogEntry> = f.master.log_backend.entries().into_iter().skip(1).collect();
        serve(&f, entries, false);

        let err = f.engine.run_once().unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Contact/"));
        assert_eq!(f.cursor.current(), 0);
        assert!(f.replica.store.is_empty());
        assert_eq!(f.engine.stats().runs_failed, 1);
    }

    #[test]
    fn cancelled_engine_does_not_run() {
        let f = fixture();
        serve(&f, Vec::new(), false);
        f.engine.cancel();

        assert!(matches!(
            f.engine.run_with_retry(),
            Err(ReplicationError::Cancelled)
        ));
        f.engine.reset_cancel();
        assert!(f.engine.run_with_retry().is_ok());
    }

    #[test]
    fn hook_takes_precedence() {
        struct Counting(ModelName, Arc<parking_lot::Mutex<u32>>);

        impl Replicable for Counting {
            fn model(&self) -> &ModelName {
                &self.0
            }

            fn replicate(
                &self,
                _: &LogEntry,
                _: &modlog_core::Diff,
                _: &EntityService,
            ) -> modlog_core::CoreResult<HookOutcome> {
                *self.1.lock() += 1;
                Ok(HookOutcome::Applied)
            }
        }

        let calls = Arc::new(parking_lot::Mutex::new(0));
        let mut f = fixture();
        f.engine = f
            .engine
            .with_hook(Arc::new(Counting(ModelName::new("Contact"), calls.clone())));
        f.master.create_contact("Ada");
        serve(&f, f.master.log_backend.entries(), false);

        let run = f.engine.run_once().unwrap();
        assert_eq!(run.applied, 1);
        assert_eq!(*calls.lock(), 1);
        assert!(f.replica.store.is_empty());
        assert_eq!(f.cursor.current(), 1);
    }

    #[test]
    fn scheduled_without_interval_runs_one_round() {
        let f = fixture();
        f.master.create_contact("Ada");
        serve(&f, f.master.log_backend.entries(), false);

        let stats = f.engine.run_scheduled().unwrap();
        assert_eq!(stats.runs_completed, 1);
        assert_eq!(stats.entries_applied, 1);
        assert_eq!(stats.cursor, 1);
    }
}
