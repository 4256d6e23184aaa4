//! Configuration for the replication engine.

use modlog_core::InstanceId;
use modlog_sync_protocol::PROTOCOL_VERSION;
use std::time::Duration;

/// Configuration for replication runs.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Instance id of this replica.
    pub instance_id: InstanceId,
    /// Base URL of the master.
    pub master_url: String,
    /// Token presented in the handshake.
    pub auth_token: String,
    /// Maximum number of entries pulled per run.
    pub batch_limit: u32,
    /// Name of the fleet-wide pull lock.
    pub lock_name: String,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Operators notified when a run fails.
    pub notify_recipients: Vec<String>,
    /// Protocol version.
    pub protocol_version: u16,
    /// Interval between scheduled runs.
    pub sync_interval: Option<Duration>,
}

impl ReplicationConfig {
    /// Creates a new replication configuration.
    pub fn new(instance_id: InstanceId, master_url: impl Into<String>) -> Self {
        Self {
            instance_id,
            master_url: master_url.into(),
            auth_token: String::new(),
            batch_limit: 100,
            lock_name: "modlog-replication".into(),
            retry: RetryConfig::default(),
            notify_recipients: Vec::new(),
            protocol_version: PROTOCOL_VERSION,
            sync_interval: None,
        }
    }

    /// Sets the auth token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    /// Sets the batch limit.
    pub fn with_batch_limit(mut self, limit: u32) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Sets the lock name.
    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Adds an operator to notify on failure.
    pub fn with_notify_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.notify_recipients.push(recipient.into());
        self
    }

    /// Sets the interval for scheduled runs.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Delay before the given attempt (0-indexed; attempt 0 runs at once).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // up to 25% on top
            Duration::from_secs_f64(delay_secs + delay_secs * 0.25 * jitter_fraction())
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random fraction in `[0, 1)` taken from the clock.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
