//! Operator notification when a replication run fails.

use parking_lot::Mutex;
use tracing::error;

/// A message for the configured recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Who should be told.
    pub recipients: Vec<String>,
    /// One-line summary.
    pub subject: String,
    /// Details, including the failing entry when known.
    pub body: String,
}

/// Delivers [`Notification`]s.
pub trait Notifier: Send + Sync {
    /// Sends a notification. Delivery failures are the notifier's concern.
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the `tracing` error log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        error!(
            recipients = ?notification.recipients,
            subject = %notification.subject,
            body = %notification.body,
            "replication failure"
        );
    }
}

/// Keeps notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications sent so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: &Notification) {
        self.sent.lock().push(notification.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        notifier.notify(&Notification {
            recipients: vec!["ops@example.com".into()],
            subject: "replication stopped".into(),
            body: "Contact/c-1@seq:3: not found".into(),
        });

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["ops@example.com".to_string()]);
    }
}
