//! Who is writing, and from where.

use serde::{Deserialize, Serialize};

/// Identifies the modifier of a write.
///
/// Copied into entity metadata and into every log entry the write produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteContext {
    /// Account performing the write.
    pub account_id: Option<String>,
    /// Client the write came from (user agent, sync peer, `cli`).
    pub client: Option<String>,
}

impl WriteContext {
    /// Context for writes made by the system itself.
    pub fn system() -> Self {
        Self::default()
    }

    /// Context for an account.
    pub fn account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            client: None,
        }
    }

    /// Sets the client (builder form).
    #[must_use]
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }
}
