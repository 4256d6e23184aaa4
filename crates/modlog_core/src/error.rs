//! Error types for modlog core.

use crate::diff::DiffValue;
use crate::types::{EntityId, ModelName, SequenceNumber};
use crate::value::FieldValue;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in modlog core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A concurrent write could not be merged, or a second writer won the
    /// race for a log slot. The caller must re-fetch and retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(Box<ConflictDetails>),

    /// Malformed entity or schema violation. Never retried automatically.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the violation.
        message: String,
    },

    /// Entity (or log range) not found.
    #[error("not found: {model}/{id}")]
    NotFound {
        /// Model of the missing entity.
        model: ModelName,
        /// Id of the missing entity.
        id: String,
    },

    /// Log payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },

    /// Transaction was rolled back.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(model: &ModelName, id: impl fmt::Display) -> Self {
        Self::NotFound {
            model: model.clone(),
            id: id.to_string(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates a conflict error from its details.
    pub fn conflict(details: ConflictDetails) -> Self {
        Self::ConcurrencyConflict(Box::new(details))
    }

    /// Returns true for errors the caller resolves by re-fetching and retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict(_))
    }

    /// Returns true for not-found errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }
}

/// What kind of conflict was detected.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictKind {
    /// The client's value differs from both sides of the concurrent diff.
    Field {
        /// Name of the conflicting field.
        field: String,
        /// Value the client submitted.
        client_value: Option<FieldValue>,
        /// Value the field held before the concurrent edits.
        concurrent_previous: Option<DiffValue>,
        /// Value the concurrent edits left behind.
        concurrent_changed: Option<DiffValue>,
    },
    /// A log entry with the same `(seq, record type, record id)` already exists.
    LogCollision {
        /// Seq that was already taken.
        seq: SequenceNumber,
    },
    /// The stored entity moved on between read and write.
    StaleWrite {
        /// Seq the writer expected to replace.
        expected: SequenceNumber,
        /// Seq actually stored.
        actual: SequenceNumber,
    },
    /// A concurrently modified sub-entity has no seq, so it cannot be merged.
    Unversioned {
        /// Collection field holding the sub-entity.
        field: String,
    },
}

/// Details of a concurrency conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictDetails {
    /// Model of the contended entity.
    pub model: ModelName,
    /// Id of the contended entity, if it has one.
    pub record_id: Option<EntityId>,
    /// What went wrong.
    pub kind: ConflictKind,
}

impl fmt::Display for ConflictDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self
            .record_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<new>".into());
        match &self.kind {
            ConflictKind::Field {
                field,
                client_value,
                ..
            } => write!(
                f,
                "{}/{} field '{}' (client value {:?}) was changed concurrently",
                self.model, id, field, client_value
            ),
            ConflictKind::LogCollision { seq } => {
                write!(f, "{}/{} already has a log entry for {}", self.model, id, seq)
            }
            ConflictKind::StaleWrite { expected, actual } => write!(
                f,
                "{}/{} expected {} but store holds {}",
                self.model, id, expected, actual
            ),
            ConflictKind::Unversioned { field } => write!(
                f,
                "{}/{} collection '{}' has an unversioned member",
                self.model, id, field
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display_names_field() {
        let err = CoreError::conflict(ConflictDetails {
            model: ModelName::new("Contact"),
            record_id: Some(EntityId::from("c-1")),
            kind: ConflictKind::Field {
                field: "email".into(),
                client_value: Some(FieldValue::text("a@example.com")),
                concurrent_previous: None,
                concurrent_changed: None,
            },
        });
        let msg = err.to_string();
        assert!(msg.contains("Contact/c-1"));
        assert!(msg.contains("email"));
        assert!(err.is_conflict());
    }

    #[test]
    fn not_found_classification() {
        let err = CoreError::not_found(&ModelName::new("Contact"), "x");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "not found: Contact/x");
    }
}
