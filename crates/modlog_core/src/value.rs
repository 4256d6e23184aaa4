//! Field values carried by entities.

use crate::collection::EntityCollection;
use serde::{Deserialize, Serialize};

/// The value of one entity field.
///
/// Floats are intentionally not supported: equality must be exact for
/// conflict detection to be meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Null (also what an absent field compares as).
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text string.
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Ordered list of plain values.
    List(Vec<FieldValue>),
    /// One-to-many relation holding sub-entities.
    Collection(EntityCollection),
}

impl FieldValue {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Get this value as text, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a collection, if it is one.
    pub fn as_collection(&self) -> Option<&EntityCollection> {
        match self {
            FieldValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Get this value as a mutable collection, if it is one.
    pub fn as_collection_mut(&mut self) -> Option<&mut EntityCollection> {
        match self {
            FieldValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Short type name used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Integer(_) => "integer",
            FieldValue::Text(_) => "text",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::List(_) => "list",
            FieldValue::Collection(_) => "collection",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<EntityCollection> for FieldValue {
    fn from(c: EntityCollection) -> Self {
        FieldValue::Collection(c)
    }
}

/// Compares two optional field values, treating absence as null.
pub(crate) fn values_equal(a: Option<&FieldValue>, b: Option<&FieldValue>) -> bool {
    let null = FieldValue::Null;
    a.unwrap_or(&null) == b.unwrap_or(&null)
}
