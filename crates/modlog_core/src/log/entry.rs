//! Log entries.

use crate::types::{EntityId, InstanceId, ModelName, SequenceNumber, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of mutation a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Entity was created (or undeleted).
    Created,
    /// Entity fields changed.
    Updated,
    /// Entity was deleted.
    Deleted,
}

impl ChangeType {
    /// Converts to a numeric code.
    pub fn to_code(self) -> u8 {
        match self {
            ChangeType::Created => 1,
            ChangeType::Updated => 2,
            ChangeType::Deleted => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ChangeType::Created),
            2 => Some(ChangeType::Updated),
            3 => Some(ChangeType::Deleted),
            _ => None,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChangeType::Created),
            "updated" => Ok(ChangeType::Updated),
            "deleted" => Ok(ChangeType::Deleted),
            other => Err(format!("unknown change type '{other}'")),
        }
    }
}

/// One immutable record of a single entity mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique entry id.
    pub id: String,
    /// Application owning the record type.
    pub application_id: String,
    /// Model of the mutated entity.
    pub record_type: ModelName,
    /// Id of the mutated entity.
    pub record_id: EntityId,
    /// Storage backend of the entity.
    pub record_backend: String,
    /// Kind of mutation.
    pub change_type: ChangeType,
    /// Entity seq after the mutation.
    pub seq: SequenceNumber,
    /// When the mutation happened.
    pub modification_time: Timestamp,
    /// Account that made the mutation.
    pub modifier_account_id: Option<String>,
    /// Serialized [`Diff`](crate::diff::Diff).
    #[serde(with = "payload_bytes")]
    pub payload: Vec<u8>,
    /// Instance that originated the change. `None` for non-replicable models.
    pub instance_id: Option<InstanceId>,
    /// Replication cursor position within `instance_id`.
    pub instance_seq: u64,
    /// Client that made the mutation.
    pub client: Option<String>,
}

impl LogEntry {
    /// Returns true if the entry belongs to `instance`'s replication stream.
    pub fn originates_from(&self, instance: InstanceId) -> bool {
        self.instance_id == Some(instance)
    }

    /// Short label used in log lines: `Contact/c-1@seq:3`.
    pub fn label(&self) -> String {
        format!("{}/{}@{}", self.record_type, self.record_id, self.seq)
    }
}

mod payload_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a byte string or a sequence of bytes")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
                Ok(v)
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    out.push(b);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_type_codes() {
        for ct in [ChangeType::Created, ChangeType::Updated, ChangeType::Deleted] {
            assert_eq!(ChangeType::from_code(ct.to_code()), Some(ct));
            assert_eq!(ct.as_str().parse::<ChangeType>(), Ok(ct));
        }
        assert_eq!(ChangeType::from_code(0), None);
        assert!("renamed".parse::<ChangeType>().is_err());
    }

    #[test]
    fn payload_survives_cbor() {
        let entry = LogEntry {
            id: "e-1".into(),
            application_id: "Addressbook".into(),
            record_type: "Contact".into(),
            record_id: "c-1".into(),
            record_backend: "memory".into(),
            change_type: ChangeType::Updated,
            seq: SequenceNumber::new(2),
            modification_time: 1,
            modifier_account_id: None,
            payload: vec![1, 2, 3],
            instance_id: Some(InstanceId::generate()),
            instance_seq: 9,
            client: Some("cli".into()),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&entry, &mut bytes).unwrap();
        let back: LogEntry = ciborium::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.label(), "Contact/c-1@seq:2");
    }
}
