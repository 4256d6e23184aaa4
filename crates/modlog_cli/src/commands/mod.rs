//! CLI command implementations.

pub mod edit;
pub mod init;
pub mod log;
pub mod prune;
pub mod replicate;
pub mod undo;

use crate::error::{CliError, CliResult};
use clap::Args;
use modlog_core::{ChangeType, FieldValue, LogQuery, SequenceNumber, Timestamp};
use serde::Serialize;

/// Log entry filters shared by `log` and `undo`.
#[derive(Debug, Clone, Default, Args)]
pub struct QueryArgs {
    /// Only entries of this model
    #[arg(short, long)]
    pub model: Option<String>,

    /// Only entries of this record (requires --model)
    #[arg(long, requires = "model")]
    pub id: Option<String>,

    /// Only entries at or after this time (Unix millis)
    #[arg(long)]
    pub from: Option<Timestamp>,

    /// Only entries at or before this time (Unix millis)
    #[arg(long)]
    pub until: Option<Timestamp>,

    /// Only entries with a seq above this one (requires --up-to-seq)
    #[arg(long, requires = "up_to_seq")]
    pub after_seq: Option<u64>,

    /// Only entries with a seq up to this one
    #[arg(long)]
    pub up_to_seq: Option<u64>,

    /// Only entries of this change type (created, updated, deleted)
    #[arg(long)]
    pub change_type: Option<ChangeType>,

    /// Maximum number of entries
    #[arg(short, long)]
    pub limit: Option<usize>,
}

impl QueryArgs {
    /// Builds the log query these filters describe.
    pub fn to_query(&self) -> LogQuery {
        let mut query = LogQuery::new();
        if let Some(model) = &self.model {
            query = query.with_record_type(model.as_str());
        }
        if let Some(id) = &self.id {
            query = query.with_record_id(id.as_str());
        }
        if let Some(from) = self.from {
            query = query.with_from(from);
        }
        if let Some(until) = self.until {
            query = query.with_until(until);
        }
        if let Some(up_to) = self.up_to_seq {
            let after = self.after_seq.unwrap_or(0);
            query = query.with_seq_range(SequenceNumber::new(after), SequenceNumber::new(up_to));
        }
        if let Some(change_type) = self.change_type {
            query = query.with_change_type(change_type);
        }
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        query
    }
}

/// Parses `name=value` into a field assignment.
///
/// `null`, `true`, `false` and integers are typed; anything else is text.
/// Wrap a value in double quotes to force text.
pub fn parse_assignment(s: &str) -> Result<(String, FieldValue), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    if name.is_empty() {
        return Err(format!("missing field name in '{s}'"));
    }
    Ok((name.to_string(), parse_value(raw)))
}

fn parse_value(raw: &str) -> FieldValue {
    if let Some(text) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return FieldValue::text(text);
    }
    match raw {
        "null" => FieldValue::Null,
        "true" => FieldValue::Bool(true),
        "false" => FieldValue::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(FieldValue::Integer)
            .unwrap_or_else(|_| FieldValue::text(raw)),
    }
}

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses `text` or `json`.
    pub fn parse(s: &str) -> CliResult<Self> {
        match s {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(CliError::InvalidArgument(format!(
                "unknown format '{other}' (expected text or json)"
            ))),
        }
    }
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
