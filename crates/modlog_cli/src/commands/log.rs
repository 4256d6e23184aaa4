//! Log command implementation.

use super::{print_json, Format, QueryArgs};
use crate::error::CliResult;
use crate::state::Instance;
use modlog_core::{ChangeType, Diff, Timestamp};
use serde::Serialize;
use std::path::Path;

/// One log entry with its decoded diff.
#[derive(Debug, Serialize)]
pub struct LogRow {
    /// Entry id.
    pub id: String,
    /// Model of the record.
    pub record_type: String,
    /// Id of the record.
    pub record_id: String,
    /// Kind of mutation.
    pub change_type: ChangeType,
    /// Record seq after the mutation.
    pub seq: u64,
    /// When the mutation happened.
    pub modification_time: Timestamp,
    /// Who made it.
    pub modifier: Option<String>,
    /// Where it came from.
    pub client: Option<String>,
    /// Originating instance, for replicable models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Position in the originating instance's stream.
    pub instance_seq: u64,
    /// The change itself.
    pub diff: Diff,
}

/// Reads the entries matching `args`, oldest first.
pub fn execute(instance: &Instance, args: &QueryArgs) -> CliResult<Vec<LogRow>> {
    let log = instance.log();
    log.query_range(&args.to_query())?
        .into_iter()
        .map(|entry| -> CliResult<LogRow> {
            let diff = log.decode_diff(&entry)?;
            Ok(LogRow {
                id: entry.id,
                record_type: entry.record_type.to_string(),
                record_id: entry.record_id.to_string(),
                change_type: entry.change_type,
                seq: entry.seq.as_u64(),
                modification_time: entry.modification_time,
                modifier: entry.modifier_account_id,
                client: entry.client,
                instance_id: entry.instance_id.map(|i| i.to_string()),
                instance_seq: entry.instance_seq,
                diff,
            })
        })
        .collect()
}

/// Runs the log command.
pub fn run(path: &Path, args: &QueryArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let format = Format::parse(format)?;
    let instance = Instance::open(path)?;
    let rows = execute(&instance, args)?;

    match format {
        Format::Json => print_json(&rows)?,
        Format::Text => {
            if rows.is_empty() {
                println!("No matching entries");
            }
            for row in &rows {
                let fields: Vec<&str> = row.diff.changed().keys().map(String::as_str).collect();
                println!(
                    "{:>6}  {}  {:<8} {}/{} seq:{}  by {}  [{}]",
                    row.instance_seq,
                    row.modification_time,
                    row.change_type,
                    row.record_type,
                    row.record_id,
                    row.seq,
                    row.modifier.as_deref().unwrap_or("-"),
                    fields.join(", ")
                );
            }
        }
    }
    Ok(())
}
