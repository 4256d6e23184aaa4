//! Undo command implementation.

use super::{print_json, Format, QueryArgs};
use crate::error::{CliError, CliResult};
use crate::state::Instance;
use modlog_core::{LogQuery, Undo, UndoOptions, UndoReport, WriteContext};
use std::path::Path;

/// Reverts the entries matching `args`, newest first.
///
/// At least one filter is required. A dry run leaves the state file alone.
pub fn execute(
    instance: &Instance,
    args: &QueryArgs,
    options: UndoOptions,
    ctx: &WriteContext,
) -> CliResult<UndoReport> {
    let query = args.to_query();
    if query == LogQuery::new() {
        return Err(CliError::InvalidArgument(
            "undo needs at least one filter".into(),
        ));
    }
    let report = Undo::new(instance.service()).run(&query, options, ctx)?;
    if !report.dry_run {
        instance.save()?;
    }
    Ok(report)
}

/// Runs the undo command.
pub fn run(
    path: &Path,
    args: &QueryArgs,
    options: UndoOptions,
    format: &str,
    ctx: &WriteContext,
) -> Result<(), Box<dyn std::error::Error>> {
    let format = Format::parse(format)?;
    let instance = Instance::open(path)?;
    let report = execute(&instance, args, options, ctx)?;

    match format {
        Format::Json => print_json(&report)?,
        Format::Text => {
            let verb = if report.dry_run { "Would undo" } else { "Undid" };
            println!("{verb} {} entries", report.undone.len());
            for id in &report.undone {
                println!("  {id}");
            }
            if !report.skipped.is_empty() {
                println!("Skipped {} entries", report.skipped.len());
                for skipped in &report.skipped {
                    println!("  {}: {}", skipped.label, skipped.reason);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::edit;
    use modlog_core::{ChangeType, EntityId, FieldValue, ModelName, SkipReason};

    fn ctx() -> WriteContext {
        WriteContext::account("admin")
    }

    fn set(name: &str, value: &str) -> Vec<(String, FieldValue)> {
        vec![(name.to_string(), FieldValue::text(value))]
    }

    fn phone_update() -> QueryArgs {
        QueryArgs {
            model: Some("Contact".into()),
            id: Some("c-1".into()),
            change_type: Some(ChangeType::Updated),
            after_seq: Some(1),
            up_to_seq: Some(2),
            ..QueryArgs::default()
        }
    }

    fn contact(instance: &Instance) -> modlog_core::Entity {
        instance
            .service()
            .require(&ModelName::new("Contact"), &EntityId::from("c-1"))
            .unwrap()
    }

    fn setup(dir: &Path) -> Instance {
        let instance = Instance::init(dir, None).unwrap();
        edit::put(&instance, "Contact", Some("c-1"), set("name", "Ada"), &ctx()).unwrap();
        edit::put(&instance, "Contact", Some("c-1"), set("phone", "555-0100"), &ctx()).unwrap();
        edit::put(&instance, "Contact", Some("c-1"), set("email", "ada@example.com"), &ctx())
            .unwrap();
        instance
    }

    #[test]
    fn later_modification_needs_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let instance = setup(dir.path());

        let report = execute(&instance, &phone_update(), UndoOptions::default(), &ctx()).unwrap();
        assert!(report.undone.is_empty());
        assert_eq!(
            report.skipped[0].reason,
            SkipReason::ModifiedLater {
                current: modlog_core::SequenceNumber::new(3)
            }
        );

        let options = UndoOptions::default().overwrite(true);
        let report = execute(&instance, &phone_update(), options, &ctx()).unwrap();
        assert_eq!(report.undone.len(), 1);

        let reopened = Instance::open(dir.path()).unwrap();
        let c = contact(&reopened);
        assert!(c.get("phone").map_or(true, FieldValue::is_null));
        assert_eq!(c.get("email"), Some(&FieldValue::text("ada@example.com")));
        assert_eq!(c.seq().as_u64(), 4);
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let instance = setup(dir.path());
        let before = contact(&instance);
        let entries = instance.log_len();

        let options = UndoOptions::default().overwrite(true).dry_run(true);
        let report = execute(&instance, &phone_update(), options, &ctx()).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.undone.len(), 1);
        assert_eq!(contact(&instance), before);
        assert_eq!(instance.log_len(), entries);
    }

    #[test]
    fn unfiltered_undo_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let instance = setup(dir.path());
        let err = execute(&instance, &QueryArgs::default(), UndoOptions::default(), &ctx())
            .err()
            .unwrap();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }
}
