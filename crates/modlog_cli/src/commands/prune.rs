//! Prune command implementation.

use crate::error::CliResult;
use crate::state::Instance;
use modlog_core::EntityStore;
use serde::Serialize;
use std::path::Path;

/// Prune result.
#[derive(Debug, Serialize)]
pub struct PruneResult {
    /// Entries deleted.
    pub removed: usize,
    /// Entries left in the log.
    pub remaining: usize,
}

/// Deletes log entries of entities that no longer exist.
pub fn execute(instance: &Instance) -> CliResult<PruneResult> {
    let store: &dyn EntityStore = &**instance.store();
    let removed = instance.log().prune(store)?;
    if removed > 0 {
        instance.save()?;
    }
    Ok(PruneResult {
        removed,
        remaining: instance.log_len(),
    })
}

/// Runs the prune command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let instance = Instance::open(path)?;
    let result = execute(&instance)?;
    println!(
        "Pruned {} entries ({} remaining)",
        result.removed, result.remaining
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::edit;
    use modlog_core::{FieldValue, LogQuery, WriteContext};

    #[test]
    fn prune_drops_history_of_purged_entities_only() {
        let dir = tempfile::tempdir().unwrap();
        let instance = Instance::init(dir.path(), None).unwrap();
        let ctx = WriteContext::account("admin");
        let name = |n: &str| vec![("name".to_string(), FieldValue::text(n))];

        edit::put(&instance, "Contact", Some("keep"), name("Ada"), &ctx).unwrap();
        edit::put(&instance, "Contact", Some("soft"), name("Grace"), &ctx).unwrap();
        edit::put(&instance, "Contact", Some("gone"), name("Alan"), &ctx).unwrap();
        edit::delete(&instance, "Contact", "soft", false, &ctx).unwrap();
        edit::delete(&instance, "Contact", "gone", true, &ctx).unwrap();
        assert_eq!(instance.log_len(), 5);

        let result = execute(&instance).unwrap();
        assert_eq!(result.removed, 2);
        assert_eq!(result.remaining, 3);
        assert_eq!(execute(&instance).unwrap().removed, 0);

        // numbering resumes past the pruned entries after a reload
        let reopened = Instance::open(dir.path()).unwrap();
        assert_eq!(reopened.log_len(), 3);
        assert_eq!(reopened.log().latest_instance_seq().unwrap(), 5);
        edit::put(&reopened, "Contact", Some("next"), name("Edsger"), &ctx).unwrap();
        let entries = reopened
            .log()
            .query_range(&LogQuery::for_record("Contact", "next"))
            .unwrap();
        assert_eq!(entries[0].instance_seq, 6);
    }
}
