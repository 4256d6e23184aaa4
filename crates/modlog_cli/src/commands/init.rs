//! Init command implementation.

use crate::error::{CliError, CliResult};
use crate::state::Instance;
use modlog_core::InstanceId;
use std::path::Path;
use tracing::info;

/// Creates a new instance in `path`.
pub fn execute(path: &Path, instance_id: Option<&str>) -> CliResult<Instance> {
    let instance_id = instance_id
        .map(|s| {
            InstanceId::parse(s)
                .ok_or_else(|| CliError::InvalidArgument(format!("invalid instance id '{s}'")))
        })
        .transpose()?;
    let instance = Instance::init(path, instance_id)?;
    info!(path = %path.display(), instance = %instance.instance_id(), "instance created");
    Ok(instance)
}

/// Runs the init command.
pub fn run(path: &Path, instance_id: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let instance = execute(path, instance_id)?;
    println!("Initialized instance {}", instance.instance_id());
    println!("  Directory: {}", instance.dir().display());
    Ok(())
}
