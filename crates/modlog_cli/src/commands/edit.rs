//! Entity editing commands: `put` and `delete`.

use crate::error::{CliError, CliResult};
use crate::state::Instance;
use modlog_core::{Entity, EntityId, FieldValue, ModelName, WriteContext};
use std::path::Path;

/// Creates an entity, or updates the live one with `id`.
///
/// On update only the assigned fields change; assigning `null` clears a
/// field.
pub fn put(
    instance: &Instance,
    model: &str,
    id: Option<&str>,
    assignments: Vec<(String, FieldValue)>,
    ctx: &WriteContext,
) -> CliResult<Entity> {
    let service = instance.service();
    let model = ModelName::new(model);
    service.schemas().require(&model)?;

    let existing = match id {
        Some(id) => service.get(&model, &EntityId::from(id))?,
        None => None,
    };
    let saved = match existing {
        Some(mut entity) => {
            for (name, value) in assignments {
                entity.set(name, value);
            }
            service.update(entity, ctx)?
        }
        None => {
            let mut entity = Entity::new(model);
            for (name, value) in assignments {
                entity.set(name, value);
            }
            match id {
                Some(id) => service.create_with_id(EntityId::from(id), entity, ctx)?,
                None => service.create(entity, ctx)?,
            }
        }
    };
    instance.save()?;
    Ok(saved)
}

/// Deletes an entity. `purge` removes soft-deleted models for good.
pub fn delete(
    instance: &Instance,
    model: &str,
    id: &str,
    purge: bool,
    ctx: &WriteContext,
) -> CliResult<()> {
    let service = instance.service();
    let model = ModelName::new(model);
    let id = EntityId::from(id);
    if purge {
        service.purge(&model, &id, ctx)?;
    } else {
        service.delete(&model, &id, ctx)?;
    }
    instance.save()
}

/// Restores a soft-deleted entity.
pub fn restore(instance: &Instance, model: &str, id: &str, ctx: &WriteContext) -> CliResult<Entity> {
    let restored = instance
        .service()
        .undelete(&ModelName::new(model), &EntityId::from(id), ctx)?;
    instance.save()?;
    Ok(restored)
}

fn describe(entity: &Entity) -> String {
    let id = entity.id().map(EntityId::to_string).unwrap_or_default();
    format!("{}/{} ({})", entity.model(), id, entity.seq())
}

/// Runs the put command.
pub fn run_put(
    path: &Path,
    model: &str,
    id: Option<&str>,
    assignments: Vec<(String, FieldValue)>,
    ctx: &WriteContext,
) -> Result<(), Box<dyn std::error::Error>> {
    if assignments.is_empty() {
        return Err(CliError::InvalidArgument("nothing to set".into()).into());
    }
    let instance = Instance::open(path)?;
    let entity = put(&instance, model, id, assignments, ctx)?;
    println!("Saved {}", describe(&entity));
    Ok(())
}

/// Runs the delete command.
pub fn run_delete(
    path: &Path,
    model: &str,
    id: &str,
    purge: bool,
    ctx: &WriteContext,
) -> Result<(), Box<dyn std::error::Error>> {
    let instance = Instance::open(path)?;
    delete(&instance, model, id, purge, ctx)?;
    println!("{} {model}/{id}", if purge { "Purged" } else { "Deleted" });
    Ok(())
}

/// Runs the restore command.
pub fn run_restore(
    path: &Path,
    model: &str,
    id: &str,
    ctx: &WriteContext,
) -> Result<(), Box<dyn std::error::Error>> {
    let instance = Instance::open(path)?;
    let entity = restore(&instance, model, id, ctx)?;
    println!("Restored {}", describe(&entity));
    Ok(())
}
