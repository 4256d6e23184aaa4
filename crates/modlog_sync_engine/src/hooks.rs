//! Domain-specific replication hooks.
//!
//! A model whose replicated changes need more than "apply the diff"
//! (derived records, external side effects) registers a [`Replicable`]
//! hook. Models without one, or whose hook declines an entry, fall back to
//! the [`DefaultApplier`](crate::DefaultApplier).

use modlog_core::{CoreResult, Diff, EntityService, LogEntry, ModelName};
use std::collections::HashMap;
use std::sync::Arc;

/// What a hook did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook applied the entry.
    Applied,
    /// The hook does not handle this entry; use the default applier.
    NotImplemented,
}

/// Replication handler for one model.
///
/// Runs inside the entry's transaction. Must converge when the same entry
/// is applied twice.
pub trait Replicable: Send + Sync {
    /// Model this hook handles.
    fn model(&self) -> &ModelName;

    /// Applies one replicated entry.
    fn replicate(
        &self,
        entry: &LogEntry,
        diff: &Diff,
        service: &EntityService,
    ) -> CoreResult<HookOutcome>;
}

/// Hooks keyed by model.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<ModelName, Arc<dyn Replicable>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook, replacing any previous hook for its model.
    pub fn register(&mut self, hook: Arc<dyn Replicable>) {
        self.hooks.insert(hook.model().clone(), hook);
    }

    /// Hook for `model`, if any.
    pub fn get(&self, model: &ModelName) -> Option<&Arc<dyn Replicable>> {
        self.hooks.get(model)
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns true if no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Declining(ModelName);

    impl Replicable for Declining {
        fn model(&self) -> &ModelName {
            &self.0
        }

        fn replicate(&self, _: &LogEntry, _: &Diff, _: &EntityService) -> CoreResult<HookOutcome> {
            Ok(HookOutcome::NotImplemented)
        }
    }

    #[test]
    fn registry_replaces_hook_per_model() {
        let mut hooks = HookRegistry::new();
        assert!(hooks.is_empty());

        hooks.register(Arc::new(Declining(ModelName::new("Contact"))));
        hooks.register(Arc::new(Declining(ModelName::new("Contact"))));
        hooks.register(Arc::new(Declining(ModelName::new("List"))));

        assert_eq!(hooks.len(), 2);
        assert!(hooks.get(&ModelName::new("Contact")).is_some());
        assert!(hooks.get(&ModelName::new("Note")).is_none());
    }
}
