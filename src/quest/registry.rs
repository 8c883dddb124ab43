//! Behavior Registry
//!
//! Binds quest IDs to the factories that build their quest behaviors.
//! The embedding layer (Lua scripts or native code) fills it at load time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::api::QuestContext;
use super::behavior::QuestBehavior;
use super::error::QuestError;

/// Builds a new quest behavior each time a quest is activated
pub type BehaviorFactory =
    Arc<dyn Fn(&QuestContext) -> Result<Box<dyn QuestBehavior>, QuestError> + Send + Sync>;

/// Registry for all quest behavior factories
#[derive(Default)]
pub struct BehaviorRegistry {
    factories: HashMap<String, BehaviorFactory>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for a quest, replacing any earlier one
    pub fn register(&mut self, quest_id: &str, factory: BehaviorFactory) {
        if self.factories.insert(quest_id.to_string(), factory).is_some() {
            warn!("Replacing behavior for quest '{}'", quest_id);
        } else {
            info!("Registered behavior for quest '{}'", quest_id);
        }
    }

    /// Register a native factory from a plain closure
    pub fn register_fn<F>(&mut self, quest_id: &str, factory: F)
    where
        F: Fn(&QuestContext) -> Result<Box<dyn QuestBehavior>, QuestError> + Send + Sync + 'static,
    {
        self.register(quest_id, Arc::new(factory));
    }

    pub fn unregister(&mut self, quest_id: &str) -> bool {
        self.factories.remove(quest_id).is_some()
    }

    pub fn contains(&self, quest_id: &str) -> bool {
        self.factories.contains_key(quest_id)
    }

    /// Build a fresh behavior for the quest in `ctx`
    pub fn create(&self, ctx: &QuestContext) -> Result<Box<dyn QuestBehavior>, QuestError> {
        let factory = self.factories.get(&ctx.quest_id)
            .ok_or_else(|| QuestError::NoBehavior(ctx.quest_id.clone()))?;
        factory(ctx)
    }

    /// Get all registered quest IDs
    pub fn ids(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::behavior::{StateHandle, StateMap};
    use crate::quest::sink::MemorySink;
    use crate::quest::state::VariableStore;

    struct Idle;

    impl crate::quest::behavior::StateBehavior for Idle {}

    fn context(quest_id: &str) -> QuestContext {
        QuestContext::new(quest_id, "quest", VariableStore::new(), Arc::new(MemorySink::new()))
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = BehaviorRegistry::new();
        registry.register_fn("intro", |_| Ok(Box::new(StateMap::new().with_state(1, Idle))));
        assert!(registry.contains("intro"));
        assert_eq!(registry.len(), 1);

        let behavior = registry.create(&context("intro")).unwrap();
        assert!(behavior.resolve(StateHandle::new(1)).unwrap().is_some());
    }

    #[test]
    fn test_missing_factory() {
        let registry = BehaviorRegistry::new();
        let err = registry.create(&context("nowhere")).err().unwrap();
        assert!(matches!(err, QuestError::NoBehavior(id) if id == "nowhere"));
    }

    #[test]
    fn test_duplicate_replaces() {
        let mut registry = BehaviorRegistry::new();
        registry.register_fn("intro", |_| Ok(Box::new(StateMap::new())));
        registry.register_fn("intro", |_| Ok(Box::new(StateMap::new().with_state(2, Idle))));
        assert_eq!(registry.ids(), vec!["intro".to_string()]);

        let behavior = registry.create(&context("intro")).unwrap();
        assert!(behavior.resolve(StateHandle::new(2)).unwrap().is_some());

        assert!(registry.unregister("intro"));
        assert!(registry.is_empty());
    }
}
