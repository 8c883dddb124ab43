//! Quest Behavior Contracts
//!
//! Capabilities a quest supplies to its controller. The controller only ever
//! sees these traits; concrete variants come from scripts or native code.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::error::QuestError;

/// Identifies one state of one quest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateHandle(i64);

impl StateHandle {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for StateHandle {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle callbacks of a single quest state.
///
/// A state is entered once and exited once. In between it may be
/// initialized and deinitialized several times: when the quest is paused and
/// resumed, or loaded from a snapshot.
///
/// ```text
/// on_enter -> on_init -> (on_update)* -> on_deinit -> [on_init ... on_deinit]* -> on_exit
/// ```
///
/// Every hook defaults to a no-op so implementors only override what they use.
/// Callbacks must not block and must not drive their own controller; the
/// controller rejects that with [`QuestError::ReentrantTransition`].
pub trait StateBehavior {
    /// Called once when the state becomes the quest's state. Changes quest
    /// progress (flags, rewards); never replayed on resume or load.
    fn on_enter(&self) -> Result<(), QuestError> {
        Ok(())
    }

    /// Called after `on_enter` and whenever a paused or loaded quest picks
    /// the state up again. Hooks the state into the running game.
    fn on_init(&self) -> Result<(), QuestError> {
        Ok(())
    }

    /// Called while the state is active whenever the host signals progress
    fn on_update(&self) -> Result<(), QuestError> {
        Ok(())
    }

    /// Undoes `on_init`. Called before `on_exit` and when the quest is
    /// paused.
    fn on_deinit(&self) -> Result<(), QuestError> {
        Ok(())
    }

    /// Called once when the state stops being the quest's state
    fn on_exit(&self) -> Result<(), QuestError> {
        Ok(())
    }
}

/// Resolves state handles to state behaviors for one quest.
///
/// `Ok(None)` signals an unknown handle. `Err` is reserved for faults inside
/// the behavior itself.
pub trait QuestBehavior {
    fn resolve(&self, handle: StateHandle) -> Result<Option<Rc<dyn StateBehavior>>, QuestError>;

    /// Called once after the behavior is built, before any state is resolved
    fn init(&self) -> Result<(), QuestError> {
        Ok(())
    }

    /// Quest data beyond the declared variables that should go into a
    /// snapshot. `None` when there is nothing to keep.
    fn save(&self) -> Result<Option<serde_json::Value>, QuestError> {
        Ok(None)
    }

    /// Take back data returned by an earlier `save`
    fn load(&self, _data: &serde_json::Value) -> Result<(), QuestError> {
        Ok(())
    }
}

/// Quest behavior backed by a handle -> state map built up front
#[derive(Default)]
pub struct StateMap {
    states: HashMap<StateHandle, Rc<dyn StateBehavior>>,
}

impl StateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a state, replacing any previous state under the same handle
    pub fn insert(&mut self, handle: StateHandle, state: Rc<dyn StateBehavior>) {
        self.states.insert(handle, state);
    }

    pub fn with_state(mut self, id: i64, state: impl StateBehavior + 'static) -> Self {
        self.insert(StateHandle::new(id), Rc::new(state));
        self
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl QuestBehavior for StateMap {
    fn resolve(&self, handle: StateHandle) -> Result<Option<Rc<dyn StateBehavior>>, QuestError> {
        Ok(self.states.get(&handle).cloned())
    }
}

/// Quest behavior built from a resolver closure
pub struct FnQuestBehavior<F> {
    resolver: F,
}

impl<F> FnQuestBehavior<F>
where
    F: Fn(StateHandle) -> Option<Rc<dyn StateBehavior>>,
{
    pub fn new(resolver: F) -> Self {
        Self { resolver }
    }
}

impl<F> QuestBehavior for FnQuestBehavior<F>
where
    F: Fn(StateHandle) -> Option<Rc<dyn StateBehavior>>,
{
    fn resolve(&self, handle: StateHandle) -> Result<Option<Rc<dyn StateBehavior>>, QuestError> {
        Ok((self.resolver)(handle))
    }
}

type Callback = Box<dyn Fn() -> Result<(), QuestError>>;

/// State behavior assembled from closures
#[derive(Default)]
pub struct FnStateBehavior {
    enter: Option<Callback>,
    init: Option<Callback>,
    update: Option<Callback>,
    deinit: Option<Callback>,
    exit: Option<Callback>,
}

impl FnStateBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enter(mut self, f: impl Fn() -> Result<(), QuestError> + 'static) -> Self {
        self.enter = Some(Box::new(f));
        self
    }

    pub fn on_init(mut self, f: impl Fn() -> Result<(), QuestError> + 'static) -> Self {
        self.init = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn() -> Result<(), QuestError> + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    pub fn on_deinit(mut self, f: impl Fn() -> Result<(), QuestError> + 'static) -> Self {
        self.deinit = Some(Box::new(f));
        self
    }

    pub fn on_exit(mut self, f: impl Fn() -> Result<(), QuestError> + 'static) -> Self {
        self.exit = Some(Box::new(f));
        self
    }

    fn run(callback: &Option<Callback>) -> Result<(), QuestError> {
        match callback {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

impl StateBehavior for FnStateBehavior {
    fn on_enter(&self) -> Result<(), QuestError> {
        Self::run(&self.enter)
    }

    fn on_init(&self) -> Result<(), QuestError> {
        Self::run(&self.init)
    }

    fn on_update(&self) -> Result<(), QuestError> {
        Self::run(&self.update)
    }

    fn on_deinit(&self) -> Result<(), QuestError> {
        Self::run(&self.deinit)
    }

    fn on_exit(&self) -> Result<(), QuestError> {
        Self::run(&self.exit)
    }
}
