//! Quest System Module
//!
//! Quest state machines driven by pluggable behaviors. A quest's behavior
//! resolves state handles to state behaviors; the controller runs their
//! enter/update/exit callbacks. Behaviors come from Lua scripts (hot-reloadable)
//! or native Rust closures.

pub mod api;
pub mod behavior;
pub mod controller;
pub mod definition;
pub mod error;
pub mod events;
pub mod library;
pub mod manager;
pub mod registry;
pub mod runner;
pub mod sink;
pub mod state;

pub use api::{QuestContext, RequestQueue};
pub use behavior::{FnQuestBehavior, FnStateBehavior, QuestBehavior, StateBehavior, StateHandle, StateMap};
pub use controller::{QuestController, Transition};
pub use definition::{QuestDefinition, StateDefinition, VariableDefinition};
pub use error::QuestError;
pub use events::QuestEvent;
pub use library::{HotReloadEvent, ScriptLibrary};
pub use manager::QuestManager;
pub use registry::{BehaviorFactory, BehaviorRegistry};
pub use runner::{lua_factory, LuaQuestBehavior, LuaStateBehavior, ScriptHost};
pub use sink::{LogSink, MemorySink, TracingSink};
pub use state::{QuestSnapshot, QuestStatus, VariableStore, VariableType, VariableValue};
