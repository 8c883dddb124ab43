//! Quest Manager
//!
//! Owns every loaded quest: its definition, controller, status, variables,
//! and the state requests its script queued. All operations are synchronous
//! and run on the thread that owns the manager.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::Utc;
use tracing::{debug, info, info_span, warn};

use super::api::QuestContext;
use super::behavior::StateHandle;
use super::controller::QuestController;
use super::definition::QuestDefinition;
use super::error::QuestError;
use super::events::QuestEvent;
use super::registry::{BehaviorFactory, BehaviorRegistry};
use super::sink::LogSink;
use super::state::{QuestSnapshot, QuestStatus, VariableStore, VariableValue};

/// Upper bound on script-queued transitions applied after one operation
pub const MAX_QUEUED_TRANSITIONS: usize = 32;

/// Runtime state of one quest
struct QuestRuntime {
    definition: Arc<QuestDefinition>,
    controller: QuestController,
    context: QuestContext,
    status: QuestStatus,
    /// Last entered state; kept while the quest is not active
    current: Option<StateHandle>,
    /// `current` was entered and not exited, so activation only resumes it
    entered: bool,
    /// Data the behavior saved when it was last unbound
    custom: Option<serde_json::Value>,
}

impl QuestRuntime {
    fn new(definition: Arc<QuestDefinition>, sink: Arc<dyn LogSink>) -> Self {
        let variables = VariableStore::from_definitions(&definition.variables);
        let context = QuestContext::new(
            &definition.id,
            &definition.interface,
            variables,
            Arc::clone(&sink),
        );

        Self {
            controller: QuestController::new(definition.id.clone(), sink),
            context,
            status: QuestStatus::Inactive,
            current: None,
            entered: false,
            custom: None,
            definition,
        }
    }

    fn id(&self) -> &str {
        &self.definition.id
    }

    fn require_active(&self) -> Result<(), QuestError> {
        if self.status != QuestStatus::Active {
            return Err(QuestError::InvalidStatus {
                quest_id: self.id().to_string(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Move to `status`, binding or unbinding the behavior as needed.
    ///
    /// Pausing only deinitializes the active state. Finishing or aborting
    /// exits it.
    fn set_status(
        &mut self,
        status: QuestStatus,
        registry: &BehaviorRegistry,
        events: &mut Vec<QuestEvent>,
    ) -> Result<(), QuestError> {
        let from = self.status;
        if from == status {
            return Ok(());
        }

        // Build the behavior before touching anything so a failure leaves
        // the quest as it was
        let behavior = if status == QuestStatus::Active {
            let behavior = registry.create(&self.context)?;
            behavior.init()?;
            if let Some(data) = &self.custom {
                behavior.load(data)?;
            }
            Some(behavior)
        } else {
            None
        };

        if from == QuestStatus::Active && self.controller.is_bound() {
            self.save_custom();
            let left = if status.is_terminal() {
                self.controller.unbind()
            } else {
                self.controller.suspend()
            };
            if let Err(e) = left {
                warn!("Quest '{}' failed to leave its state: {}", self.id(), e);
            }
        }
        if status.is_terminal() {
            self.entered = false;
        }

        self.status = status;
        events.push(QuestEvent::StatusChanged {
            quest_id: self.id().to_string(),
            from,
            to: status,
        });
        info!("Quest '{}' is now {}", self.id(), status.as_str());

        if let Some(behavior) = behavior {
            self.controller.bind(behavior)?;
            match self.current {
                Some(handle) if self.entered => self.resume(handle, events)?,
                current => self.enter(current.unwrap_or(self.definition.start_state), events)?,
            }
        }
        Ok(())
    }

    fn save_custom(&mut self) {
        match self.controller.save_data() {
            Ok(data) => self.custom = data,
            Err(e) => warn!("Quest '{}' failed to save its data: {}", self.id(), e),
        }
    }

    /// Request a state, turning an unknown handle into an event
    fn enter(&mut self, handle: StateHandle, events: &mut Vec<QuestEvent>) -> Result<(), QuestError> {
        let result = self.controller.request_state(handle);
        if let Some(active) = self.controller.active_handle() {
            self.current = Some(active);
            self.entered = true;
        }

        match result {
            Ok(transition) => {
                events.push(QuestEvent::StateEntered {
                    quest_id: self.id().to_string(),
                    from: transition.from,
                    to: transition.to,
                });
                Ok(())
            }
            Err(QuestError::UnknownState(handle)) => {
                events.push(QuestEvent::UnknownState {
                    quest_id: self.id().to_string(),
                    handle,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Pick up a state entered before the quest was paused or saved
    fn resume(&mut self, handle: StateHandle, events: &mut Vec<QuestEvent>) -> Result<(), QuestError> {
        let result = self.controller.resume_state(handle);
        self.entered = self.controller.active_handle().is_some();

        match result {
            Ok(()) => {
                events.push(QuestEvent::StateResumed {
                    quest_id: self.id().to_string(),
                    state: handle,
                });
                Ok(())
            }
            Err(QuestError::UnknownState(handle)) => {
                events.push(QuestEvent::UnknownState {
                    quest_id: self.id().to_string(),
                    handle,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Swap saved data in, going through `Inactive` so the running state is
    /// paused first
    fn restore(
        &mut self,
        snapshot: &QuestSnapshot,
        registry: &BehaviorRegistry,
        events: &mut Vec<QuestEvent>,
    ) -> Result<(), QuestError> {
        self.set_status(QuestStatus::Inactive, registry, events)?;

        self.context.variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .restore(&snapshot.variables);
        self.current = snapshot.current_state;
        self.entered = snapshot.state_entered && snapshot.current_state.is_some();
        self.custom = snapshot.custom.clone();
        self.context.requests.clear();

        self.set_status(snapshot.status, registry, events)
    }

    /// Finish an operation: apply queued requests on success. On failure
    /// nothing queued survives, and what happened before the failure is
    /// logged since the events are not returned.
    fn settle(
        &mut self,
        result: Result<(), QuestError>,
        mut events: Vec<QuestEvent>,
    ) -> Result<Vec<QuestEvent>, QuestError> {
        match result.and_then(|()| self.drain_requests(&mut events)) {
            Ok(()) => Ok(events),
            Err(e) => {
                self.drop_requests(&mut events);
                for event in &events {
                    warn!("Quest '{}': {:?} before failing with: {}", self.id(), event, e);
                }
                Err(e)
            }
        }
    }

    /// Apply state requests the script queued during the last operation
    fn drain_requests(&mut self, events: &mut Vec<QuestEvent>) -> Result<(), QuestError> {
        let mut applied = 0;
        while !self.context.requests.is_empty() {
            if self.status != QuestStatus::Active || applied == MAX_QUEUED_TRANSITIONS {
                debug!(
                    "Quest '{}': stopping after {} queued request(s), status {}",
                    self.id(),
                    applied,
                    self.status.as_str()
                );
                self.drop_requests(events);
                break;
            }

            let Some(handle) = self.context.requests.pop() else {
                break;
            };
            debug!("Quest '{}': applying queued request for state {}", self.id(), handle);
            applied += 1;
            self.enter(handle, events)?;
        }
        Ok(())
    }

    fn drop_requests(&mut self, events: &mut Vec<QuestEvent>) {
        let count = self.context.requests.clear();
        if count > 0 {
            warn!("Quest '{}': dropping {} queued state request(s)", self.id(), count);
            events.push(QuestEvent::RequestsDropped {
                quest_id: self.id().to_string(),
                count,
            });
        }
    }
}

/// Manages all quests
pub struct QuestManager {
    sink: Arc<dyn LogSink>,
    registry: BehaviorRegistry,
    quests: HashMap<String, QuestRuntime>,
}

impl QuestManager {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            registry: BehaviorRegistry::new(),
            quests: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BehaviorRegistry {
        &mut self.registry
    }

    /// Register the behavior factory of a quest. Takes effect on the next
    /// activation.
    pub fn register_behavior(&mut self, quest_id: &str, factory: BehaviorFactory) {
        self.registry.register(quest_id, factory);
    }

    /// Add a quest in the inactive status. A quest with the same ID is
    /// replaced, exiting its active state first.
    pub fn add_quest(&mut self, definition: Arc<QuestDefinition>) {
        let runtime = QuestRuntime::new(Arc::clone(&definition), Arc::clone(&self.sink));
        if let Some(old) = self.quests.insert(definition.id.clone(), runtime) {
            warn!("Replacing quest '{}'", definition.id);
            if old.controller.is_bound() {
                if let Err(e) = old.controller.unbind() {
                    warn!("Quest '{}' failed to exit its state: {}", definition.id, e);
                }
            }
        }
    }

    /// Add definitions that are not loaded yet and return their IDs.
    /// Loaded quests keep running on the definition they were loaded with.
    pub fn load_quests(&mut self, definitions: impl IntoIterator<Item = Arc<QuestDefinition>>) -> Vec<String> {
        let mut added = Vec::new();
        for definition in definitions {
            let changed = self.quests.get(&definition.id)
                .map(|runtime| *runtime.definition != *definition);
            match changed {
                None => {
                    added.push(definition.id.clone());
                    self.add_quest(definition);
                }
                Some(true) => info!(
                    "Quest '{}' changed on disk; the loaded definition stays until restart",
                    definition.id
                ),
                Some(false) => {}
            }
        }
        added
    }

    /// Register script-backed factories, e.g. from `ScriptLibrary::script_factories`
    pub fn register_scripts(&mut self, factories: Vec<(String, BehaviorFactory)>) -> usize {
        let count = factories.len();
        for (quest_id, factory) in factories {
            self.registry.register(&quest_id, factory);
        }
        count
    }

    /// Put a quest into the status its definition starts in
    pub fn initialize(&mut self, quest_id: &str) -> Result<Vec<QuestEvent>, QuestError> {
        let status = self.runtime(quest_id)?.definition.default_status;
        self.set_status(quest_id, status)
    }

    /// Initialize every quest. Failures are logged and skipped.
    pub fn initialize_all(&mut self) -> Vec<QuestEvent> {
        let mut events = Vec::new();
        for quest_id in self.quest_ids() {
            match self.initialize(&quest_id) {
                Ok(mut quest_events) => events.append(&mut quest_events),
                Err(e) => warn!("Failed to initialize quest '{}': {}", quest_id, e),
            }
        }
        events
    }

    /// Change a quest's status. Activating binds a fresh behavior and either
    /// resumes the state the quest was paused in or enters its current (or
    /// start) state. Pausing deinitializes the state; finishing or aborting
    /// exits it.
    pub fn set_status(&mut self, quest_id: &str, status: QuestStatus) -> Result<Vec<QuestEvent>, QuestError> {
        let _span = info_span!("quest", id = %quest_id).entered();
        let runtime = self.quests.get_mut(quest_id)
            .ok_or_else(|| QuestError::QuestNotFound(quest_id.to_string()))?;

        let mut events = Vec::new();
        let result = runtime.set_status(status, &self.registry, &mut events);
        runtime.settle(result, events)
    }

    /// Move an active quest to another state
    pub fn request_state(&mut self, quest_id: &str, handle: StateHandle) -> Result<Vec<QuestEvent>, QuestError> {
        let _span = info_span!("quest", id = %quest_id).entered();
        let runtime = self.runtime_mut(quest_id)?;
        runtime.require_active()?;

        let mut events = Vec::new();
        let result = runtime.enter(handle, &mut events);
        runtime.settle(result, events)
    }

    /// Signal progress to the active state of a quest
    pub fn update(&mut self, quest_id: &str) -> Result<Vec<QuestEvent>, QuestError> {
        let _span = info_span!("quest", id = %quest_id).entered();
        let runtime = self.runtime_mut(quest_id)?;
        runtime.require_active()?;

        let result = runtime.controller.update();
        runtime.settle(result, Vec::new())
    }

    /// Send a quest back to its start state. An inactive quest enters it on
    /// its next activation.
    pub fn reset(&mut self, quest_id: &str) -> Result<Vec<QuestEvent>, QuestError> {
        let runtime = self.runtime_mut(quest_id)?;
        let start = runtime.definition.start_state;
        if runtime.status == QuestStatus::Active {
            return self.request_state(quest_id, start);
        }
        runtime.current = Some(start);
        runtime.entered = false;
        Ok(Vec::new())
    }

    /// Capture what is needed to rebuild the quest later
    pub fn snapshot(&self, quest_id: &str) -> Result<QuestSnapshot, QuestError> {
        let runtime = self.runtime(quest_id)?;
        let variables = runtime.context.variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();

        let custom = if runtime.controller.is_bound() {
            runtime.controller.save_data()?
        } else {
            runtime.custom.clone()
        };

        Ok(QuestSnapshot {
            quest_id: quest_id.to_string(),
            status: runtime.status,
            current_state: runtime.current,
            state_entered: runtime.entered,
            variables,
            custom,
            saved_at: Utc::now(),
        })
    }

    /// Rebuild a quest from a snapshot. An active quest binds a fresh
    /// behavior, hands it the saved custom data and only re-initializes a
    /// state that was already entered.
    pub fn restore(&mut self, snapshot: &QuestSnapshot) -> Result<Vec<QuestEvent>, QuestError> {
        let _span = info_span!("quest", id = %snapshot.quest_id).entered();
        let runtime = self.quests.get_mut(&snapshot.quest_id)
            .ok_or_else(|| QuestError::QuestNotFound(snapshot.quest_id.clone()))?;

        if let Some(handle) = snapshot.current_state {
            let definition = &runtime.definition;
            if !definition.states.is_empty() && definition.get_state(handle).is_none() {
                return Err(QuestError::Definition(format!(
                    "quest '{}' does not declare state {}",
                    definition.id, handle
                )));
            }
        }
        if snapshot.status == QuestStatus::Active && !self.registry.contains(&snapshot.quest_id) {
            return Err(QuestError::NoBehavior(snapshot.quest_id.clone()));
        }

        let mut events = Vec::new();
        let result = runtime.restore(snapshot, &self.registry, &mut events);
        let events = runtime.settle(result, events)?;
        info!(
            "Restored quest '{}' ({}, state {:?})",
            snapshot.quest_id,
            snapshot.status.as_str(),
            snapshot.current_state
        );
        Ok(events)
    }

    pub fn status(&self, quest_id: &str) -> Option<QuestStatus> {
        self.quests.get(quest_id).map(|r| r.status)
    }

    /// Current state of a quest; remembered while the quest is not active
    pub fn current_state(&self, quest_id: &str) -> Option<StateHandle> {
        self.quests.get(quest_id).and_then(|r| r.current)
    }

    pub fn variable(&self, quest_id: &str, name: &str) -> Option<VariableValue> {
        self.quests.get(quest_id).and_then(|r| r.context.get_variable(name))
    }

    pub fn definition(&self, quest_id: &str) -> Option<Arc<QuestDefinition>> {
        self.quests.get(quest_id).map(|r| Arc::clone(&r.definition))
    }

    /// Get all quest IDs, sorted
    pub fn quest_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.quests.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn count(&self) -> usize {
        self.quests.len()
    }

    fn runtime(&self, quest_id: &str) -> Result<&QuestRuntime, QuestError> {
        self.quests.get(quest_id)
            .ok_or_else(|| QuestError::QuestNotFound(quest_id.to_string()))
    }

    fn runtime_mut(&mut self, quest_id: &str) -> Result<&mut QuestRuntime, QuestError> {
        self.quests.get_mut(quest_id)
            .ok_or_else(|| QuestError::QuestNotFound(quest_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::behavior::{FnQuestBehavior, FnStateBehavior, QuestBehavior, StateBehavior};
    use crate::quest::runner::lua_factory;
    use crate::quest::sink::MemorySink;
    use std::rc::Rc;

    const JOURNEY: &str = r#"
[quest]
id = "journey"
start_state = 1
default_status = "active"

[[quest.variables]]
name = "steps"
type = "integer"
"#;

    fn logging(
        sink: &Arc<dyn LogSink>,
        what: &'static str,
        handle: StateHandle,
    ) -> impl Fn() -> Result<(), QuestError> + 'static {
        let sink = Arc::clone(sink);
        move || {
            sink.log(&format!("{} {}", what, handle));
            Ok(())
        }
    }

    /// States 1..=3 exist and log their lifecycle to the quest sink
    fn journaling(ctx: &QuestContext) -> Result<Box<dyn QuestBehavior>, QuestError> {
        let sink = Arc::clone(&ctx.sink);
        Ok(Box::new(FnQuestBehavior::new(move |handle| {
            if !(1..=3).contains(&handle.value()) {
                return None;
            }
            let state: Rc<dyn StateBehavior> = Rc::new(
                FnStateBehavior::new()
                    .on_enter(logging(&sink, "enter", handle))
                    .on_init(logging(&sink, "init", handle))
                    .on_deinit(logging(&sink, "deinit", handle))
                    .on_exit(logging(&sink, "exit", handle)),
            );
            Some(state)
        })))
    }

    fn manager_with(toml: &str) -> (QuestManager, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let mut manager = QuestManager::new(sink.clone());
        let definition = QuestDefinition::from_toml(toml).unwrap();
        manager.add_quest(Arc::new(definition));
        (manager, sink)
    }

    fn journey() -> (QuestManager, Arc<MemorySink>) {
        let (mut manager, sink) = manager_with(JOURNEY);
        manager.registry_mut().register_fn("journey", journaling);
        (manager, sink)
    }

    #[test]
    fn test_initialize_enters_start_state() {
        let (mut manager, sink) = journey();
        let events = manager.initialize("journey").unwrap();

        assert_eq!(
            events,
            vec![
                QuestEvent::StatusChanged {
                    quest_id: "journey".to_string(),
                    from: QuestStatus::Inactive,
                    to: QuestStatus::Active,
                },
                QuestEvent::StateEntered {
                    quest_id: "journey".to_string(),
                    from: None,
                    to: StateHandle::new(1),
                },
            ]
        );
        assert_eq!(manager.status("journey"), Some(QuestStatus::Active));
        assert_eq!(sink.messages(), vec!["enter 1", "init 1"]);
    }

    #[test]
    fn test_unknown_state_is_an_event() {
        let (mut manager, sink) = journey();
        manager.initialize("journey").unwrap();
        sink.clear();

        let events = manager.request_state("journey", StateHandle::new(9)).unwrap();
        assert_eq!(events[0].event_type(), "unknown_state");
        assert_eq!(manager.current_state("journey"), Some(StateHandle::new(1)));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_deactivate_and_resume() {
        let (mut manager, sink) = journey();
        manager.initialize("journey").unwrap();
        manager.request_state("journey", StateHandle::new(2)).unwrap();

        manager.set_status("journey", QuestStatus::Inactive).unwrap();
        assert_eq!(manager.current_state("journey"), Some(StateHandle::new(2)));

        let err = manager.request_state("journey", StateHandle::new(3)).unwrap_err();
        assert!(matches!(err, QuestError::InvalidStatus { status: QuestStatus::Inactive, .. }));

        let events = manager.set_status("journey", QuestStatus::Active).unwrap();
        assert_eq!(
            events.last(),
            Some(&QuestEvent::StateResumed {
                quest_id: "journey".to_string(),
                state: StateHandle::new(2),
            })
        );
        assert_eq!(
            sink.messages(),
            vec![
                "enter 1", "init 1", "deinit 1", "exit 1", "enter 2", "init 2", "deinit 2",
                "init 2"
            ]
        );
    }

    #[test]
    fn test_reset_returns_to_start() {
        let (mut manager, _) = journey();
        manager.initialize("journey").unwrap();
        manager.request_state("journey", StateHandle::new(3)).unwrap();

        let events = manager.reset("journey").unwrap();
        assert_eq!(
            events,
            vec![QuestEvent::StateEntered {
                quest_id: "journey".to_string(),
                from: Some(StateHandle::new(3)),
                to: StateHandle::new(1),
            }]
        );
    }

    #[test]
    fn test_activation_without_behavior() {
        let (mut manager, _) = manager_with(JOURNEY);
        let err = manager.initialize("journey").unwrap_err();
        assert!(matches!(err, QuestError::NoBehavior(_)));
        assert_eq!(manager.status("journey"), Some(QuestStatus::Inactive));

        let err = manager.update("missing").unwrap_err();
        assert!(matches!(err, QuestError::QuestNotFound(_)));
    }

    const CHAIN_SCRIPT: &str = r#"
local interface = {}

local function state(id, next_id)
    return {
        on_enter = function(self)
            print("enter " .. id)
            interface.quest.set("steps", interface.quest.get("steps") + 1)
            if next_id then interface.quest.request_state(next_id) end
        end,
    }
end

local states = { [1] = state(1, 2), [2] = state(2, 3), [3] = state(3, nil) }

function interface:resolve(id)
    return states[id]
end

journey = interface
"#;

    #[test]
    fn test_queued_requests_run_in_order() {
        let (mut manager, sink) = manager_with(
            &JOURNEY.replace("default_status = \"active\"", "interface = \"journey\""),
        );
        manager.register_behavior(
            "journey",
            lua_factory("chain.lua".to_string(), CHAIN_SCRIPT.to_string()),
        );

        let events = manager.set_status("journey", QuestStatus::Active).unwrap();
        let entered: Vec<StateHandle> = events
            .iter()
            .filter_map(|e| match e {
                QuestEvent::StateEntered { to, .. } => Some(*to),
                _ => None,
            })
            .collect();

        assert_eq!(entered, vec![StateHandle::new(1), StateHandle::new(2), StateHandle::new(3)]);
        assert_eq!(sink.messages(), vec!["enter 1", "enter 2", "enter 3"]);
        assert_eq!(manager.variable("journey", "steps"), Some(VariableValue::Integer(3)));
    }

    #[test]
    fn test_endless_requests_are_cut_off() {
        let script = r#"
quest = {}
local ping = { on_enter = function(self) quest.quest.request_state(2) end }
local pong = { on_enter = function(self) quest.quest.request_state(1) end }
function quest:resolve(id)
    if id == 1 then return ping end
    if id == 2 then return pong end
end
"#;
        let (mut manager, _) = journey();
        manager.register_behavior("journey", lua_factory("loop.lua".to_string(), script.to_string()));

        let events = manager.initialize("journey").unwrap();
        let entered = events.iter().filter(|e| e.event_type() == "state_entered").count();
        assert_eq!(entered, 1 + MAX_QUEUED_TRANSITIONS);
        assert!(matches!(
            events.last(),
            Some(QuestEvent::RequestsDropped { count: 1, .. })
        ));
    }

    #[test]
    fn test_snapshot_and_restore() {
        let (mut manager, _) = journey();
        manager.initialize("journey").unwrap();
        manager.request_state("journey", StateHandle::new(3)).unwrap();
        manager.quests["journey"]
            .context
            .variables
            .lock()
            .unwrap()
            .set("steps", VariableValue::Integer(7))
            .unwrap();

        let json = manager.snapshot("journey").unwrap().to_json().unwrap();

        let (mut restored, sink) = journey();
        let snapshot = QuestSnapshot::from_json(&json).unwrap();
        let events = restored.restore(&snapshot).unwrap();

        assert_eq!(restored.status("journey"), Some(QuestStatus::Active));
        assert_eq!(restored.current_state("journey"), Some(StateHandle::new(3)));
        assert_eq!(restored.variable("journey", "steps"), Some(VariableValue::Integer(7)));
        assert_eq!(sink.messages(), vec!["init 3"]);
        assert_eq!(events.last().map(|e| e.event_type()), Some("state_resumed"));
    }

    #[test]
    fn test_load_quests_keeps_running_ones() {
        let (mut manager, _) = journey();
        manager.initialize("journey").unwrap();

        let journey = QuestDefinition::from_toml(JOURNEY).unwrap();
        let other = QuestDefinition::from_toml(&JOURNEY.replace("\"journey\"", "\"errand\"")).unwrap();
        let added = manager.load_quests(vec![Arc::new(journey), Arc::new(other)]);

        assert_eq!(added, vec!["errand".to_string()]);
        assert_eq!(manager.status("journey"), Some(QuestStatus::Active));
        assert_eq!(manager.quest_ids(), vec!["errand".to_string(), "journey".to_string()]);
    }

    #[test]
    fn test_restore_rejects_undeclared_state() {
        let toml = format!("{}\n[[quest.states]]\nid = 1\n\n[[quest.states]]\nid = 2\n", JOURNEY);
        let (mut manager, _) = manager_with(&toml);
        manager.registry_mut().register_fn("journey", journaling);

        let mut snapshot = manager.snapshot("journey").unwrap();
        snapshot.current_state = Some(StateHandle::new(3));
        let err = manager.restore(&snapshot).unwrap_err();
        assert!(matches!(err, QuestError::Definition(_)));
        assert_eq!(manager.status("journey"), Some(QuestStatus::Inactive));
    }

    #[test]
    fn test_finish_exits_state() {
        let (mut manager, sink) = journey();
        manager.initialize("journey").unwrap();

        let events = manager.set_status("journey", QuestStatus::Finished).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(sink.messages(), vec!["enter 1", "init 1", "deinit 1", "exit 1"]);
        assert!(manager.status("journey").unwrap().is_terminal());

        // Coming back from a terminal status enters the state again
        manager.set_status("journey", QuestStatus::Active).unwrap();
        assert_eq!(sink.messages()[4..], ["enter 1", "init 1"]);
    }

    #[test]
    fn test_failed_enter_drops_queued_requests() {
        let script = r#"
quest = {}
local first = {
    on_enter = function(self)
        quest.quest.request_state(2)
        error("boom")
    end,
}
local second = { on_enter = function(self) print("enter 2") end }
function quest:resolve(id)
    if id == 1 then return first end
    if id == 2 then return second end
end
"#;
        let (mut manager, sink) = journey();
        manager.register_behavior("journey", lua_factory("boom.lua".to_string(), script.to_string()));

        let err = manager.set_status("journey", QuestStatus::Active).unwrap_err();
        assert!(matches!(err, QuestError::Script(msg) if msg.contains("boom")));
        assert_eq!(manager.status("journey"), Some(QuestStatus::Active));
        assert!(manager.quests["journey"].context.requests.is_empty());

        // The request queued before the failure never runs later
        let events = manager.update("journey").unwrap();
        assert!(events.is_empty());
        assert!(!sink.messages().iter().any(|m| m == "enter 2"));
        assert_eq!(manager.current_state("journey"), Some(StateHandle::new(1)));
    }

    const CAMP_SCRIPT: &str = r#"
quest = {}
local camp = {
    on_enter = function(self)
        quest.quest.set("steps", quest.quest.get("steps") + 10)
    end,
    on_init = function(self) print("init camp") end,
    on_deinit = function(self) print("deinit camp") end,
}
function quest:resolve(id)
    if id == 1 then return camp end
end
"#;

    #[test]
    fn test_pause_and_restore_do_not_replay_enter() {
        let (mut manager, sink) = journey();
        manager.register_behavior("journey", lua_factory("camp.lua".to_string(), CAMP_SCRIPT.to_string()));

        manager.initialize("journey").unwrap();
        manager.set_status("journey", QuestStatus::Inactive).unwrap();
        manager.set_status("journey", QuestStatus::Active).unwrap();
        assert_eq!(manager.variable("journey", "steps"), Some(VariableValue::Integer(10)));
        assert_eq!(sink.messages(), vec!["init camp", "deinit camp", "init camp"]);

        let json = manager.snapshot("journey").unwrap().to_json().unwrap();
        let (mut restored, restored_sink) = journey();
        restored.register_behavior("journey", lua_factory("camp.lua".to_string(), CAMP_SCRIPT.to_string()));
        restored.restore(&QuestSnapshot::from_json(&json).unwrap()).unwrap();
        assert_eq!(restored.variable("journey", "steps"), Some(VariableValue::Integer(10)));
        assert_eq!(restored_sink.messages(), vec!["init camp"]);

        // Finishing exits the state, so the next activation enters it again
        restored.set_status("journey", QuestStatus::Finished).unwrap();
        restored.set_status("journey", QuestStatus::Active).unwrap();
        assert_eq!(restored.variable("journey", "steps"), Some(VariableValue::Integer(20)));
    }

    #[test]
    fn test_custom_data_survives_snapshot_and_pause() {
        let script = r#"
quest = { seen = 0 }
local camp = { on_update = function(self) quest.seen = quest.seen + 1 end }
function quest:resolve(id)
    if id == 1 then return camp end
end
function quest:save() return { seen = self.seen } end
function quest:load(data) self.seen = data.seen end
"#;
        let factory = lua_factory("seen.lua".to_string(), script.to_string());
        let (mut manager, _) = journey();
        manager.register_behavior("journey", Arc::clone(&factory));

        manager.initialize("journey").unwrap();
        manager.update("journey").unwrap();
        manager.update("journey").unwrap();
        let snapshot = manager.snapshot("journey").unwrap();
        assert_eq!(snapshot.custom, Some(serde_json::json!({ "seen": 2 })));

        let (mut restored, _) = journey();
        restored.register_behavior("journey", factory);
        let json = snapshot.to_json().unwrap();
        restored.restore(&QuestSnapshot::from_json(&json).unwrap()).unwrap();
        restored.update("journey").unwrap();
        assert_eq!(
            restored.snapshot("journey").unwrap().custom,
            Some(serde_json::json!({ "seen": 3 }))
        );

        // Pausing hands the data to the next behavior
        restored.set_status("journey", QuestStatus::Inactive).unwrap();
        assert_eq!(
            restored.snapshot("journey").unwrap().custom,
            Some(serde_json::json!({ "seen": 3 }))
        );
        restored.set_status("journey", QuestStatus::Active).unwrap();
        restored.update("journey").unwrap();
        assert_eq!(
            restored.snapshot("journey").unwrap().custom,
            Some(serde_json::json!({ "seen": 4 }))
        );
    }

    #[test]
    fn test_changed_definition_is_kept_until_restart() {
        let (mut manager, _) = journey();
        manager.initialize("journey").unwrap();

        let changed = QuestDefinition::from_toml(&JOURNEY.replace("start_state = 1", "start_state = 2")).unwrap();
        let added = manager.load_quests(vec![Arc::new(changed)]);

        assert!(added.is_empty());
        let definition = manager.definition("journey").unwrap();
        assert_eq!(definition.start_state, StateHandle::new(1));
        assert_eq!(manager.status("journey"), Some(QuestStatus::Active));
    }
}
