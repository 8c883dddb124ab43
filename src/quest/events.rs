//! Quest Event Types
//!
//! What happened to a quest during a manager operation.

use serde::Serialize;

use super::behavior::StateHandle;
use super::state::QuestStatus;

/// Outcome of a quest operation, in the order things happened
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QuestEvent {
    /// A state was entered
    StateEntered {
        quest_id: String,
        /// State that was exited first, if any
        from: Option<StateHandle>,
        to: StateHandle,
    },

    /// A state entered earlier was picked up again after a pause or a load
    StateResumed {
        quest_id: String,
        state: StateHandle,
    },

    /// A requested state could not be resolved; nothing changed
    UnknownState {
        quest_id: String,
        handle: StateHandle,
    },

    /// The quest moved to another status
    StatusChanged {
        quest_id: String,
        from: QuestStatus,
        to: QuestStatus,
    },

    /// Script requests dropped because the quest was not active or kept
    /// requesting new states
    RequestsDropped {
        quest_id: String,
        count: usize,
    },
}

impl QuestEvent {
    /// Get the quest ID associated with this event
    pub fn quest_id(&self) -> &str {
        match self {
            QuestEvent::StateEntered { quest_id, .. } => quest_id,
            QuestEvent::StateResumed { quest_id, .. } => quest_id,
            QuestEvent::UnknownState { quest_id, .. } => quest_id,
            QuestEvent::StatusChanged { quest_id, .. } => quest_id,
            QuestEvent::RequestsDropped { quest_id, .. } => quest_id,
        }
    }

    /// Get event type as string (for logging/debugging)
    pub fn event_type(&self) -> &'static str {
        match self {
            QuestEvent::StateEntered { .. } => "state_entered",
            QuestEvent::StateResumed { .. } => "state_resumed",
            QuestEvent::UnknownState { .. } => "unknown_state",
            QuestEvent::StatusChanged { .. } => "status_changed",
            QuestEvent::RequestsDropped { .. } => "requests_dropped",
        }
    }
}
