//! Quest Errors
//!
//! Error taxonomy for the quest dispatch layer and its embedding.

use thiserror::Error;

use super::behavior::StateHandle;
use super::state::QuestStatus;

/// Errors raised by quest controllers, behaviors, and the quest manager
#[derive(Debug, Error)]
pub enum QuestError {
    /// The quest behavior has no state for this handle.
    /// Recoverable: the previous state stays active.
    #[error("unknown state {0}")]
    UnknownState(StateHandle),

    /// A behavior is already bound to the controller
    #[error("a quest behavior is already bound")]
    AlreadyBound,

    /// No behavior is bound to the controller
    #[error("no quest behavior is bound")]
    NotBound,

    /// A lifecycle callback tried to drive its own controller
    #[error("re-entrant state transition")]
    ReentrantTransition,

    /// A script callback failed or returned something unusable
    #[error("script error: {0}")]
    Script(String),

    /// A quest definition is malformed
    #[error("invalid quest definition: {0}")]
    Definition(String),

    /// No quest with this ID is loaded
    #[error("quest '{0}' not found")]
    QuestNotFound(String),

    /// No behavior factory is registered for the quest
    #[error("no behavior registered for quest '{0}'")]
    NoBehavior(String),

    /// The operation is not allowed in the quest's current status
    #[error("quest '{quest_id}' is {status:?}")]
    InvalidStatus {
        quest_id: String,
        status: QuestStatus,
    },

    /// A quest variable was undeclared or assigned the wrong type
    #[error("variable error: {0}")]
    Variable(String),

    /// Snapshot (de)serialization failed
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl QuestError {
    /// Whether the quest system can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QuestError::UnknownState(_))
    }
}

impl From<mlua::Error> for QuestError {
    fn from(err: mlua::Error) -> Self {
        QuestError::Script(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unknown_state_is_recoverable() {
        assert!(QuestError::UnknownState(StateHandle::new(3)).is_recoverable());
        assert!(!QuestError::NotBound.is_recoverable());
        assert!(!QuestError::AlreadyBound.is_recoverable());
        assert!(!QuestError::ReentrantTransition.is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            QuestError::UnknownState(StateHandle::new(99)).to_string(),
            "unknown state 99"
        );
        assert_eq!(
            QuestError::QuestNotFound("intro".to_string()).to_string(),
            "quest 'intro' not found"
        );
    }
}
