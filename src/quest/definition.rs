//! Quest Definition Structures
//!
//! These structures are deserialized from TOML quest files.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::warn;

use super::behavior::StateHandle;
use super::state::{QuestStatus, VariableType, VariableValue};

/// A quest definition file
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestFile {
    pub quest: RawQuest,
}

/// Raw quest data as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuest {
    pub id: String,
    pub name: Option<String>,
    pub start_state: i64,
    /// Status the quest starts in: inactive, active, finished, aborted
    pub default_status: Option<String>,
    /// Lua script implementing the quest behavior
    pub script: Option<String>,
    /// Name of the global table in the script that resolves states
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default)]
    pub variables: Vec<RawVariable>,
    #[serde(default)]
    pub states: Vec<RawState>,
}

fn default_interface() -> String {
    "quest".to_string()
}

/// Raw variable declaration
#[derive(Debug, Clone, Deserialize)]
pub struct RawVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub variable_type: Option<String>,
    pub default: Option<toml::Value>,
}

/// Raw state declaration
#[derive(Debug, Clone, Deserialize)]
pub struct RawState {
    pub id: i64,
    pub name: Option<String>,
}

// ============================================================================
// Resolved Quest Structures (after parsing)
// ============================================================================

/// A declared quest variable
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub variable_type: VariableType,
    pub default: VariableValue,
}

impl VariableDefinition {
    /// Resolve a raw declaration. Returns `None` when the type is missing or
    /// unknown; a default of the wrong type falls back to the zero value.
    pub fn from_raw(quest_id: &str, raw: &RawVariable) -> Option<Self> {
        let Some(type_name) = raw.variable_type.as_deref() else {
            warn!("Quest '{}': variable '{}' has no type, skipping", quest_id, raw.name);
            return None;
        };
        let Some(variable_type) = VariableType::from_str(type_name) else {
            warn!(
                "Quest '{}': variable '{}' has unknown type '{}', skipping",
                quest_id, raw.name, type_name
            );
            return None;
        };

        let default = match &raw.default {
            None => variable_type.zero_value(),
            Some(value) => toml_to_variable(value)
                .and_then(|v| v.coerce(variable_type))
                .unwrap_or_else(|| {
                    warn!(
                        "Quest '{}': default for '{}' is not a {:?}, using zero value",
                        quest_id, raw.name, variable_type
                    );
                    variable_type.zero_value()
                }),
        };

        Some(Self {
            name: raw.name.clone(),
            variable_type,
            default,
        })
    }
}

fn toml_to_variable(value: &toml::Value) -> Option<VariableValue> {
    match value {
        toml::Value::Boolean(b) => Some(VariableValue::Boolean(*b)),
        toml::Value::Integer(i) => Some(VariableValue::Integer(*i)),
        toml::Value::Float(f) => Some(VariableValue::Float(*f)),
        toml::Value::String(s) => Some(VariableValue::String(s.clone())),
        _ => None,
    }
}

/// A declared quest state
#[derive(Debug, Clone, PartialEq)]
pub struct StateDefinition {
    pub handle: StateHandle,
    pub name: Option<String>,
}

/// A fully resolved quest definition
#[derive(Debug, Clone, PartialEq)]
pub struct QuestDefinition {
    pub id: String,
    pub name: String,
    pub start_state: StateHandle,
    pub default_status: QuestStatus,
    /// Script path relative to the scripts directory
    pub script: Option<String>,
    /// Global table in the script implementing the quest behavior
    pub interface: String,
    pub variables: Vec<VariableDefinition>,
    /// Declared states. Empty means the script alone decides which handles exist.
    pub states: Vec<StateDefinition>,
}

impl QuestDefinition {
    /// Create a QuestDefinition from raw TOML data
    pub fn from_raw(raw: &RawQuest) -> Result<Self, String> {
        let default_status = match raw.default_status.as_deref() {
            None => QuestStatus::Inactive,
            Some(s) => QuestStatus::from_str(s).unwrap_or_else(|| {
                warn!(
                    "Quest '{}': unrecognized default status '{}', using inactive",
                    raw.id, s
                );
                QuestStatus::Inactive
            }),
        };

        let mut seen = HashSet::new();
        for state in &raw.states {
            if !seen.insert(state.id) {
                return Err(format!("Quest '{}' declares state {} twice", raw.id, state.id));
            }
        }
        if !raw.states.is_empty() && !seen.contains(&raw.start_state) {
            return Err(format!(
                "Quest '{}' starts in undeclared state {}",
                raw.id, raw.start_state
            ));
        }

        let variables = raw.variables
            .iter()
            .filter_map(|v| VariableDefinition::from_raw(&raw.id, v))
            .collect();

        let states = raw.states
            .iter()
            .map(|s| StateDefinition {
                handle: StateHandle::new(s.id),
                name: s.name.clone(),
            })
            .collect();

        Ok(Self {
            id: raw.id.clone(),
            name: raw.name.clone().unwrap_or_else(|| raw.id.clone()),
            start_state: StateHandle::new(raw.start_state),
            default_status,
            script: raw.script.clone(),
            interface: raw.interface.clone(),
            variables,
            states,
        })
    }

    /// Parse a whole quest file
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let raw: RawQuestFile = toml::from_str(content)
            .map_err(|e| format!("Failed to parse quest: {}", e))?;
        Self::from_raw(&raw.quest)
    }

    /// Check if this quest has a script behind it
    pub fn has_script(&self) -> bool {
        self.script.is_some()
    }

    /// Get a declared state by handle
    pub fn get_state(&self, handle: StateHandle) -> Option<&StateDefinition> {
        self.states.iter().find(|s| s.handle == handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WOLF_HUNT: &str = r#"
[quest]
id = "wolf_hunt"
name = "Wolf Hunt"
start_state = 1
default_status = "active"
script = "wolf_hunt.lua"
interface = "wolf_hunt"

[[quest.variables]]
name = "wolves_killed"
type = "integer"
default = 0

[[quest.variables]]
name = "reward"
type = "double"
default = 12

[[quest.variables]]
name = "mystery"

[[quest.states]]
id = 1
name = "Talk to the hunter"

[[quest.states]]
id = 2
"#;

    #[test]
    fn test_parse_quest() {
        let quest = QuestDefinition::from_toml(WOLF_HUNT).unwrap();
        assert_eq!(quest.id, "wolf_hunt");
        assert_eq!(quest.name, "Wolf Hunt");
        assert_eq!(quest.start_state, StateHandle::new(1));
        assert_eq!(quest.default_status, QuestStatus::Active);
        assert_eq!(quest.interface, "wolf_hunt");
        assert!(quest.has_script());

        // Untyped variable is skipped
        assert_eq!(quest.variables.len(), 2);
        assert_eq!(quest.variables[1].default, VariableValue::Float(12.0));

        let state = quest.get_state(StateHandle::new(1)).unwrap();
        assert_eq!(state.name.as_deref(), Some("Talk to the hunter"));
        assert!(quest.get_state(StateHandle::new(3)).is_none());
    }

    #[test]
    fn test_defaults() {
        let quest = QuestDefinition::from_toml(
            r#"
[quest]
id = "bare"
start_state = 5
default_status = "sleeping"
"#,
        )
        .unwrap();

        assert_eq!(quest.name, "bare");
        assert_eq!(quest.interface, "quest");
        assert_eq!(quest.default_status, QuestStatus::Inactive);
        assert!(quest.states.is_empty());
        assert!(!quest.has_script());
    }

    #[test]
    fn test_start_state_must_be_declared() {
        let err = QuestDefinition::from_toml(
            r#"
[quest]
id = "broken"
start_state = 3

[[quest.states]]
id = 1
"#,
        )
        .unwrap_err();
        assert!(err.contains("undeclared state 3"));
    }

    #[test]
    fn test_duplicate_states_rejected() {
        let err = QuestDefinition::from_toml(
            r#"
[quest]
id = "twice"
start_state = 1

[[quest.states]]
id = 1

[[quest.states]]
id = 1
"#,
        )
        .unwrap_err();
        assert!(err.contains("twice"));
    }
}
