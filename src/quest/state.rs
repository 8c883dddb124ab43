//! Quest State Tracking
//!
//! Quest status, typed quest variables, and the persisted snapshot of a quest.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::behavior::StateHandle;
use super::definition::VariableDefinition;
use super::error::QuestError;

/// Status of a quest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    /// Known but not running; states are not entered
    Inactive,
    /// Running; the controller has a bound behavior
    Active,
    /// Completed
    Finished,
    /// Given up
    Aborted,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Inactive => "inactive",
            QuestStatus::Active => "active",
            QuestStatus::Finished => "finished",
            QuestStatus::Aborted => "aborted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inactive" => Some(QuestStatus::Inactive),
            "active" => Some(QuestStatus::Active),
            "finished" => Some(QuestStatus::Finished),
            "aborted" => Some(QuestStatus::Aborted),
            _ => None,
        }
    }

    /// Check if the quest is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, QuestStatus::Finished | QuestStatus::Aborted)
    }
}

/// Declared type of a quest variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Boolean,
    Integer,
    Float,
    String,
}

impl VariableType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "boolean" | "bool" => Some(VariableType::Boolean),
            "integer" | "int" => Some(VariableType::Integer),
            "float" | "double" => Some(VariableType::Float),
            "string" => Some(VariableType::String),
            _ => None,
        }
    }

    /// Value a variable holds when no default is given
    pub fn zero_value(&self) -> VariableValue {
        match self {
            VariableType::Boolean => VariableValue::Boolean(false),
            VariableType::Integer => VariableValue::Integer(0),
            VariableType::Float => VariableValue::Float(0.0),
            VariableType::String => VariableValue::String(String::new()),
        }
    }
}

/// Value of a quest variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl VariableValue {
    /// Convert to the declared type; integers widen to floats
    pub fn coerce(self, ty: VariableType) -> Option<Self> {
        match (ty, self) {
            (VariableType::Boolean, v @ VariableValue::Boolean(_)) => Some(v),
            (VariableType::Integer, v @ VariableValue::Integer(_)) => Some(v),
            (VariableType::Float, v @ VariableValue::Float(_)) => Some(v),
            (VariableType::Float, VariableValue::Integer(i)) => Some(VariableValue::Float(i as f64)),
            (VariableType::String, v @ VariableValue::String(_)) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            VariableValue::Boolean(_) => "boolean",
            VariableValue::Integer(_) => "integer",
            VariableValue::Float(_) => "float",
            VariableValue::String(_) => "string",
        }
    }
}

/// Typed variables of one quest
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    declared: HashMap<String, VariableType>,
    values: HashMap<String, VariableValue>,
}

/// Variable store shared between the host and a quest's script
pub type SharedVariables = Arc<Mutex<VariableStore>>;

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare every variable and set it to its default
    pub fn from_definitions(definitions: &[VariableDefinition]) -> Self {
        let mut store = Self::new();
        for def in definitions {
            store.declared.insert(def.name.clone(), def.variable_type);
            store.values.insert(def.name.clone(), def.default.clone());
        }
        store
    }

    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.values.get(name)
    }

    /// Set a declared variable, rejecting values of the wrong type
    pub fn set(&mut self, name: &str, value: VariableValue) -> Result<(), QuestError> {
        let ty = *self.declared.get(name)
            .ok_or_else(|| QuestError::Variable(format!("'{}' is not declared", name)))?;

        let found = value.type_name();
        let value = value.coerce(ty).ok_or_else(|| {
            QuestError::Variable(format!("'{}' expects {:?}, got {}", name, ty, found))
        })?;

        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// All values, ordered by name for stable output
    pub fn snapshot(&self) -> BTreeMap<String, VariableValue> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Load saved values. Undeclared or mistyped entries are skipped.
    pub fn restore(&mut self, saved: &BTreeMap<String, VariableValue>) {
        for (name, value) in saved {
            if let Err(e) = self.set(name, value.clone()) {
                warn!("Skipping saved variable: {}", e);
            }
        }
    }
}

/// Persisted progress of one quest.
///
/// Only the active state's handle is stored; state behaviors belong to the
/// script and are rebuilt on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestSnapshot {
    pub quest_id: String,
    pub status: QuestStatus,
    pub current_state: Option<StateHandle>,
    /// Whether `current_state` was entered and not yet exited. A restored
    /// quest only re-initializes such a state.
    #[serde(default = "entered_by_default")]
    pub state_entered: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, VariableValue>,
    /// Whatever the quest behavior's `save` returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
    pub saved_at: DateTime<Utc>,
}

fn entered_by_default() -> bool {
    true
}

impl QuestSnapshot {
    pub fn to_json(&self) -> Result<String, QuestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, QuestError> {
        Ok(serde_json::from_str(json)?)
    }
}
