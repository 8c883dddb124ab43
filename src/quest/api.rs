//! Quest Lua API
//!
//! Defines the context handed to behavior factories and the `quest` table
//! exposed to Lua scripts.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use mlua::{IntoLua, Lua, Result as LuaResult, Table, Value, Variadic};

use super::behavior::StateHandle;
use super::sink::LogSink;
use super::state::{SharedVariables, VariableStore, VariableValue};

/// State requests made by a script, applied by the host once the current
/// controller operation has returned
#[derive(Debug, Clone, Default)]
pub struct RequestQueue {
    pending: Arc<Mutex<VecDeque<StateHandle>>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, handle: StateHandle) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(handle);
    }

    pub fn pop(&self) -> Option<StateHandle> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Drop every pending request, returning how many there were
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a behavior factory may hand to the behavior it builds
#[derive(Clone)]
pub struct QuestContext {
    /// The quest being bound
    pub quest_id: String,
    /// Global table in the script implementing the quest
    pub interface: String,
    /// Quest variables, shared with the host
    pub variables: SharedVariables,
    /// Deferred state requests
    pub requests: RequestQueue,
    /// Diagnostic output
    pub sink: Arc<dyn LogSink>,
}

impl QuestContext {
    pub fn new(quest_id: &str, interface: &str, variables: VariableStore, sink: Arc<dyn LogSink>) -> Self {
        Self {
            quest_id: quest_id.to_string(),
            interface: interface.to_string(),
            variables: Arc::new(Mutex::new(variables)),
            requests: RequestQueue::new(),
            sink,
        }
    }

    pub fn get_variable(&self, name: &str) -> Option<VariableValue> {
        self.variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl IntoLua for VariableValue {
    fn into_lua(self, lua: &Lua) -> LuaResult<Value> {
        Ok(match self {
            VariableValue::Boolean(b) => Value::Boolean(b),
            VariableValue::Integer(i) => Value::Integer(i),
            VariableValue::Float(f) => Value::Number(f),
            VariableValue::String(s) => Value::String(lua.create_string(&s)?),
        })
    }
}

fn variable_from_lua(value: Value) -> LuaResult<VariableValue> {
    match value {
        Value::Boolean(b) => Ok(VariableValue::Boolean(b)),
        Value::Integer(i) => Ok(VariableValue::Integer(i)),
        Value::Number(n) => Ok(VariableValue::Float(n)),
        Value::String(s) => Ok(VariableValue::String(s.to_str()?.to_string())),
        other => Err(mlua::Error::RuntimeError(format!(
            "quest variables cannot hold a {}",
            other.type_name()
        ))),
    }
}

/// Render a Lua value the way `print` does for plain values
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}

/// Format a float like Lua's `%.14g`, keeping a `.0` on integral values
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let scientific = format!("{:.13e}", n);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    let text = if !(-4..14).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = (13 - exponent) as usize;
        trim_fraction(&format!("{:.*}", decimals, n)).to_string()
    };

    if text.chars().all(|c| c == '-' || c.is_ascii_digit()) {
        format!("{}.0", text)
    } else {
        text
    }
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}

/// Replace `print` with a function that writes to the quest's sink
pub fn install_print(lua: &Lua, sink: Arc<dyn LogSink>) -> LuaResult<()> {
    let print = lua.create_function(move |_, args: Variadic<Value>| {
        let line = args.iter().map(display_value).collect::<Vec<_>>().join("\t");
        sink.log(&line);
        Ok(())
    })?;
    lua.globals().set("print", print)
}

/// Build the `quest` host table and attach it to the script's interface table
pub fn install_host_table(lua: &Lua, interface: &Table, ctx: &QuestContext) -> LuaResult<()> {
    let host = lua.create_table()?;
    host.set("id", ctx.quest_id.clone())?;

    let requests = ctx.requests.clone();
    host.set(
        "request_state",
        lua.create_function(move |_, id: i64| {
            requests.push(StateHandle::new(id));
            Ok(())
        })?,
    )?;

    let variables = Arc::clone(&ctx.variables);
    host.set(
        "get",
        lua.create_function(move |lua, name: String| {
            let value = variables
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&name)
                .cloned();
            match value {
                Some(value) => value.into_lua(lua),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    let variables = Arc::clone(&ctx.variables);
    host.set(
        "set",
        lua.create_function(move |_, (name, value): (String, Value)| {
            let value = variable_from_lua(value)?;
            variables
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set(&name, value)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))
        })?,
    )?;

    let sink = Arc::clone(&ctx.sink);
    host.set(
        "log",
        lua.create_function(move |_, message: String| {
            sink.log(&message);
            Ok(())
        })?,
    )?;

    interface.set("quest", host)
}
