//! Quest Script Runner
//!
//! Lua-backed quest behaviors. Each bound quest gets its own sandboxed Lua
//! state; the script's interface table resolves state handles to state tables.
//!
//! ```lua
//! local greeting = {
//!     on_enter = function(self) print("Hello there!") end,
//! }
//!
//! quest = {
//!     resolve = function(self, id)
//!         if id == 1 then return greeting end
//!         return nil
//!     end,
//!     -- optional
//!     init = function(self) end,
//!     save = function(self) return { seen = true } end,
//!     load = function(self, data) end,
//! }
//! ```
//!
//! States may define `on_enter`, `on_init`, `on_update`, `on_deinit` and
//! `on_exit`. Whatever `save` returns must be plain data (tables, strings,
//! numbers, booleans); it is stored as JSON in the quest snapshot.

use std::rc::Rc;
use std::sync::Arc;

use mlua::{Function, Lua, LuaSerdeExt, Result as LuaResult, SerializeOptions, Table, Value};
use tracing::debug;

use super::api::{install_host_table, install_print, QuestContext};
use super::behavior::{QuestBehavior, StateBehavior, StateHandle};
use super::error::QuestError;
use super::registry::BehaviorFactory;

/// A sandboxed Lua state for one quest
pub struct ScriptHost {
    lua: Lua,
}

impl ScriptHost {
    pub fn new(ctx: &QuestContext) -> LuaResult<Self> {
        let lua = Lua::new();

        let globals = lua.globals();
        globals.set("os", Value::Nil)?;
        globals.set("io", Value::Nil)?;
        globals.set("loadfile", Value::Nil)?;
        globals.set("dofile", Value::Nil)?;
        globals.set("require", Value::Nil)?;

        install_print(&lua, Arc::clone(&ctx.sink))?;

        Ok(Self { lua })
    }

    pub fn load_script(&self, script_name: &str, source: &str) -> LuaResult<()> {
        self.lua.load(source).set_name(script_name).exec()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.lua.globals().get::<Table>(name).is_ok()
    }

    /// Turn the script's interface table into a quest behavior
    pub fn into_behavior(self, ctx: &QuestContext) -> Result<LuaQuestBehavior, QuestError> {
        let interface: Option<Table> = self.lua.globals().get(ctx.interface.as_str())?;
        let interface = interface.ok_or_else(|| {
            QuestError::Script(format!(
                "quest '{}' script defines no '{}' table",
                ctx.quest_id, ctx.interface
            ))
        })?;

        if interface.get::<Option<Function>>("resolve")?.is_none() {
            return Err(QuestError::Script(format!(
                "'{}' table of quest '{}' has no resolve function",
                ctx.interface, ctx.quest_id
            )));
        }

        install_host_table(&self.lua, &interface, ctx)?;

        Ok(LuaQuestBehavior {
            lua: Rc::new(self.lua),
            interface,
        })
    }
}

/// Quest behavior implemented by a Lua table with a `resolve(self, id)` method
pub struct LuaQuestBehavior {
    lua: Rc<Lua>,
    interface: Table,
}

impl LuaQuestBehavior {
    fn optional(&self, name: &str) -> Result<Option<Function>, QuestError> {
        Ok(self.interface.get::<Option<Function>>(name)?)
    }
}

impl QuestBehavior for LuaQuestBehavior {
    fn init(&self) -> Result<(), QuestError> {
        if let Some(init) = self.optional("init")? {
            init.call::<()>(self.interface.clone())?;
        }
        Ok(())
    }

    fn save(&self) -> Result<Option<serde_json::Value>, QuestError> {
        let Some(save) = self.optional("save")? else {
            return Ok(None);
        };
        match save.call::<Value>(self.interface.clone())? {
            Value::Nil => Ok(None),
            value => Ok(Some(self.lua.from_value(value)?)),
        }
    }

    fn load(&self, data: &serde_json::Value) -> Result<(), QuestError> {
        let Some(load) = self.optional("load")? else {
            return Ok(());
        };
        let options = SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false);
        let data = self.lua.to_value_with(data, options)?;
        load.call::<()>((self.interface.clone(), data))?;
        Ok(())
    }

    fn resolve(&self, handle: StateHandle) -> Result<Option<Rc<dyn StateBehavior>>, QuestError> {
        let resolve: Function = self.interface.get("resolve")?;
        match resolve.call::<Value>((self.interface.clone(), handle.value()))? {
            Value::Nil => Ok(None),
            Value::Table(table) => Ok(Some(Rc::new(LuaStateBehavior {
                _lua: Rc::clone(&self.lua),
                table,
            }))),
            other => Err(QuestError::Script(format!(
                "resolve({}) returned a {}, expected a table or nil",
                handle,
                other.type_name()
            ))),
        }
    }
}

/// State behavior implemented by a Lua table. Missing callbacks are no-ops.
pub struct LuaStateBehavior {
    // Keeps the Lua state alive while the controller holds this state
    _lua: Rc<Lua>,
    table: Table,
}

impl LuaStateBehavior {
    fn call(&self, name: &str) -> Result<(), QuestError> {
        if let Some(callback) = self.table.get::<Option<Function>>(name)? {
            callback.call::<()>(self.table.clone())?;
        }
        Ok(())
    }
}

impl StateBehavior for LuaStateBehavior {
    fn on_enter(&self) -> Result<(), QuestError> {
        self.call("on_enter")
    }

    fn on_init(&self) -> Result<(), QuestError> {
        self.call("on_init")
    }

    fn on_update(&self) -> Result<(), QuestError> {
        self.call("on_update")
    }

    fn on_deinit(&self) -> Result<(), QuestError> {
        self.call("on_deinit")
    }

    fn on_exit(&self) -> Result<(), QuestError> {
        self.call("on_exit")
    }
}

/// Factory that builds a fresh Lua behavior from `source` for every binding
pub fn lua_factory(script_name: String, source: String) -> BehaviorFactory {
    Arc::new(move |ctx: &QuestContext| -> Result<Box<dyn QuestBehavior>, QuestError> {
        let host = ScriptHost::new(ctx)?;
        host.load_script(&script_name, &source)?;
        debug!("Loaded script {} for quest {}", script_name, ctx.quest_id);
        let behavior = host.into_behavior(ctx)?;
        Ok(Box::new(behavior))
    })
}
