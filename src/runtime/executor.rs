/// Node executables
///
/// An [`Executable`] receives a snapshot of the run state plus the node's
/// static parameters and returns a delta to merge. Two implementations ship:
/// - [`FnExecutable`]: Rust closures registered at startup
/// - [`LuaExecutable`]: Lua scripts registered at runtime through the API

use crate::runtime::run::RunId;
use crate::workflow::{StateDelta, WorkflowState};
use anyhow::Result;
use futures::future::{self, BoxFuture, FutureExt};
use mlua::LuaSerdeExt;
use serde_json::{Map, Value};
use std::{future::Future, sync::Arc};

/// Everything a node sees when it runs
#[derive(Debug, Clone)]
pub struct Invocation {
    pub run_id: RunId,
    pub node: String,
    /// 1-based step number within the run
    pub step: usize,
    /// Owned copy of the state; changes to it are not seen by the run
    pub state: WorkflowState,
    pub params: Value,
}

/// Capability to execute one node step
pub trait Executable: Send + Sync + 'static {
    fn execute(&self, invocation: Invocation) -> BoxFuture<'_, Result<StateDelta>>;

    /// Short label for listings
    fn kind(&self) -> &'static str;
}

type BoxedFn = dyn Fn(Invocation) -> BoxFuture<'static, Result<StateDelta>> + Send + Sync;

/// Executable backed by a Rust closure
pub struct FnExecutable {
    f: Box<BoxedFn>,
}

impl FnExecutable {
    /// Wrap an async closure
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StateDelta>> + Send + 'static,
    {
        Self {
            f: Box::new(move |invocation| f(invocation).boxed()),
        }
    }

    /// Wrap a synchronous closure
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Invocation) -> Result<StateDelta> + Send + Sync + 'static,
    {
        Self::new(move |invocation| future::ready(f(&invocation)))
    }
}

impl Executable for FnExecutable {
    fn execute(&self, invocation: Invocation) -> BoxFuture<'_, Result<StateDelta>> {
        (self.f)(invocation)
    }

    fn kind(&self) -> &'static str {
        "builtin"
    }
}

impl std::fmt::Debug for FnExecutable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnExecutable")
    }
}

/// Executable backed by a Lua 5.4 script
///
/// The script sees two globals, `state` (user data) and `params`, and returns a
/// table that becomes the delta. Returning `nil` means "no changes". Each call
/// gets a fresh sandboxed interpreter on the blocking pool.
#[derive(Debug, Clone)]
pub struct LuaExecutable {
    script: Arc<str>,
}

impl LuaExecutable {
    /// Compile-check the script up front so registration fails fast
    pub fn new(script: impl Into<String>) -> Result<Self> {
        let script: String = script.into();
        let lua = sandboxed_lua()?;
        lua.load(script.as_str())
            .into_function()
            .map_err(|e| anyhow::anyhow!("Lua script does not compile: {}", e))?;
        Ok(Self { script: script.into() })
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

impl Executable for LuaExecutable {
    fn execute(&self, invocation: Invocation) -> BoxFuture<'_, Result<StateDelta>> {
        let script = Arc::clone(&self.script);
        async move {
            tokio::task::spawn_blocking(move || run_script(&script, &invocation))
                .await
                .map_err(|e| anyhow::anyhow!("Lua worker panicked: {}", e))?
        }
        .boxed()
    }

    fn kind(&self) -> &'static str {
        "lua"
    }
}

fn sandboxed_lua() -> Result<mlua::Lua> {
    let lua = mlua::Lua::new();
    let globals = lua.globals();
    for name in ["os", "io", "debug", "package", "require", "dofile", "loadfile"] {
        globals
            .set(name, mlua::Nil)
            .map_err(|e| anyhow::anyhow!("Failed to sandbox Lua global '{}': {}", name, e))?;
    }
    drop(globals);
    Ok(lua)
}

fn run_script(script: &str, invocation: &Invocation) -> Result<StateDelta> {
    tracing::debug!("🌙 Running Lua script for node '{}'", invocation.node);
    let lua = sandboxed_lua()?;

    let state = lua
        .to_value(invocation.state.data())
        .map_err(|e| anyhow::anyhow!("Failed to expose state to Lua: {}", e))?;
    let params = lua
        .to_value(&invocation.params)
        .map_err(|e| anyhow::anyhow!("Failed to expose params to Lua: {}", e))?;

    let globals = lua.globals();
    globals
        .set("state", state)
        .map_err(|e| anyhow::anyhow!("Failed to set Lua state: {}", e))?;
    globals
        .set("params", params)
        .map_err(|e| anyhow::anyhow!("Failed to set Lua params: {}", e))?;

    let result: mlua::Value = lua
        .load(script)
        .eval()
        .map_err(|e| anyhow::anyhow!("Lua script failed: {}", e))?;

    match result {
        mlua::Value::Nil => Ok(Map::new()),
        mlua::Value::Table(_) => match lua_to_json(result)? {
            Value::Object(delta) => Ok(delta),
            // an empty table has no keys to tell it apart from an empty array
            Value::Array(items) if items.is_empty() => Ok(Map::new()),
            _ => Err(anyhow::anyhow!("Lua script must return a table with string keys")),
        },
        other => Err(anyhow::anyhow!(
            "Lua script must return a table or nil, got {}",
            other.type_name()
        )),
    }
}

/// Convert a Lua value to JSON; tables with keys 1..n become arrays
fn lua_to_json(value: mlua::Value) -> Result<Value> {
    match value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::from(i)),
        mlua::Value::Number(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        mlua::Value::String(s) => Ok(Value::String(s.to_string_lossy().into())),
        mlua::Value::Table(table) => {
            let len = table.raw_len();
            let mut entries = 0usize;
            for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
                pair.map_err(|e| anyhow::anyhow!("Failed to iterate Lua table: {}", e))?;
                entries += 1;
            }

            if entries == len {
                let mut items = Vec::with_capacity(len);
                for index in 1..=len {
                    let item: mlua::Value = table
                        .raw_get(index)
                        .map_err(|e| anyhow::anyhow!("Failed to read Lua array item: {}", e))?;
                    items.push(lua_to_json(item)?);
                }
                return Ok(Value::Array(items));
            }

            let mut object = Map::new();
            for pair in table.pairs::<mlua::Value, mlua::Value>() {
                let (key, value) = pair.map_err(|e| anyhow::anyhow!("Failed to iterate Lua table: {}", e))?;
                let key: String = match key {
                    mlua::Value::String(s) => s.to_string_lossy().into(),
                    mlua::Value::Integer(i) => i.to_string(),
                    mlua::Value::Number(f) => f.to_string(),
                    other => return Err(anyhow::anyhow!("Unsupported Lua table key type: {}", other.type_name())),
                };
                object.insert(key, lua_to_json(value)?);
            }
            Ok(Value::Object(object))
        }
        // mlua's serde null sentinel and anything non-serializable
        _ => Ok(Value::Null),
    }
}
