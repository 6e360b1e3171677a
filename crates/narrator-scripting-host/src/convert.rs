//! Conversions between guest tables and the conversation model

use async_trait::async_trait;
use mlua::{Function, Lua, LuaSerdeExt, Table, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use narrator_llm::{
    Message, Role, SendOptions, ToolChoice, ToolDescriptor, ToolInvoker, ToolOutcome,
    format_tool_error,
};

use crate::error::describe_lua_error;
use crate::interpreter::{GateHandle, Interpreter, run_guest};

/// Build a message list from a bare string or a sequence of strings and
/// `{ role = ..., content = ... }` tables
pub fn messages_from_lua(lua: &Lua, value: Value) -> mlua::Result<Vec<Message>> {
    let messages = match value {
        Value::String(text) => vec![Message::user(text.to_str()?.to_string())],
        Value::Table(table) => {
            let mut messages = Vec::new();
            for (index, entry) in table.sequence_values::<Value>().enumerate() {
                messages.push(message_from_entry(lua, entry?, index + 1)?);
            }
            messages
        }
        other => {
            return Err(mlua::Error::runtime(format!(
                "messages must be a string or a table, got {}",
                other.type_name()
            )));
        }
    };

    if messages.is_empty() {
        return Err(mlua::Error::runtime("messages must not be empty"));
    }
    Ok(messages)
}

fn message_from_entry(lua: &Lua, entry: Value, index: usize) -> mlua::Result<Message> {
    match entry {
        Value::String(text) => Ok(Message::user(text.to_str()?.to_string())),
        Value::Table(_) => {
            let message: Message = lua.from_value(entry).map_err(|e| {
                mlua::Error::runtime(format!("invalid message at index {index}: {e}"))
            })?;
            // Tool turns only make sense when replaying a transcript
            if message.role == Role::Tool && message.tool_call_id.is_none() {
                return Err(mlua::Error::runtime(format!(
                    "invalid message at index {index}: tool messages need a tool_call_id"
                )));
            }
            Ok(message)
        }
        other => Err(mlua::Error::runtime(format!(
            "invalid message at index {index}: expected a string or a table, got {}",
            other.type_name()
        ))),
    }
}

/// Validated options for one `think` call
#[derive(Debug, Default)]
pub struct ThinkOptions {
    pub system: Vec<String>,
    pub temperature: Option<f32>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDescriptor>,
    pub tool_choice: Option<ToolChoice>,
    pub timeout: Option<Duration>,
}

impl ThinkOptions {
    /// Validate an optional guest options table
    pub fn from_lua(lua: &Lua, table: Option<&Table>) -> mlua::Result<Self> {
        let Some(table) = table else {
            return Ok(Self::default());
        };

        let temperature = table.get::<Option<f64>>("temperature")?;
        if let Some(t) = temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err(mlua::Error::runtime(format!(
                    "temperature must be between 0 and 1, got {t}"
                )));
            }
        }

        let max_tokens = table.get::<Option<u32>>("max_tokens")?;
        if max_tokens == Some(0) {
            return Err(mlua::Error::runtime("max_tokens must be positive"));
        }

        let timeout = match table.get::<Option<f64>>("timeout_secs")? {
            Some(secs) => match Duration::try_from_secs_f64(secs) {
                Ok(timeout) if !timeout.is_zero() => Some(timeout),
                _ => {
                    return Err(mlua::Error::runtime(format!(
                        "timeout_secs must be a positive number, got {secs}"
                    )));
                }
            },
            None => None,
        };

        let tool_choice = tool_choice_from_lua(lua, table.get::<Value>("tool_choice")?)?;

        let tools = match table.get::<Option<Table>>("tools")? {
            Some(tools) => tools_from_lua(lua, &tools)?,
            None => Vec::new(),
        };

        Ok(Self {
            system: system_from_lua(table.get::<Value>("system")?)?,
            temperature: temperature.map(|t| t as f32),
            model: table.get::<Option<String>>("model")?,
            max_tokens,
            tools,
            tool_choice,
            timeout,
        })
    }

    /// Effective request options. Tool specs are filled in by the engine
    /// from the descriptors.
    pub fn send_options(&self, defaults: &SendOptions) -> SendOptions {
        let mut options = defaults.clone();
        if !self.system.is_empty() {
            options.system = self.system.clone();
        }
        if let Some(temperature) = self.temperature {
            options.temperature = temperature;
        }
        if let Some(model) = &self.model {
            options.model = model.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            options.max_tokens = max_tokens;
        }
        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        options.tool_choice = self.tool_choice.clone();
        options.tools.clear();
        options
    }
}

/// A system prompt given as one string or a list of strings
pub fn system_from_lua(value: Value) -> mlua::Result<Vec<String>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::String(text) => Ok(vec![text.to_str()?.to_string()]),
        Value::Table(table) => table.sequence_values::<String>().collect(),
        other => Err(mlua::Error::runtime(format!(
            "system must be a string or a list of strings, got {}",
            other.type_name()
        ))),
    }
}

/// `{ type = "auto" }` or `{ type = "tool", name = ... }`
pub fn tool_choice_from_lua(lua: &Lua, value: Value) -> mlua::Result<Option<ToolChoice>> {
    if value.is_nil() {
        return Ok(None);
    }
    lua.from_value::<ToolChoice>(value)
        .map(Some)
        .map_err(|e| mlua::Error::runtime(format!("invalid tool_choice: {e}")))
}

/// Wrap every function of a `name -> function` table as a tool, sorted by name
pub fn tools_from_lua(lua: &Lua, tools: &Table) -> mlua::Result<Vec<ToolDescriptor>> {
    let gate = lua
        .app_data_ref::<GateHandle>()
        .map(|handle| handle.0.clone())
        .ok_or_else(|| mlua::Error::runtime("tools are unavailable before the host is initialized"))?;

    let mut descriptors = Vec::new();
    for pair in tools.pairs::<String, Value>() {
        let (name, value) = pair?;
        let Value::Function(function) = value else {
            debug!(target: "scripting", "Ignoring non-function tool entry '{}'", name);
            continue;
        };
        let description = format!("Tool created from Lua function: {name}");
        let invoker = GuestTool {
            name: name.clone(),
            function,
            gate: gate.clone(),
        };
        descriptors.push(ToolDescriptor::new(name, description, Arc::new(invoker)));
    }

    descriptors.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(descriptors)
}

/// A guest function called by the conversation engine.
///
/// Runs under the interpreter lock, like a resumption or a tick.
struct GuestTool {
    name: String,
    function: Function,
    gate: Weak<Mutex<Interpreter>>,
}

#[async_trait]
impl ToolInvoker for GuestTool {
    async fn invoke(&self, input: String) -> ToolOutcome {
        let Some(gate) = self.gate.upgrade() else {
            return Err(format_tool_error(&self.name, "script is no longer running"));
        };

        let _interp = gate.lock().await;
        match run_guest(|| self.function.call::<Value>(input)) {
            Ok(Value::String(text)) => text
                .to_str()
                .map(|s| s.to_string())
                .map_err(|e| format_tool_error(&self.name, &e.to_string())),
            Ok(Value::Integer(n)) => Ok(n.to_string()),
            Ok(Value::Number(n)) => Ok(n.to_string()),
            Ok(other) => Err(format_tool_error(
                &self.name,
                &format!("expected a string result, got {}", other.type_name()),
            )),
            Err(e) => Err(format_tool_error(&self.name, &describe_lua_error(&e))),
        }
    }
}
