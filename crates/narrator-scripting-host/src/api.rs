//! Host capabilities exposed to mods

use mlua::{Function, Lua, Table, Value, Variadic};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use narrator_llm::{Conversation, Message, SendOptions, ToolDescriptor};

use crate::async_op::{AsyncFault, AsyncOperationHandle};
use crate::bridge::{Capability, CapabilityKind};
use crate::context::ModContext;
use crate::convert::{
    ThinkOptions, messages_from_lua, system_from_lua, tool_choice_from_lua, tools_from_lua,
};

/// Temperature `prompt` uses unless the script picks one
pub const PROMPT_TEMPERATURE: f32 = 0.7;

/// Capabilities installed into every mod
pub const NARRATOR_API: &[Capability] = &[
    Capability {
        name: "think",
        kind: CapabilityKind::Async,
        build: build_think,
    },
    Capability {
        name: "prompt",
        kind: CapabilityKind::Async,
        build: build_prompt,
    },
    Capability {
        name: "sleep",
        kind: CapabilityKind::Async,
        build: build_sleep,
    },
    Capability {
        name: "print",
        kind: CapabilityKind::Sync,
        build: build_print,
    },
    Capability {
        name: "say",
        kind: CapabilityKind::Sync,
        build: build_say,
    },
    Capability {
        name: "AsAssistantMessage",
        kind: CapabilityKind::Sync,
        build: build_as_assistant_message,
    },
];

/// `think(messages[, options])`: run a conversation, resolving to
/// `{ content, messages, usage, requests }`
fn build_think(lua: &Lua, context: &Arc<ModContext>) -> mlua::Result<Function> {
    let context = Arc::clone(context);
    lua.create_function(move |lua, (messages, options): (Value, Option<Table>)| {
        let messages = messages_from_lua(lua, messages)?;
        let options = ThinkOptions::from_lua(lua, options.as_ref())?;
        let send = options.send_options(&context.defaults);
        let tools = options.tools;
        let engine = Arc::clone(&context.engine);

        let handle = AsyncOperationHandle::from_value(async move {
            engine.run(messages, send, &tools).await
        });
        lua.create_userdata(handle)
    })
}

/// What `prompt` resolves to: the conversation, or an error text
#[derive(Serialize)]
#[serde(untagged)]
enum PromptReply {
    Conversation(Conversation),
    Error(String),
}

const INVALID_PROMPT_ARGS: &str =
    "Error: Invalid arguments. Expected a table for 'userargs' and a number for 'maxtokens'.";

/// Text of a `prompt` request
pub fn prompt_text(userargs: &[(String, String)], max_tokens: u32, documentation: &str) -> String {
    let variables = userargs
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Using the following user variables: {variables}\n\
         The response must be within {max_tokens} tokens.\n\
         Do NOT make up API endpoints. Only use the available API below.\n\
         {documentation}"
    )
}

/// `prompt(args)`: ask for a mod built from user variables and the API
/// documentation. Failures resolve to an error string instead of a fault.
fn build_prompt(lua: &Lua, context: &Arc<ModContext>) -> mlua::Result<Function> {
    let context = Arc::clone(context);
    lua.create_function(move |lua, args: Value| {
        let Some((messages, send, tools)) = prompt_request(lua, &context, args)? else {
            let reply = PromptReply::Error(INVALID_PROMPT_ARGS.to_string());
            return lua.create_userdata(AsyncOperationHandle::from_value(async move {
                Ok::<_, AsyncFault>(reply)
            }));
        };

        let engine = Arc::clone(&context.engine);
        let script = context.script.clone();
        let handle = AsyncOperationHandle::from_value(async move {
            let reply = match engine.run(messages, send, &tools).await {
                Ok(conversation) => PromptReply::Conversation(conversation),
                Err(e) => {
                    warn!(target: "scripting", "prompt from '{}' failed: {}", script, e);
                    PromptReply::Error(format!("Error in Anthropic API call: {e}"))
                }
            };
            Ok::<_, AsyncFault>(reply)
        });
        lua.create_userdata(handle)
    })
}

type PromptRequest = (Vec<Message>, SendOptions, Vec<ToolDescriptor>);

/// `Ok(None)` when `userargs` or `maxtokens` are missing or mistyped
fn prompt_request(
    lua: &Lua,
    context: &ModContext,
    args: Value,
) -> mlua::Result<Option<PromptRequest>> {
    let Value::Table(args) = args else {
        return Ok(None);
    };

    let (Value::Table(userargs), Some(max_tokens)) = (
        args.get::<Value>("userargs")?,
        number_of(&args.get::<Value>("maxtokens")?),
    ) else {
        return Ok(None);
    };
    if !max_tokens.is_finite() || max_tokens < 1.0 {
        return Ok(None);
    }
    let max_tokens = max_tokens as u32;

    let mut variables = Vec::new();
    for pair in userargs.pairs::<Value, Value>() {
        if let (Value::String(key), Value::String(value)) = pair? {
            variables.push((key.to_str()?.to_string(), value.to_str()?.to_string()));
        }
    }
    variables.sort();

    let mut send = context.defaults.clone();
    send.max_tokens = max_tokens;
    send.temperature = number_of(&args.get::<Value>("temperature")?)
        .map(|t| t as f32)
        .unwrap_or(PROMPT_TEMPERATURE);
    send.system = system_from_lua(args.get::<Value>("system")?)?;
    send.tools.clear();
    send.tool_choice = tool_choice_from_lua(lua, args.get::<Value>("tool_choice")?)?;

    let tools = match args.get::<Option<Table>>("tools")? {
        Some(tools) => tools_from_lua(lua, &tools)?,
        None => Vec::new(),
    };

    let text = prompt_text(&variables, max_tokens, &context.documentation);
    Ok(Some((vec![Message::user(text)], send, tools)))
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Number(n) => Some(*n),
        _ => None,
    }
}

/// `sleep(seconds)`: suspend the calling coroutine for a while
fn build_sleep(lua: &Lua, _context: &Arc<ModContext>) -> mlua::Result<Function> {
    lua.create_function(|lua, seconds: f64| {
        let delay = Duration::try_from_secs_f64(seconds).map_err(|_| {
            mlua::Error::runtime(format!(
                "sleep expects a non-negative number of seconds, got {seconds}"
            ))
        })?;
        lua.create_userdata(AsyncOperationHandle::from_action(async move {
            tokio::time::sleep(delay).await;
            Ok::<_, AsyncFault>(())
        }))
    })
}

fn build_print(lua: &Lua, context: &Arc<ModContext>) -> mlua::Result<Function> {
    let script = context.script.clone();
    lua.create_function(move |_, values: Variadic<Value>| {
        let line = values.iter().map(render).collect::<Vec<_>>().join("\t");
        info!(target: "guest", script = %script, "{}", line);
        Ok(())
    })
}

/// `say(voice, text)` is reserved; speech output is not wired up
fn build_say(lua: &Lua, context: &Arc<ModContext>) -> mlua::Result<Function> {
    let script = context.script.clone();
    lua.create_function(move |_, _args: Variadic<Value>| {
        warn!(target: "guest", script = %script, "say() is not supported, ignoring");
        Ok(())
    })
}

fn build_as_assistant_message(lua: &Lua, _context: &Arc<ModContext>) -> mlua::Result<Function> {
    lua.create_function(|lua, text: String| {
        let message = lua.create_table()?;
        message.set("role", "assistant")?;
        message.set("content", text)?;
        Ok(message)
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_text_mentions_everything() {
        let text = prompt_text(
            &[
                ("style".to_string(), "noir".to_string()),
                ("voice".to_string(), "Liam".to_string()),
            ],
            512,
            "## think(messages)",
        );

        assert!(text.contains("style: noir, voice: Liam"));
        assert!(text.contains("within 512 tokens"));
        assert!(text.contains("Do NOT make up API endpoints"));
        assert!(text.ends_with("## think(messages)"));
    }

    #[test]
    fn test_capability_table() {
        let names: Vec<&str> = NARRATOR_API.iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec!["think", "prompt", "sleep", "print", "say", "AsAssistantMessage"]
        );

        let async_names: Vec<&str> = NARRATOR_API
            .iter()
            .filter(|c| c.kind == CapabilityKind::Async)
            .map(|c| c.name)
            .collect();
        assert_eq!(async_names, vec!["think", "prompt", "sleep"]);
    }
}
