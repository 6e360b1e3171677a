use thiserror::Error;

use crate::async_op::AsyncFault;

/// Why a script run stopped early.
///
/// Every variant ends the current trampoline run and is reported to the
/// owning [`ModHost`](crate::ModHost); none of them take the host down. Tool
/// failures never show up here, they are handed to the model as text.
#[derive(Debug, Error)]
pub enum ScriptFault {
    /// Lua error in the top-level body or a lifecycle callback
    #[error("Lua runtime error in '{script}': {message}")]
    Guest { script: String, message: String },

    /// An awaited host operation failed
    #[error("Async operation failed in '{script}': {source}")]
    AsyncOperation {
        script: String,
        #[source]
        source: AsyncFault,
    },

    /// The coroutine yielded something that is not a suspension request
    #[error("protocol violation in '{script}': {detail}")]
    ProtocolViolation { script: String, detail: String },

    /// The run was cancelled before it finished
    #[error("script '{0}' was cancelled")]
    Cancelled(String),

    /// Lifecycle methods called out of order
    #[error("lifecycle error in '{script}': {detail}")]
    Lifecycle { script: String, detail: String },
}

impl ScriptFault {
    pub fn guest(script: &str, err: &mlua::Error) -> Self {
        ScriptFault::Guest {
            script: script.to_string(),
            message: describe_lua_error(err),
        }
    }

    /// Name of the script the fault belongs to
    pub fn script(&self) -> &str {
        match self {
            ScriptFault::Guest { script, .. }
            | ScriptFault::AsyncOperation { script, .. }
            | ScriptFault::ProtocolViolation { script, .. }
            | ScriptFault::Lifecycle { script, .. } => script,
            ScriptFault::Cancelled(script) => script,
        }
    }

    /// Whether the fault came from the guest or its operations rather than
    /// from cancellation or host misuse
    pub fn is_guest_fault(&self) -> bool {
        matches!(
            self,
            ScriptFault::Guest { .. }
                | ScriptFault::AsyncOperation { .. }
                | ScriptFault::ProtocolViolation { .. }
        )
    }
}

/// Flatten callback wrappers so the message points at the guest error
pub(crate) fn describe_lua_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, traceback } => {
            format!("{}\n{}", describe_lua_error(cause), traceback)
        }
        mlua::Error::RuntimeError(message) => message.clone(),
        other => other.to_string(),
    }
}
