//! Drives a guest function as a coroutine until it finishes.
//!
//! Each step takes the interpreter lock, resumes once and releases the lock
//! before awaiting anything. Pending host work is therefore awaited with the
//! VM free, which is what lets ticks and tool calls run in the meantime.

use mlua::{
    DeserializeOptions, Function, Lua, LuaSerdeExt, MultiValue, SerializeOptions, Thread,
    ThreadStatus, Value,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bridge::{GuestAsyncBridge, Yielded};
use crate::error::ScriptFault;
use crate::interpreter::{SharedInterpreter, run_guest};

/// Result of driving one guest function to completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    /// First value the function returned, `null` when it returned nothing
    pub value: serde_json::Value,
    /// Number of host operations awaited along the way
    pub await_cycles: usize,
}

enum Step {
    Yielded(Yielded),
    Finished(serde_json::Value),
}

pub struct CoroutineTrampoline {
    script: String,
    gate: SharedInterpreter,
    token: CancellationToken,
}

impl CoroutineTrampoline {
    pub fn new(script: impl Into<String>, gate: SharedInterpreter, token: CancellationToken) -> Self {
        Self {
            script: script.into(),
            gate,
            token,
        }
    }

    /// Compile `source` as a chunk and drive it
    pub async fn run_source(&self, source: &str) -> Result<RunOutcome, ScriptFault> {
        let thread = {
            let interp = self.gate.lock().await;
            let lua = interp.lua();
            let body = lua
                .load(source)
                .set_name(format!("={}", self.script))
                .into_function()
                .map_err(|e| ScriptFault::guest(&self.script, &e))?;
            lua.create_thread(body)
                .map_err(|e| ScriptFault::guest(&self.script, &e))?
        };
        self.drive(thread).await
    }

    /// Drive an already compiled guest function, e.g. a lifecycle callback
    pub async fn run_function(&self, function: Function) -> Result<RunOutcome, ScriptFault> {
        let thread = {
            let interp = self.gate.lock().await;
            interp
                .lua()
                .create_thread(function)
                .map_err(|e| ScriptFault::guest(&self.script, &e))?
        };
        self.drive(thread).await
    }

    async fn drive(&self, thread: Thread) -> Result<RunOutcome, ScriptFault> {
        let mut resume_with: Option<serde_json::Value> = None;
        let mut await_cycles = 0;

        loop {
            if self.token.is_cancelled() {
                return Err(ScriptFault::Cancelled(self.script.clone()));
            }

            let step = {
                let interp = self.gate.lock().await;
                self.resume(interp.lua(), &thread, resume_with.take())?
            };

            let request = match step {
                Step::Finished(value) => {
                    debug!(
                        target: "scripting",
                        "Script '{}' finished after {} await cycle(s)",
                        self.script,
                        await_cycles
                    );
                    return Ok(RunOutcome {
                        value,
                        await_cycles,
                    });
                }
                Step::Yielded(Yielded::Checkpoint) => continue,
                Step::Yielded(Yielded::Suspension(request)) => request,
            };

            await_cycles += 1;
            let handle = request.into_handle();
            let has_result = handle.has_result();

            let settle = handle.settle();
            tokio::pin!(settle);
            let settled = tokio::select! {
                settled = &mut settle => settled,
                _ = self.token.cancelled() => {
                    // The pending operation still runs to completion, the
                    // coroutine is just never resumed with its outcome
                    debug!(
                        target: "scripting",
                        "Script '{}' cancelled while suspended, waiting for its operation",
                        self.script
                    );
                    let _ = settle.await;
                    return Err(ScriptFault::Cancelled(self.script.clone()));
                }
            };

            match settled {
                Ok(value) if has_result => {
                    resume_with = Some(value.unwrap_or(serde_json::Value::Null));
                }
                Ok(_) => {}
                Err(fault) => {
                    return Err(ScriptFault::AsyncOperation {
                        script: self.script.clone(),
                        source: fault,
                    });
                }
            }
        }
    }

    /// One resumption. Runs with the interpreter lock held.
    fn resume(
        &self,
        lua: &Lua,
        thread: &Thread,
        value: Option<serde_json::Value>,
    ) -> Result<Step, ScriptFault> {
        let args = match value {
            Some(value) => {
                let options = SerializeOptions::new()
                    .serialize_none_to_null(false)
                    .serialize_unit_to_null(false);
                let value = lua
                    .to_value_with(&value, options)
                    .map_err(|e| ScriptFault::guest(&self.script, &e))?;
                MultiValue::from_vec(vec![value])
            }
            None => MultiValue::new(),
        };

        let returned = match run_guest(|| thread.resume::<MultiValue>(args)) {
            Ok(values) => values,
            Err(_) if self.token.is_cancelled() => {
                return Err(ScriptFault::Cancelled(self.script.clone()));
            }
            Err(e) => return Err(ScriptFault::guest(&self.script, &e)),
        };

        if matches!(thread.status(), ThreadStatus::Resumable) {
            return GuestAsyncBridge::classify(returned)
                .map(Step::Yielded)
                .map_err(|detail| ScriptFault::ProtocolViolation {
                    script: self.script.clone(),
                    detail,
                });
        }

        let first = returned.into_iter().next().unwrap_or(Value::Nil);
        let options = DeserializeOptions::new().deny_unsupported_types(false);
        let value = lua
            .from_value_with::<serde_json::Value>(first, options)
            .unwrap_or_else(|e| {
                warn!(
                    target: "scripting",
                    "Script '{}' returned a value that cannot be represented: {}",
                    self.script,
                    e
                );
                serde_json::Value::Null
            });
        Ok(Step::Finished(value))
    }
}
