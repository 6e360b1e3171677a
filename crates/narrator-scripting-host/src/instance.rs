use mlua::Function;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ScriptFault;
use crate::interpreter::{Interpreter, SharedInterpreter};
use crate::tick::TickScheduler;
use crate::trampoline::CoroutineTrampoline;

/// Guest callbacks read from globals once the top-level body has run
#[derive(Default)]
pub struct LifecycleCallbacks {
    pub awake: Option<Function>,
    pub start: Option<Function>,
    pub update: Option<Function>,
}

/// One mod's interpreter and everything scoped to it
pub struct ScriptInstance {
    name: String,
    source: String,
    interpreter: SharedInterpreter,
    token: CancellationToken,
    checkpoints: Arc<AtomicU64>,
    scheduler: Option<TickScheduler>,
}

impl ScriptInstance {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Result<Self, ScriptFault> {
        let name = name.into();
        let token = CancellationToken::new();
        let checkpoints = Arc::new(AtomicU64::new(0));
        let interpreter = Interpreter::new(token.clone(), checkpoints.clone())
            .map_err(|e| ScriptFault::guest(&name, &e))?;

        Ok(Self {
            name,
            source: source.into(),
            interpreter: Arc::new(Mutex::new(interpreter)),
            token,
            checkpoints,
            scheduler: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn interpreter(&self) -> &SharedInterpreter {
        &self.interpreter
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Checkpoints reached by guest code so far
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    pub fn trampoline(&self) -> CoroutineTrampoline {
        CoroutineTrampoline::new(&self.name, self.interpreter.clone(), self.token.clone())
    }

    /// Read `Awake`, `Start` and `Update` from the guest globals
    pub async fn lifecycle_callbacks(&self) -> Result<LifecycleCallbacks, ScriptFault> {
        let interp = self.interpreter.lock().await;
        let globals = interp.lua().globals();
        let read = |name: &str| -> Result<Option<Function>, ScriptFault> {
            globals
                .get::<Option<Function>>(name)
                .map_err(|e| ScriptFault::guest(&self.name, &e))
        };

        Ok(LifecycleCallbacks {
            awake: read("Awake")?,
            start: read("Start")?,
            update: read("Update")?,
        })
    }

    /// Hand `update` to the tick scheduler
    pub async fn set_update(&self, update: Option<Function>) {
        self.interpreter.lock().await.set_update(update);
    }

    /// Start the tick scheduler if it is not running yet
    pub fn start_ticking(&mut self, period: Duration) {
        if self.scheduler.is_none() {
            self.scheduler = Some(TickScheduler::start(
                &self.name,
                Arc::downgrade(&self.interpreter),
                period,
                &self.token,
            ));
        }
    }

    /// Times `Update` has run
    pub fn ticks(&self) -> u64 {
        self.scheduler.as_ref().map_or(0, TickScheduler::ticks)
    }

    pub fn is_ticking(&self) -> bool {
        self.scheduler.as_ref().is_some_and(TickScheduler::is_running)
    }

    /// Stop ticking; returns the fault that stopped `Update`, if any.
    ///
    /// Waits for a running `Update` to return. One that never does is only
    /// interrupted by cancelling the instance token first.
    pub async fn stop_ticking(&mut self) -> Option<ScriptFault> {
        self.scheduler.take()?.stop().await
    }

    /// Stop ticking without waiting for the tick task
    pub fn abort_ticking(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.dispose();
        }
    }

    /// Abort whatever the instance is doing
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.abort_ticking();
    }
}

impl Drop for ScriptInstance {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
