use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::api::NARRATOR_API;
use crate::bridge::{Capability, GuestAsyncBridge};
use crate::context::ModContext;
use crate::error::ScriptFault;
use crate::instance::ScriptInstance;
use crate::interpreter::GateHandle;
use crate::tick::DEFAULT_TICK_INTERVAL;
use crate::trampoline::RunOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Created,
    Initialized,
    Ran,
}

/// Supervises one mod: installs its capabilities, runs its body and
/// lifecycle callbacks, and keeps `Update` ticking afterwards.
///
/// Faults are logged and returned; they never take the process down.
pub struct ModHost {
    instance: ScriptInstance,
    context: Arc<ModContext>,
    tick_interval: Duration,
    state: HostState,
}

impl ModHost {
    /// Create a host for `source`. Nothing runs until [`ModHost::run`].
    pub fn new(context: ModContext, source: impl Into<String>) -> Result<Self, ScriptFault> {
        let instance = ScriptInstance::new(context.script.clone(), source)?;
        Ok(Self {
            instance,
            context: Arc::new(context),
            tick_interval: DEFAULT_TICK_INTERVAL,
            state: HostState::Created,
        })
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        self.instance.name()
    }

    pub fn instance(&self) -> &ScriptInstance {
        &self.instance
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.instance.cancel_token()
    }

    /// Install the narrator API. Must be called exactly once, before `run`.
    pub async fn initialize(&mut self) -> Result<(), ScriptFault> {
        self.initialize_with(NARRATOR_API).await
    }

    /// Install a custom capability table instead of the narrator API
    pub async fn initialize_with(&mut self, capabilities: &[Capability]) -> Result<(), ScriptFault> {
        if self.state != HostState::Created {
            return Err(self.lifecycle_fault("initialize called twice"));
        }

        {
            let interp = self.instance.interpreter().lock().await;
            let lua = interp.lua();
            lua.set_app_data(GateHandle(Arc::downgrade(self.instance.interpreter())));
            GuestAsyncBridge::install(lua, &self.context, capabilities)
                .map_err(|e| ScriptFault::guest(self.instance.name(), &e))?;
        }

        debug!(
            target: "scripting",
            "Initialized '{}' with {} capabilities",
            self.name(),
            capabilities.len()
        );
        self.state = HostState::Initialized;
        Ok(())
    }

    /// Run the top-level body, then `Awake` and `Start`, then hand `Update`
    /// to the tick scheduler. Returns the body's outcome; await cycles of the
    /// callbacks are added to it.
    pub async fn run(&mut self) -> Result<RunOutcome, ScriptFault> {
        let result = self.run_lifecycle().await;
        if let Err(fault) = &result {
            error!(target: "scripting", "Mod '{}' stopped: {}", self.name(), fault);
            self.instance.abort_ticking();
        }
        result
    }

    async fn run_lifecycle(&mut self) -> Result<RunOutcome, ScriptFault> {
        match self.state {
            HostState::Created => return Err(self.lifecycle_fault("run called before initialize")),
            HostState::Ran => return Err(self.lifecycle_fault("run called twice")),
            HostState::Initialized => {}
        }
        self.state = HostState::Ran;

        self.instance.start_ticking(self.tick_interval);
        let trampoline = self.instance.trampoline();

        let mut outcome = trampoline.run_source(self.instance.source()).await?;

        let callbacks = self.instance.lifecycle_callbacks().await?;
        for callback in [callbacks.awake, callbacks.start].into_iter().flatten() {
            outcome.await_cycles += trampoline.run_function(callback).await?.await_cycles;
        }

        if callbacks.update.is_some() {
            debug!(target: "scripting", "Mod '{}' ticks every {:?}", self.name(), self.tick_interval);
        }
        self.instance.set_update(callbacks.update).await;

        info!(
            target: "scripting",
            "Mod '{}' started ({} await cycle(s))",
            self.name(),
            outcome.await_cycles
        );
        Ok(outcome)
    }

    /// Times `Update` has run
    pub fn ticks(&self) -> u64 {
        self.instance.ticks()
    }

    /// Stop ticking and report a fault `Update` may have hit
    pub async fn shutdown(&mut self) -> Option<ScriptFault> {
        let ticks = self.ticks();
        // Cancel before waiting so the checkpoint hook interrupts an Update
        // that never returns
        self.instance.cancel_token().cancel();
        let fault = self.instance.stop_ticking().await;
        self.instance.cancel();
        info!(target: "scripting", "Mod '{}' shut down after {} tick(s)", self.name(), ticks);
        fault
    }

    fn lifecycle_fault(&self, detail: &str) -> ScriptFault {
        ScriptFault::Lifecycle {
            script: self.name().to_string(),
            detail: detail.to_string(),
        }
    }
}
