use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::ScriptFault;
use crate::interpreter::{Interpreter, run_guest};

/// Default tick period (~60Hz)
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Periodic driver for a script's `Update` callback.
///
/// Each tick takes the same interpreter lock as coroutine resumption, so a
/// tick never overlaps a resume. The task only holds a weak reference to the
/// interpreter and stops on its own once the interpreter is gone.
pub struct TickScheduler {
    token: CancellationToken,
    task: Option<JoinHandle<Option<ScriptFault>>>,
    ticks: Arc<AtomicU64>,
}

impl TickScheduler {
    /// Start ticking. Cancelling `parent` also stops the scheduler.
    pub fn start(
        script: impl Into<String>,
        interpreter: Weak<Mutex<Interpreter>>,
        period: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let ticks = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(tick_loop(
            script.into(),
            interpreter,
            period,
            token.clone(),
            ticks.clone(),
        ));

        Self {
            token,
            task: Some(task),
            ticks,
        }
    }

    /// Number of times `Update` has run
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop ticking and wait for the task; returns the fault that stopped
    /// it early, if any
    pub async fn stop(mut self) -> Option<ScriptFault> {
        self.token.cancel();
        let task = self.task.take()?;
        task.await.ok().flatten()
    }

    /// Stop ticking without waiting
    pub fn dispose(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn tick_loop(
    script: String,
    interpreter: Weak<Mutex<Interpreter>>,
    period: Duration,
    token: CancellationToken,
    ticks: Arc<AtomicU64>,
) -> Option<ScriptFault> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(gate) = interpreter.upgrade() else {
            debug!(target: "scripting", "Interpreter for '{}' is gone, ticking stopped", script);
            break;
        };

        let interp = gate.lock().await;
        let Some(update) = interp.update() else {
            continue;
        };

        if let Err(e) = run_guest(|| update.call::<()>(())) {
            if token.is_cancelled() {
                debug!(target: "scripting", "Update for '{}' interrupted by cancellation", script);
                break;
            }
            let fault = ScriptFault::guest(&script, &e);
            error!(target: "scripting", "Update failed, ticking stopped: {}", fault);
            return Some(fault);
        }
        ticks.fetch_add(1, Ordering::Relaxed);
    }

    None
}
