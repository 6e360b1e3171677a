use mlua::{Function, HookTriggers, Lua, LuaOptions, StdLib, VmState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// VM instructions between two cooperative checkpoints
pub const AUTO_YIELD_STEPS: u32 = 1000;

/// Run a synchronous call into guest code.
///
/// On a multi-threaded runtime the calling worker hands its queued tasks to
/// another thread first, so a guest that runs for a long time cannot stall
/// timers or other mods. Elsewhere the call runs in place.
pub(crate) fn run_guest<R>(call: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(call)
        }
        _ => call(),
    }
}

/// Interpreter behind the instance lock. Whoever holds the lock owns the VM.
pub type SharedInterpreter = Arc<Mutex<Interpreter>>;

/// Weak route back to the owning interpreter, kept as Lua app data for
/// capabilities that re-enter the guest from outside a resumption
#[derive(Clone)]
pub(crate) struct GateHandle(pub(crate) Weak<Mutex<Interpreter>>);

/// One Lua state plus the lifecycle callback the tick scheduler calls
pub struct Interpreter {
    lua: Lua,
    update: Option<Function>,
}

impl Interpreter {
    /// Build a fresh VM with the guest standard library, the `uservars`
    /// table and the checkpoint hook.
    ///
    /// The hook fires every [`AUTO_YIELD_STEPS`] instructions, counts into
    /// `checkpoints` and raises once `token` is cancelled.
    pub fn new(token: CancellationToken, checkpoints: Arc<AtomicU64>) -> mlua::Result<Self> {
        let lua = Lua::new_with(
            StdLib::COROUTINE | StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )?;

        let globals = lua.globals();
        if !globals.contains_key("uservars")? {
            globals.set("uservars", lua.create_table()?)?;
        }

        lua.set_hook(
            HookTriggers::new().every_nth_instruction(AUTO_YIELD_STEPS),
            move |_lua, _debug| {
                checkpoints.fetch_add(1, Ordering::Relaxed);
                if token.is_cancelled() {
                    return Err(mlua::Error::runtime("script run cancelled"));
                }
                Ok(VmState::Continue)
            },
        );

        Ok(Self { lua, update: None })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn update(&self) -> Option<&Function> {
        self.update.as_ref()
    }

    pub fn set_update(&mut self, update: Option<Function>) {
        self.update = update;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpreter() -> (Interpreter, CancellationToken, Arc<AtomicU64>) {
        let token = CancellationToken::new();
        let checkpoints = Arc::new(AtomicU64::new(0));
        let interp = Interpreter::new(token.clone(), checkpoints.clone()).unwrap();
        (interp, token, checkpoints)
    }

    #[test]
    fn test_uservars_exists() {
        let (interp, _, _) = interpreter();
        let kind: String = interp.lua().load("return type(uservars)").eval().unwrap();
        assert_eq!(kind, "table");
    }

    #[test]
    fn test_io_and_os_are_not_loaded() {
        let (interp, _, _) = interpreter();
        let missing: bool = interp
            .lua()
            .load("return io == nil and os == nil")
            .eval()
            .unwrap();
        assert!(missing);
    }

    #[test]
    fn test_hook_counts_checkpoints() {
        let (interp, _, checkpoints) = interpreter();
        interp
            .lua()
            .load("local n = 0 for i = 1, 100000 do n = n + i end")
            .exec()
            .unwrap();
        assert!(checkpoints.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_long_guest_call_leaves_timers_running() {
        let (interp, token, _) = interpreter();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = run_guest(|| interp.lua().load("while true do end").exec()).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        canceller.await.unwrap();
    }

    #[test]
    fn test_cancelled_token_stops_guest_code() {
        let (interp, token, _) = interpreter();
        token.cancel();
        let err = interp.lua().load("while true do end").exec().unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
