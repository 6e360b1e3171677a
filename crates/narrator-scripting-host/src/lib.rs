/// Host runtime for narrator mods
///
/// Mods are Lua scripts run as coroutines. Long-running host work (LLM
/// calls, sleeps) is handed to the guest as a suspension; the trampoline
/// awaits it with the interpreter unlocked and resumes the coroutine with
/// the result, while a per-mod tick scheduler keeps calling `Update`.
pub mod api;
pub mod async_op;
pub mod bridge;
pub mod context;
pub mod convert;
pub mod error;
pub mod instance;
pub mod interpreter;
pub mod loader;
pub mod mod_host;
pub mod tick;
pub mod trampoline;

pub use api::{NARRATOR_API, PROMPT_TEMPERATURE, prompt_text};
pub use async_op::{AsyncFault, AsyncOperationHandle, Settled};
pub use bridge::{
    Capability, CapabilityBuilder, CapabilityKind, GuestAsyncBridge, SuspensionRequest, Yielded,
};
pub use context::ModContext;
pub use convert::{ThinkOptions, messages_from_lua};
pub use error::ScriptFault;
pub use instance::{LifecycleCallbacks, ScriptInstance};
pub use interpreter::{AUTO_YIELD_STEPS, Interpreter, SharedInterpreter};
pub use loader::{ModSource, load_mods};
pub use mod_host::ModHost;
pub use tick::{DEFAULT_TICK_INTERVAL, TickScheduler};
pub use trampoline::{CoroutineTrampoline, RunOutcome};
