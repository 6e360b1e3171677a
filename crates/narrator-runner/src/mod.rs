mod batch;
pub mod logging;
mod runner;

pub use batch::{poll_settings, run_prompt_batch};
pub use logging::init_logging;
pub use runner::{ModReport, ModRunner, ModRunnerBuilder, RunnerError, send_defaults};
