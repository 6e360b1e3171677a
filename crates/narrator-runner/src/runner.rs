//! Builder and runner for a set of mods
//!
//! Every mod gets its own [`ModHost`] on its own tokio task, so mods run in
//! parallel and a failing mod never affects the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use narrator_config::{LlmConfig, NarratorConfig};
use narrator_llm::{AnthropicClient, ConversationEngine, LlmClient, LlmError, SendOptions};
use narrator_scripting_host::{ModContext, ModHost, ModSource, RunOutcome, ScriptFault, load_mods};

/// Error while configuring a runner
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("No mods to run - add mod files or point the runner at a mod directory")]
    NoMods,

    #[error("Failed to set up the LLM client: {0}")]
    Llm(#[from] LlmError),

    #[error("Failed to read mod {path}: {source}")]
    ModFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Request defaults derived from the `[llm]` config section
pub fn send_defaults(config: &LlmConfig) -> SendOptions {
    SendOptions {
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        timeout: config.timeout(),
        ..SendOptions::default()
    }
}

/// Builder for [`ModRunner`]
pub struct ModRunnerBuilder {
    config: NarratorConfig,
    client: Option<Arc<dyn LlmClient>>,
    mods: Vec<ModSource>,
    mod_dir: Option<PathBuf>,
    documentation: Option<String>,
    linger: Duration,
    shutdown: CancellationToken,
}

impl ModRunnerBuilder {
    pub fn new() -> Self {
        Self {
            config: NarratorConfig::default(),
            client: None,
            mods: Vec::new(),
            mod_dir: None,
            documentation: None,
            linger: Duration::ZERO,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: NarratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this client instead of building an Anthropic client from config
    pub fn with_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Add one mod file
    pub fn with_mod_file(mut self, path: &Path) -> Result<Self, RunnerError> {
        let source = ModSource::from_file(path).map_err(|source| RunnerError::ModFile {
            path: path.to_path_buf(),
            source,
        })?;
        self.mods.push(source);
        Ok(self)
    }

    pub fn with_mod(mut self, source: ModSource) -> Self {
        self.mods.push(source);
        self
    }

    /// Load every enabled mod from `dir` in addition to explicit mod files
    pub fn with_mod_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mod_dir = Some(dir.into());
        self
    }

    /// Documentation handed to `prompt`, instead of reading the configured file
    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    /// Keep mods ticking this long after their body finished
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Cancelling `token` stops every mod
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn build(mut self) -> Result<ModRunner, RunnerError> {
        let mods_config = &self.config.mods;
        if self.mod_dir.is_none() && self.mods.is_empty() && mods_config.enabled {
            self.mod_dir = Some(mods_config.mod_dir());
        }
        if let Some(dir) = &self.mod_dir {
            self.mods.extend(load_mods(dir, mods_config));
        }
        if self.mods.is_empty() {
            return Err(RunnerError::NoMods);
        }

        let llm = &self.config.llm;
        let client = match self.client {
            Some(client) => client,
            None => {
                let mut client = AnthropicClient::from_env(&llm.api_key_env)?;
                if let Some(base_url) = &llm.base_url {
                    client = client.with_base_url(base_url);
                }
                Arc::new(client)
            }
        };
        let engine = ConversationEngine::new(client).with_max_tool_rounds(llm.max_tool_rounds);

        let documentation = match self.documentation {
            Some(documentation) => documentation,
            None => read_documentation(&mods_config.docs_path()),
        };

        Ok(ModRunner {
            context: ModContext::new("", Arc::new(engine))
                .with_defaults(send_defaults(llm))
                .with_documentation(documentation),
            mods: self.mods,
            tick_interval: mods_config.tick_interval(),
            linger: self.linger,
            shutdown: self.shutdown,
        })
    }
}

impl Default for ModRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn read_documentation(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(documentation) => documentation,
        Err(e) => {
            warn!(
                target: "runner",
                "No API documentation at {} ({}), prompt() will run without it",
                path.display(),
                e
            );
            String::new()
        }
    }
}

/// How one mod ended
#[derive(Debug)]
pub struct ModReport {
    pub name: String,
    pub outcome: Result<RunOutcome, ScriptFault>,
    /// Times `Update` ran before shutdown
    pub ticks: u64,
    /// Fault that stopped `Update`, if any
    pub update_fault: Option<ScriptFault>,
}

impl ModReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok() && self.update_fault.is_none()
    }
}

/// Configured set of mods ready to run
pub struct ModRunner {
    context: ModContext,
    mods: Vec<ModSource>,
    tick_interval: Duration,
    linger: Duration,
    shutdown: CancellationToken,
}

impl ModRunner {
    pub fn builder() -> ModRunnerBuilder {
        ModRunnerBuilder::new()
    }

    pub fn mod_names(&self) -> Vec<&str> {
        self.mods.iter().map(|m| m.name.as_str()).collect()
    }

    /// Run all mods in parallel; reports come back sorted by mod name
    pub async fn run(self) -> Vec<ModReport> {
        info!(target: "runner", "Running {} mod(s)", self.mods.len());

        let mut tasks = JoinSet::new();
        for source in self.mods {
            let context = self.context.for_script(&source.name);
            tasks.spawn(run_mod(
                context,
                source,
                self.tick_interval,
                self.linger,
                self.shutdown.clone(),
            ));
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(target: "runner", "Mod task panicked: {}", e),
            }
        }

        reports.sort_by(|a, b| a.name.cmp(&b.name));
        let failed = reports.iter().filter(|r| !r.succeeded()).count();
        info!(
            target: "runner",
            "{} mod(s) finished, {} failed",
            reports.len(),
            failed
        );
        reports
    }
}

async fn run_mod(
    context: ModContext,
    source: ModSource,
    tick_interval: Duration,
    linger: Duration,
    shutdown: CancellationToken,
) -> ModReport {
    let name = source.name.clone();
    let mut host = match ModHost::new(context, source.source) {
        Ok(host) => host.with_tick_interval(tick_interval),
        Err(fault) => {
            return ModReport {
                name,
                outcome: Err(fault),
                ticks: 0,
                update_fault: None,
            };
        }
    };

    // Forward runner shutdown to this mod
    let mod_token = host.cancel_token();
    let forward = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            mod_token.cancel();
        })
    };

    let outcome = match host.initialize().await {
        Ok(()) => host.run().await,
        Err(fault) => Err(fault),
    };

    if let Ok(run) = &outcome {
        info!(
            target: "runner",
            "Mod '{}' returned {} after {} await cycle(s)",
            name,
            run.value,
            run.await_cycles
        );
        if !linger.is_zero() {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(linger) => {}
            }
        }
    }

    let ticks = host.ticks();
    let update_fault = host.shutdown().await;
    forward.abort();

    ModReport {
        name,
        outcome,
        ticks,
        update_fault,
    }
}
