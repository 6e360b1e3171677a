use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use narrator_config::NarratorConfig;
use narrator_llm::AnthropicClient;
use narrator_runner::{ModRunner, init_logging, run_prompt_batch};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run mods until their bodies finish
    Run {
        /// Mod file to run (repeatable); defaults to every mod in the mod directory
        #[arg(short = 'm', long = "mod")]
        mods: Vec<PathBuf>,

        /// Directory to load mods from
        #[arg(long)]
        mod_dir: Option<PathBuf>,

        /// Keep mods ticking for this many seconds after they finish
        #[arg(long, default_value_t = 0.0)]
        linger: f64,
    },

    /// Send each prompt as one request of a message batch and print the answers
    Batch {
        #[arg(required = true)]
        prompts: Vec<String>,
    },

    /// Write a default config file
    InitConfig {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

fn log_level(debug: u8) -> &'static str {
    match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<NarratorConfig> {
    let path = path.cloned().unwrap_or_else(NarratorConfig::config_path);
    if !path.exists() {
        return Ok(NarratorConfig::default());
    }
    NarratorConfig::load_from(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn init_config(path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = path.cloned().unwrap_or_else(NarratorConfig::config_path);
    if path.exists() && !force {
        bail!(
            "Config already exists at {} (pass --force to overwrite)",
            path.display()
        );
    }
    NarratorConfig::default()
        .save_to(&path)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    eprintln!("Config file created at: {}", path.display());
    Ok(())
}

async fn run_mods(
    config: NarratorConfig,
    mods: Vec<PathBuf>,
    mod_dir: Option<PathBuf>,
    linger: f64,
) -> Result<()> {
    let linger = Duration::try_from_secs_f64(linger)
        .with_context(|| format!("Invalid linger duration: {linger}"))?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping mods");
            ctrl_c.cancel();
        }
    });

    let mut builder = ModRunner::builder()
        .with_config(config)
        .with_linger(linger)
        .with_shutdown(shutdown);
    for path in &mods {
        builder = builder.with_mod_file(path)?;
    }
    if let Some(dir) = mod_dir {
        builder = builder.with_mod_dir(dir);
    }

    let reports = builder.build()?.run().await;

    let mut failed = 0;
    for report in &reports {
        match &report.outcome {
            Ok(outcome) => println!("{}: {}", report.name, outcome.value),
            Err(fault) => {
                failed += 1;
                println!("{}: {}", report.name, fault);
            }
        }
        if let Some(fault) = &report.update_fault {
            error!("{}: Update stopped: {}", report.name, fault);
        }
    }

    if failed > 0 {
        bail!("{} of {} mod(s) failed", failed, reports.len());
    }
    Ok(())
}

async fn run_batch(config: NarratorConfig, prompts: Vec<String>) -> Result<()> {
    let llm = &config.llm;
    let mut client =
        AnthropicClient::from_env(&llm.api_key_env)?.with_batch_request_timeout(llm.timeout());
    if let Some(base_url) = &llm.base_url {
        client = client.with_base_url(base_url);
    }

    let results = run_prompt_batch(&client, prompts, llm)
        .await
        .context("Batch did not complete")?;
    for result in results {
        match result.outcome {
            Ok(response) => println!("{}: {}", result.custom_id, response.content),
            Err(e) => println!("{}: error: {}", result.custom_id, e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    let _log_guard = init_logging("narrator", config.logging.file, log_level(cli.debug))
        .context("Failed to initialize logging")?;

    match cli.command {
        Command::Run {
            mods,
            mod_dir,
            linger,
        } => run_mods(config, mods, mod_dir, linger).await,
        Command::Batch { prompts } => run_batch(config, prompts).await,
        Command::InitConfig { force } => init_config(cli.config.as_ref(), force),
    }
}
