use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use narrator_config::{LlmConfig, NarratorConfig};
use narrator_llm::{
    BatchClient, BatchRequest, BatchResult, BatchStatus, LlmClient, LlmError, LlmResponse,
    Message, SendOptions,
};
use narrator_runner::{ModRunner, RunnerError, run_prompt_batch, send_defaults};
use narrator_scripting_host::{ModSource, ScriptFault};

/// Answers every request with the last message, prefixed
struct EchoClient;

#[async_trait]
impl LlmClient for EchoClient {
    async fn send(
        &self,
        messages: &[Message],
        _options: &SendOptions,
    ) -> Result<LlmResponse, LlmError> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(LlmResponse::text(format!("echo: {last}")))
    }
}

fn source(name: &str, code: &str) -> ModSource {
    ModSource {
        name: name.to_string(),
        path: PathBuf::from(format!("{name}.lua")),
        source: code.to_string(),
    }
}

fn runner_with(mods: Vec<ModSource>) -> narrator_runner::ModRunnerBuilder {
    let mut builder = ModRunner::builder()
        .with_client(Arc::new(EchoClient))
        .with_documentation("");
    for m in mods {
        builder = builder.with_mod(m);
    }
    builder
}

#[tokio::test]
async fn test_mods_run_independently() {
    let runner = runner_with(vec![
        source("beta", "error('boom')"),
        source("alpha", "return think('hi').content"),
    ])
    .build()
    .unwrap();
    assert_eq!(runner.mod_names(), vec!["beta", "alpha"]);

    let reports = runner.run().await;
    assert_eq!(reports.len(), 2);

    assert_eq!(reports[0].name, "alpha");
    let outcome = reports[0].outcome.as_ref().unwrap();
    assert_eq!(outcome.value, serde_json::json!("echo: hi"));
    assert_eq!(outcome.await_cycles, 1);
    assert!(reports[0].succeeded());

    assert_eq!(reports[1].name, "beta");
    match &reports[1].outcome {
        Err(fault @ ScriptFault::Guest { .. }) => {
            assert_eq!(fault.script(), "beta");
            assert!(fault.to_string().contains("boom"));
        }
        other => panic!("expected a guest fault, got {other:?}"),
    }
    assert!(!reports[1].succeeded());
}

#[tokio::test]
async fn test_mods_await_in_parallel() {
    let mods = (0..4)
        .map(|i| source(&format!("sleeper{i}"), "sleep(0.2) return 'awake'"))
        .collect();
    let runner = runner_with(mods).build().unwrap();

    let started = std::time::Instant::now();
    let reports = runner.run().await;
    let elapsed = started.elapsed();

    assert_eq!(reports.len(), 4);
    assert!(reports.iter().all(|r| r.succeeded()));
    assert!(elapsed < Duration::from_millis(700), "mods ran one after another: {elapsed:?}");
}

#[tokio::test]
async fn test_linger_keeps_update_running() {
    let code = r#"
        count = 0
        function Update() count = count + 1 end
        return "ok"
    "#;
    let reports = runner_with(vec![source("ticker", code)])
        .with_linger(Duration::from_millis(150))
        .build()
        .unwrap()
        .run()
        .await;

    assert!(reports[0].succeeded());
    assert!(reports[0].ticks > 0);
}

#[tokio::test]
async fn test_update_fault_is_reported() {
    let code = r#"
        function Update() error("bad tick") end
    "#;
    let reports = runner_with(vec![source("broken", code)])
        .with_linger(Duration::from_millis(100))
        .build()
        .unwrap()
        .run()
        .await;

    assert!(reports[0].outcome.is_ok());
    let fault = reports[0].update_fault.as_ref().unwrap();
    assert!(fault.is_guest_fault());
    assert!(fault.to_string().contains("bad tick"));
    assert!(!reports[0].succeeded());
}

#[tokio::test]
async fn test_shutdown_cancels_suspended_mods() {
    let shutdown = CancellationToken::new();
    let runner = runner_with(vec![source("stuck", "sleep(0.3) return 'never'")])
        .with_shutdown(shutdown.clone())
        .build()
        .unwrap();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let reports = tokio::time::timeout(Duration::from_secs(5), runner.run())
        .await
        .expect("runner ignored shutdown");
    assert!(matches!(reports[0].outcome, Err(ScriptFault::Cancelled(_))));
    // The pending sleep settles before the mod stops
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_during_endless_update_is_clean() {
    let code = r#"
        function Update() while true do end end
        return "started"
    "#;
    let shutdown = CancellationToken::new();
    let runner = runner_with(vec![source("spinner", code)])
        .with_linger(Duration::from_secs(30))
        .with_shutdown(shutdown.clone())
        .build()
        .unwrap();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let reports = tokio::time::timeout(Duration::from_secs(5), runner.run())
        .await
        .expect("runner hung on a spinning Update");
    assert!(reports[0].outcome.is_ok());
    assert!(reports[0].update_fault.is_none());
    assert!(reports[0].succeeded());
}

#[test]
fn test_no_mods_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = ModRunner::builder()
        .with_client(Arc::new(EchoClient))
        .with_mod_dir(dir.path())
        .build();
    assert!(matches!(result, Err(RunnerError::NoMods)));
}

#[test]
fn test_mod_dir_respects_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("liam.lua"), "return 1").unwrap();
    std::fs::write(dir.path().join("muted.lua"), "return 2").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a mod").unwrap();

    let config: NarratorConfig = toml::from_str(
        r#"
        [mods.config.muted]
        enabled = false
        "#,
    )
    .unwrap();

    let runner = ModRunner::builder()
        .with_config(config)
        .with_client(Arc::new(EchoClient))
        .with_documentation("")
        .with_mod_dir(dir.path())
        .build()
        .unwrap();
    assert_eq!(runner.mod_names(), vec!["liam"]);
}

#[test]
fn test_missing_mod_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.lua");
    let result = ModRunner::builder().with_mod_file(&path);
    match result {
        Err(RunnerError::ModFile { path: reported, .. }) => assert_eq!(reported, path),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[test]
fn test_send_defaults_follow_config() {
    let config = LlmConfig {
        model: "claude-test".to_string(),
        max_tokens: 77,
        temperature: 0.25,
        timeout_secs: 9,
        ..LlmConfig::default()
    };
    let options = send_defaults(&config);
    assert_eq!(options.model, "claude-test");
    assert_eq!(options.max_tokens, 77);
    assert_eq!(options.temperature, 0.25);
    assert_eq!(options.timeout, Duration::from_secs(9));
    assert!(options.tools.is_empty());
}

/// Batch client that completes on the second poll and echoes each request
#[derive(Default)]
struct EchoBatches {
    submitted: Mutex<Vec<BatchRequest>>,
    polls: Mutex<usize>,
}

#[async_trait]
impl BatchClient for EchoBatches {
    async fn create_batch(&self, requests: Vec<BatchRequest>) -> Result<String, LlmError> {
        *self.submitted.lock().unwrap() = requests;
        Ok("batch_7".to_string())
    }

    async fn poll_batch(&self, _batch_id: &str) -> Result<BatchStatus, LlmError> {
        let mut polls = self.polls.lock().unwrap();
        *polls += 1;
        Ok(if *polls < 2 {
            BatchStatus::Processing
        } else {
            BatchStatus::Succeeded
        })
    }

    async fn fetch_results(&self, _batch_id: &str) -> Result<Vec<BatchResult>, LlmError> {
        Ok(self
            .submitted
            .lock()
            .unwrap()
            .iter()
            .map(|r| BatchResult {
                custom_id: r.custom_id.clone(),
                outcome: Ok(LlmResponse::text(format!("re: {}", r.messages[0].content))),
            })
            .collect())
    }
}

#[tokio::test(start_paused = true)]
async fn test_prompt_batch() {
    let client = EchoBatches::default();
    let config = LlmConfig {
        batch_poll_interval_secs: 1,
        ..LlmConfig::default()
    };

    let results = run_prompt_batch(
        &client,
        vec!["first".to_string(), "second".to_string()],
        &config,
    )
    .await
    .unwrap();

    let submitted = client.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[1].custom_id, "prompt-1");
    assert_eq!(submitted[1].options.model, config.model);

    assert_eq!(results[0].custom_id, "prompt-0");
    assert_eq!(results[0].outcome.as_ref().unwrap().content, "re: first");
    assert_eq!(*client.polls.lock().unwrap(), 2);
}
