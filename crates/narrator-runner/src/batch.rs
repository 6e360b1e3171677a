use narrator_config::LlmConfig;
use narrator_llm::{BatchClient, BatchRequest, BatchResult, LlmError, Message, PollSettings, submit_batch};

use crate::runner::send_defaults;

/// Polling cadence from the `[llm]` config section
pub fn poll_settings(config: &LlmConfig) -> PollSettings {
    PollSettings {
        interval: config.batch_poll_interval(),
        timeout: config.batch_timeout(),
    }
}

/// Send each prompt as its own request of one batch and wait for all of them.
///
/// Requests are tagged `prompt-0`, `prompt-1`, ... in input order.
pub async fn run_prompt_batch<C>(
    client: &C,
    prompts: Vec<String>,
    config: &LlmConfig,
) -> Result<Vec<BatchResult>, LlmError>
where
    C: BatchClient + ?Sized,
{
    let options = send_defaults(config);
    let requests = prompts
        .into_iter()
        .enumerate()
        .map(|(i, prompt)| BatchRequest {
            custom_id: format!("prompt-{i}"),
            messages: vec![Message::user(prompt)],
            options: options.clone(),
        })
        .collect();

    submit_batch(client, requests, poll_settings(config)).await
}
