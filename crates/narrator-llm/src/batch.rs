use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};

use crate::client::BatchClient;
use crate::error::LlmError;
use crate::types::{LlmResponse, Message, SendOptions};

/// Default delay between two batch polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default upper bound on waiting for a batch
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Processing state of a submitted batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Succeeded,
    Errored,
    Canceled,
    Expired,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Processing)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Succeeded => "succeeded",
            BatchStatus::Errored => "errored",
            BatchStatus::Canceled => "canceled",
            BatchStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// One request inside a batch
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Caller-chosen id used to match results back to requests
    pub custom_id: String,
    pub messages: Vec<Message>,
    pub options: SendOptions,
}

/// Outcome of one request inside a finished batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub custom_id: String,
    pub outcome: Result<LlmResponse, String>,
}

/// Polling cadence and deadline for a long-running batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

/// Poll until the batch reaches a terminal state, then fetch its results.
///
/// Any terminal state other than `succeeded` is an error, as is running past
/// `settings.timeout`. The deadline also bounds each poll and the final fetch.
pub async fn wait_for_batch<C>(
    client: &C,
    batch_id: &str,
    settings: PollSettings,
) -> Result<Vec<BatchResult>, LlmError>
where
    C: BatchClient + ?Sized,
{
    let deadline = Instant::now() + settings.timeout;
    let expired = || LlmError::Timeout(settings.timeout);

    loop {
        let status = timeout_at(deadline, client.poll_batch(batch_id))
            .await
            .map_err(|_| expired())??;
        debug!(target: "llm", "Batch {} status: {}", batch_id, status);

        match status {
            BatchStatus::Processing => {}
            BatchStatus::Succeeded => {
                let results = timeout_at(deadline, client.fetch_results(batch_id))
                    .await
                    .map_err(|_| expired())??;
                info!(target: "llm", "Batch {} finished with {} result(s)", batch_id, results.len());
                return Ok(results);
            }
            failed => {
                return Err(LlmError::BatchFailed {
                    id: batch_id.to_string(),
                    status: failed,
                });
            }
        }

        let now = Instant::now();
        if now + settings.interval > deadline {
            return Err(expired());
        }
        tokio::time::sleep(settings.interval).await;
    }
}

/// Create a batch and wait for it to finish
pub async fn submit_batch<C>(
    client: &C,
    requests: Vec<BatchRequest>,
    settings: PollSettings,
) -> Result<Vec<BatchResult>, LlmError>
where
    C: BatchClient + ?Sized,
{
    let count = requests.len();
    let batch_id = tokio::time::timeout(settings.timeout, client.create_batch(requests))
        .await
        .map_err(|_| LlmError::Timeout(settings.timeout))??;
    info!(target: "llm", "Submitted batch {} with {} request(s)", batch_id, count);
    wait_for_batch(client, &batch_id, settings).await
}
