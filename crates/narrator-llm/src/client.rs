use async_trait::async_trait;

use crate::batch::{BatchRequest, BatchResult, BatchStatus};
use crate::error::LlmError;
use crate::types::{LlmResponse, Message, SendOptions};

/// A remote model that answers one message list at a time.
///
/// Implementations are stateless and shared across script instances, so they
/// must be safe to call concurrently. Retries, if any, live here and not in
/// the conversation engine.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn send(&self, messages: &[Message], options: &SendOptions)
        -> Result<LlmResponse, LlmError>;
}

/// Asynchronous bulk submission of many independent requests
#[async_trait]
pub trait BatchClient: Send + Sync {
    /// Submit requests and return the batch id
    async fn create_batch(&self, requests: Vec<BatchRequest>) -> Result<String, LlmError>;

    /// Current processing state of a batch
    async fn poll_batch(&self, batch_id: &str) -> Result<BatchStatus, LlmError>;

    /// Per-request results of a batch that has finished
    async fn fetch_results(&self, batch_id: &str) -> Result<Vec<BatchResult>, LlmError>;
}
