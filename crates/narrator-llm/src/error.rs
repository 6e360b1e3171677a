use std::time::Duration;
use thiserror::Error;

use crate::batch::BatchStatus;

/// Failures talking to the LLM service or driving a conversation
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network or connection level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status
    #[error("LLM service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be understood
    #[error("failed to decode LLM response: {0}")]
    Decode(String),

    /// A request or poll loop exceeded its deadline
    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),

    /// A batch ended in a non-success state
    #[error("batch {id} finished as {status}")]
    BatchFailed { id: String, status: BatchStatus },

    /// The API key environment variable is not set
    #[error("{0} never passed; set it in the environment")]
    MissingApiKey(String),

    /// The model kept asking for tools past the configured bound
    #[error("model requested tools for more than {0} rounds")]
    ToolLoopLimit(usize),
}

impl LlmError {
    /// Whether the failure came from reaching the service at all
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LlmError::Transport(_) | LlmError::Status { .. } | LlmError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LlmError::Decode(err.to_string())
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Decode(err.to_string())
    }
}
