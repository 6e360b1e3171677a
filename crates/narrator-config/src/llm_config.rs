use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the API key unless configured otherwise
pub const DEFAULT_API_KEY_ENV: &str = "Anthropic__BearerToken";

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.3
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_tool_rounds() -> usize {
    16
}

fn default_batch_poll_interval_secs() -> u64 {
    10
}

fn default_batch_timeout_secs() -> u64 {
    3600
}

/// Defaults for requests sent to the LLM service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model used when a script does not pick one
    #[serde(default = "default_model")]
    pub model: String,

    /// Completion budget used when a script does not set `max_tokens`
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature used when a script does not set one
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Override for the service base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Upper bound for one request in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum consecutive tool rounds in one conversation
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Delay between batch status polls in seconds
    #[serde(default = "default_batch_poll_interval_secs")]
    pub batch_poll_interval_secs: u64,

    /// Upper bound on waiting for a batch in seconds
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            max_tool_rounds: default_max_tool_rounds(),
            batch_poll_interval_secs: default_batch_poll_interval_secs(),
            batch_timeout_secs: default_batch_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn batch_poll_interval(&self) -> Duration {
        Duration::from_secs(self.batch_poll_interval_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}
