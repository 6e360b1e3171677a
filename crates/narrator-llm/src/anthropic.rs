//! Anthropic Messages API adapter
//!
//! Maps the crate's message model onto the Messages and Message Batches
//! endpoints. Tools are advertised with a single string parameter named
//! `input`, which matches how scripts define them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::batch::{BatchRequest, BatchResult, BatchStatus};
use crate::client::{BatchClient, LlmClient};
use crate::error::LlmError;
use crate::types::{LlmResponse, Message, Role, SendOptions, ToolCall, ToolChoice, Usage};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
/// Default bound for one Message Batches HTTP call
pub const DEFAULT_BATCH_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for the Anthropic API
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    batch_timeout: Duration,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            batch_timeout: DEFAULT_BATCH_REQUEST_TIMEOUT,
        }
    }

    /// Build a client from the API key stored in `env_var`
    pub fn from_env(env_var: &str) -> Result<Self, LlmError> {
        let api_key =
            std::env::var(env_var).map_err(|_| LlmError::MissingApiKey(env_var.to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Upper bound for each Message Batches HTTP call
    pub fn with_batch_request_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn send(
        &self,
        messages: &[Message],
        options: &SendOptions,
    ) -> Result<LlmResponse, LlmError> {
        let body = message_params(messages, options);
        debug!(target: "llm", "POST /v1/messages ({} message(s))", messages.len());

        let response = self
            .request(reqwest::Method::POST, "/v1/messages")
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await?;
        let reply: ApiMessage = Self::checked(response).await?.json().await?;
        Ok(reply.into_response())
    }
}

#[async_trait]
impl BatchClient for AnthropicClient {
    async fn create_batch(&self, requests: Vec<BatchRequest>) -> Result<String, LlmError> {
        let requests: Vec<Value> = requests
            .iter()
            .map(|request| {
                json!({
                    "custom_id": request.custom_id,
                    "params": message_params(&request.messages, &request.options),
                })
            })
            .collect();

        let response = self
            .request(reqwest::Method::POST, "/v1/messages/batches")
            .timeout(self.batch_timeout)
            .json(&json!({ "requests": requests }))
            .send()
            .await?;
        let batch: ApiBatch = Self::checked(response).await?.json().await?;
        Ok(batch.id)
    }

    async fn poll_batch(&self, batch_id: &str) -> Result<BatchStatus, LlmError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/messages/batches/{}", batch_id),
            )
            .timeout(self.batch_timeout)
            .send()
            .await?;
        let batch: ApiBatch = Self::checked(response).await?.json().await?;
        Ok(batch.status())
    }

    async fn fetch_results(&self, batch_id: &str) -> Result<Vec<BatchResult>, LlmError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/messages/batches/{}/results", batch_id),
            )
            .timeout(self.batch_timeout)
            .send()
            .await?;
        let body = Self::checked(response).await?.text().await?;
        parse_batch_results(&body)
    }
}

fn message_params(messages: &[Message], options: &SendOptions) -> Value {
    let mut params = json!({
        "model": options.model,
        "max_tokens": options.max_tokens,
        "temperature": options.temperature,
        "messages": to_api_messages(messages),
    });

    if !options.system.is_empty() {
        params["system"] = Value::String(options.system.join("\n"));
    }

    if !options.tools.is_empty() {
        params["tools"] = options
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": {
                        "type": "object",
                        "properties": { "input": { "type": "string" } },
                        "required": ["input"],
                    },
                })
            })
            .collect();

        if let Some(choice) = &options.tool_choice {
            params["tool_choice"] = match choice {
                ToolChoice::Auto => json!({ "type": "auto" }),
                ToolChoice::Tool { name } => json!({ "type": "tool", "name": name }),
            };
        }
    }

    params
}

/// Tool results travel as user turns; consecutive ones are merged into one turn.
fn to_api_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::User => out.push(json!({ "role": "user", "content": message.content })),
            Role::Assistant if message.tool_calls.is_empty() => {
                out.push(json!({ "role": "assistant", "content": message.content }))
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": message.content }));
                }
                for call in &message.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": { "input": call.input },
                    }));
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id,
                    "content": message.content,
                });
                let merged = out.last_mut().and_then(|last| {
                    let is_result_turn = last["role"] == "user" && last["content"].is_array();
                    if is_result_turn {
                        last["content"].as_array_mut()
                    } else {
                        None
                    }
                });
                match merged {
                    Some(blocks) => blocks.push(block),
                    None => out.push(json!({ "role": "user", "content": [block] })),
                }
            }
        }
    }

    out
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Vec<ApiContent>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl ApiMessage {
    fn into_response(self) -> LlmResponse {
        let mut text = String::new();
        let mut calls = Vec::new();

        for block in self.content {
            match block {
                ApiContent::Text { text: part } => text.push_str(&part),
                ApiContent::ToolUse { id, name, input } => {
                    let input = match input.get("input") {
                        Some(Value::String(s)) => s.clone(),
                        _ => input.to_string(),
                    };
                    calls.push(ToolCall { id, name, input });
                }
                ApiContent::Other => {}
            }
        }

        LlmResponse {
            content: text,
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
            usage: Usage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiBatch {
    id: String,
    processing_status: String,
    #[serde(default)]
    request_counts: ApiRequestCounts,
}

#[derive(Debug, Default, Deserialize)]
struct ApiRequestCounts {
    #[serde(default)]
    succeeded: u64,
    #[serde(default)]
    errored: u64,
    #[serde(default)]
    canceled: u64,
    #[serde(default)]
    expired: u64,
}

impl ApiBatch {
    fn status(&self) -> BatchStatus {
        if self.processing_status != "ended" {
            return BatchStatus::Processing;
        }
        let counts = &self.request_counts;
        if counts.succeeded > 0 {
            BatchStatus::Succeeded
        } else if counts.errored > 0 {
            BatchStatus::Errored
        } else if counts.canceled > 0 {
            BatchStatus::Canceled
        } else if counts.expired > 0 {
            BatchStatus::Expired
        } else {
            BatchStatus::Succeeded
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiBatchLine {
    custom_id: String,
    result: ApiBatchOutcome,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBatchOutcome {
    Succeeded { message: ApiMessage },
    Errored { error: Value },
    Canceled,
    Expired,
}

/// Results come back as JSON lines, one per request
fn parse_batch_results(body: &str) -> Result<Vec<BatchResult>, LlmError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let line: ApiBatchLine = serde_json::from_str(line)?;
            let outcome = match line.result {
                ApiBatchOutcome::Succeeded { message } => Ok(message.into_response()),
                ApiBatchOutcome::Errored { error } => Err(error.to_string()),
                ApiBatchOutcome::Canceled => Err("canceled".to_string()),
                ApiBatchOutcome::Expired => Err("expired".to_string()),
            };
            Ok(BatchResult {
                custom_id: line.custom_id,
                outcome,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolSpec;

    #[test]
    fn test_batch_calls_are_bounded() {
        let client = AnthropicClient::new("key");
        assert_eq!(client.batch_timeout, DEFAULT_BATCH_REQUEST_TIMEOUT);

        let client = client.with_batch_request_timeout(Duration::from_secs(5));
        assert_eq!(client.batch_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_message_params_include_system_and_tools() {
        let options = SendOptions {
            system: vec!["Be brief.".to_string(), "Be kind.".to_string()],
            tools: vec![ToolSpec {
                name: "roll".to_string(),
                description: "Roll a die".to_string(),
            }],
            tool_choice: Some(ToolChoice::Tool {
                name: "roll".to_string(),
            }),
            ..Default::default()
        };

        let params = message_params(&[Message::user("hi")], &options);

        assert_eq!(params["system"], "Be brief.\nBe kind.");
        assert_eq!(params["tools"][0]["name"], "roll");
        assert_eq!(params["tool_choice"]["type"], "tool");
        assert_eq!(params["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_tool_results_merge_into_one_user_turn() {
        let calls = vec![
            ToolCall {
                id: "a".to_string(),
                name: "roll".to_string(),
                input: "6".to_string(),
            },
            ToolCall {
                id: "b".to_string(),
                name: "roll".to_string(),
                input: "20".to_string(),
            },
        ];
        let messages = vec![
            Message::user("roll twice"),
            Message::assistant_with_tool_calls("", calls.clone()),
            Message::tool_result(&calls[0], "4"),
            Message::tool_result(&calls[1], "17"),
        ];

        let api = to_api_messages(&messages);

        assert_eq!(api.len(), 3);
        assert_eq!(api[1]["content"][0]["type"], "tool_use");
        assert_eq!(api[1]["content"][0]["input"]["input"], "6");
        assert_eq!(api[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(api[2]["content"][1]["tool_use_id"], "b");
    }

    #[test]
    fn test_response_parsing_extracts_tool_calls() {
        let body = json!({
            "content": [
                { "type": "text", "text": "Rolling." },
                { "type": "tool_use", "id": "t1", "name": "roll", "input": { "input": "6" } }
            ],
            "usage": { "input_tokens": 12, "output_tokens": 7 }
        });

        let message: ApiMessage = serde_json::from_value(body).unwrap();
        let response = message.into_response();

        assert_eq!(response.content, "Rolling.");
        assert_eq!(response.requested_tools()[0].input, "6");
        assert_eq!(response.usage.output_tokens, 7);
    }

    #[test]
    fn test_batch_status_mapping() {
        let batch: ApiBatch = serde_json::from_value(json!({
            "id": "b1",
            "processing_status": "ended",
            "request_counts": { "succeeded": 0, "errored": 2 }
        }))
        .unwrap();
        assert_eq!(batch.status(), BatchStatus::Errored);

        let batch: ApiBatch = serde_json::from_value(json!({
            "id": "b1",
            "processing_status": "in_progress"
        }))
        .unwrap();
        assert_eq!(batch.status(), BatchStatus::Processing);
    }

    #[test]
    fn test_parse_batch_results_lines() {
        let body = concat!(
            r#"{"custom_id":"a","result":{"type":"succeeded","message":{"content":[{"type":"text","text":"hi"}]}}}"#,
            "\n",
            r#"{"custom_id":"b","result":{"type":"expired"}}"#,
            "\n"
        );

        let results = parse_batch_results(body).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, Ok(LlmResponse::text("hi")));
        assert_eq!(results[1].outcome, Err("expired".to_string()));
    }

    #[test]
    fn test_from_env_requires_key() {
        let err = AnthropicClient::from_env("NARRATOR_TEST_KEY_THAT_IS_NOT_SET").err();
        assert!(matches!(err, Some(LlmError::MissingApiKey(_))));
    }
}
