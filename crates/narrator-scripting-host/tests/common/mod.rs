// Shared helpers for scripting host integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use narrator_llm::{
    ConversationEngine, LlmClient, LlmError, LlmResponse, Message, SendOptions, ToolCall,
};
use narrator_scripting_host::{ModContext, ModHost};

/// One request as the client saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub options: SendOptions,
}

/// LLM client that replays canned replies and records every request.
///
/// Once the script runs out it echoes the last user message back.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_replies(replies: Vec<Result<LlmResponse, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn send(
        &self,
        messages: &[Message],
        options: &SendOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: messages.to_vec(),
            options: options.clone(),
        });

        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return reply;
        }

        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(LlmResponse::text(format!("echo: {last}")))
    }
}

/// Reply asking for a single tool call
pub fn tool_request(id: &str, name: &str, input: &str) -> LlmResponse {
    LlmResponse {
        tool_calls: Some(vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input: input.to_string(),
        }]),
        ..Default::default()
    }
}

pub fn context(name: &str, client: Arc<ScriptedClient>) -> ModContext {
    ModContext::new(name, Arc::new(ConversationEngine::new(client)))
}

/// Build and initialize a host around `source`
pub async fn host(name: &str, client: Arc<ScriptedClient>, source: &str) -> ModHost {
    let mut host = ModHost::new(context(name, client), source).unwrap();
    host.initialize().await.unwrap();
    host
}
