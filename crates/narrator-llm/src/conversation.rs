//! Tool-calling conversation loop
//!
//! One `run` call walks `Building -> Sent -> (ToolsRequested -> ToolsExecuted -> Sent)* -> Done`.
//! Transport failures end the conversation; tool failures never do, they are
//! turned into text and handed back to the model.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::LlmClient;
use crate::error::LlmError;
use crate::tool::{ToolDescriptor, format_tool_error};
use crate::types::{LlmResponse, Message, SendOptions, ToolCall, Usage};

/// Default bound on consecutive tool rounds in one conversation
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 16;

/// Where a conversation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Building,
    Sent,
    ToolsRequested,
    ToolsExecuted,
    Done,
}

/// Record of one executed tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: String,
    pub failed: bool,
}

/// Mutable state of one conversation, owned by the engine while it runs
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub tool_results: Vec<ToolResult>,
    pub usage: Usage,
    pub phase: ConversationPhase,
    pub requests: usize,
}

impl ConversationState {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tool_results: Vec::new(),
            usage: Usage::default(),
            phase: ConversationPhase::Building,
            requests: 0,
        }
    }
}

/// Finished conversation as handed back to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    /// Final assistant text
    pub content: String,
    /// Input messages, intermediate tool turns and the final reply
    pub messages: Vec<Message>,
    pub usage: Usage,
    /// Number of requests sent to the service
    pub requests: usize,
    /// Phase the conversation ended in
    pub phase: ConversationPhase,
    #[serde(skip)]
    pub tool_results: Vec<ToolResult>,
}

/// Drives message lists through an [`LlmClient`], executing tool calls in between
#[derive(Clone)]
pub struct ConversationEngine {
    client: Arc<dyn LlmClient>,
    max_tool_rounds: usize,
}

impl ConversationEngine {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    /// Run a conversation to completion
    pub async fn run(
        &self,
        messages: Vec<Message>,
        mut options: SendOptions,
        tools: &[ToolDescriptor],
    ) -> Result<Conversation, LlmError> {
        let mut state = ConversationState::new(messages);

        if options.tools.is_empty() {
            options.tools = tools.iter().map(ToolDescriptor::spec).collect();
        }

        let mut rounds = 0;
        loop {
            let response = self.send(&mut state, &options).await?;

            if response.requested_tools().is_empty() {
                state.messages.push(Message::assistant(response.content.clone()));
                state.phase = ConversationPhase::Done;
                debug!(
                    target: "conversation",
                    "Conversation done after {} request(s), {} token(s)",
                    state.requests,
                    state.usage.total()
                );
                return Ok(Conversation {
                    content: response.content,
                    messages: state.messages,
                    usage: state.usage,
                    requests: state.requests,
                    phase: state.phase,
                    tool_results: state.tool_results,
                });
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                return Err(LlmError::ToolLoopLimit(self.max_tool_rounds));
            }

            state.phase = ConversationPhase::ToolsRequested;
            let calls = response.requested_tools().to_vec();
            state.messages.push(Message::assistant_with_tool_calls(
                response.content,
                calls.clone(),
            ));

            for call in &calls {
                let result = execute_tool(tools, call).await;
                state.messages.push(Message::tool_result(call, result.output.clone()));
                state.tool_results.push(result);
            }
            state.phase = ConversationPhase::ToolsExecuted;
        }
    }

    async fn send(
        &self,
        state: &mut ConversationState,
        options: &SendOptions,
    ) -> Result<LlmResponse, LlmError> {
        state.phase = ConversationPhase::Sent;
        state.requests += 1;
        debug!(
            target: "conversation",
            "Sending request {} with {} message(s) to {}",
            state.requests,
            state.messages.len(),
            options.model
        );

        let response = tokio::time::timeout(
            options.timeout,
            self.client.send(&state.messages, options),
        )
        .await
        .map_err(|_| LlmError::Timeout(options.timeout))??;

        state.usage += response.usage;
        Ok(response)
    }
}

async fn execute_tool(tools: &[ToolDescriptor], call: &ToolCall) -> ToolResult {
    let outcome = match tools.iter().find(|tool| tool.name() == call.name) {
        Some(tool) => tool.invoke(call.input.clone()).await,
        None => Err(format_tool_error(&call.name, "no such tool is registered")),
    };

    let failed = outcome.is_err();
    if let Err(message) = &outcome {
        warn!(target: "conversation", "Tool '{}' failed: {}", call.name, message);
    }

    ToolResult {
        call_id: call.id.clone(),
        name: call.name.clone(),
        output: outcome.unwrap_or_else(|message| message),
        failed,
    }
}
