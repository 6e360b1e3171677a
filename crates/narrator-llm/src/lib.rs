/// LLM boundary for narrator
///
/// This crate owns the message model shared with the scripting host, the
/// client traits the host talks to, the Anthropic adapter, batch polling and
/// the tool-calling conversation engine.
pub mod anthropic;
pub mod batch;
pub mod client;
pub mod conversation;
pub mod error;
pub mod tool;
pub mod types;

pub use anthropic::AnthropicClient;
pub use batch::{BatchRequest, BatchResult, BatchStatus, PollSettings, submit_batch, wait_for_batch};
pub use client::{BatchClient, LlmClient};
pub use conversation::{
    Conversation, ConversationEngine, ConversationPhase, ConversationState, ToolResult,
};
pub use error::LlmError;
pub use tool::{ToolDescriptor, ToolInvoker, ToolOutcome, format_tool_error};
pub use types::{
    LlmResponse, Message, Role, SendOptions, ToolCall, ToolChoice, ToolSpec, Usage,
};
