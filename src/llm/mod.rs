//! LLM dispatch, routing and tool-calling
//!
//! This module provides the core request-dispatch and resilience engine: the per-model
//! circuit breaker, the retrying provider client, policy-driven routing and the agent loop.

pub mod agent;
pub mod circuit_breaker;
pub mod orchestrator;
pub mod providers;
pub mod router;
pub mod traits;

use serde::{Deserialize, Serialize};

/// Logical model slot (e.g. "gpt4"), distinct from the provider's deployment name
pub type ModelKey = String;

/// Ordered, non-empty sequence of model keys: `[primary, fallback1, ...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChain {
    keys: Vec<ModelKey>,
}

impl ModelChain {
    /// Build a chain from a primary key and already-resolved fallbacks
    pub fn new(primary: ModelKey, fallbacks: Vec<ModelKey>) -> Self {
        let mut keys = Vec::with_capacity(fallbacks.len() + 1);
        keys.push(primary);
        keys.extend(fallbacks);
        Self { keys }
    }

    pub fn primary(&self) -> &str {
        &self.keys[0]
    }

    pub fn keys(&self) -> &[ModelKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl std::fmt::Display for ModelChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.keys.join("->"))
    }
}

/// One entry in the tool-calling transcript
///
/// Each role carries only the fields valid for it: an assistant turn may carry tool
/// calls, a tool turn must carry the id of the call it answers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationMessage {
    System { content: String },
    User { content: String },
    Assistant { content: Option<String>, tool_calls: Vec<ToolCall> },
    Tool { tool_call_id: String, content: String },
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ConversationMessage::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ConversationMessage::User { content: content.into() }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ConversationMessage::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            ConversationMessage::System { .. } => "system",
            ConversationMessage::User { .. } => "user",
            ConversationMessage::Assistant { .. } => "assistant",
            ConversationMessage::Tool { .. } => "tool",
        }
    }
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    /// JSON-encoded argument object, exactly as the model produced it
    pub arguments_json: String,
}

/// A tool declaration offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: serde_json::Value,
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Other(String),
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "tool_calls" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::ToolCalls => write!(f, "tool_calls"),
            FinishReason::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One provider response, normalized
#[derive(Debug, Clone, PartialEq)]
pub struct RawCompletion {
    pub finish_reason: FinishReason,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
    pub model: String,
}

/// Final answer for one model call (simple path) or one finished tool loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}
