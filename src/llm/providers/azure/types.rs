//! Azure OpenAI wire types
//! Request/response shapes of the deployment-scoped chat-completion and embedding APIs

use serde::{Deserialize, Serialize};

use crate::llm::{ConversationMessage, TokenUsage, ToolCall, ToolDefinition};

/// Chat completion request body
#[derive(Debug, Clone, Serialize)]
pub struct AzureChatRequest {
    pub messages: Vec<AzureChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AzureTool>>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Chat message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureChatMessage {
    pub role: String,
    /// Null on assistant turns that only carry tool calls
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AzureToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureTool {
    #[serde(rename = "type")]
    pub tool_type: String, // "function"
    pub function: AzureFunction,
}

/// Function definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Tool call in a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: AzureFunctionCall,
}

/// Function call details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String, // JSON string
}

fn function_type() -> String {
    "function".to_string()
}

/// Chat completion response body
#[derive(Debug, Deserialize)]
pub struct AzureChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Option<AzureUsage>,
    #[serde(default)]
    pub choices: Vec<AzureChoice>,
}

/// One choice in a response; normally there is exactly one
#[derive(Debug, Deserialize)]
pub struct AzureChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<AzureChatMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AzureUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Embedding request body
#[derive(Debug, Serialize)]
pub struct AzureEmbeddingRequest<'a> {
    pub input: &'a str,
}

/// Embedding response body
#[derive(Debug, Deserialize)]
pub struct AzureEmbeddingResponse {
    pub data: Vec<AzureEmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub struct AzureEmbeddingData {
    pub embedding: Vec<f32>,
}

impl From<AzureUsage> for TokenUsage {
    fn from(usage: AzureUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<&ToolCall> for AzureToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            call_type: function_type(),
            function: AzureFunctionCall {
                name: call.function_name.clone(),
                arguments: call.arguments_json.clone(),
            },
        }
    }
}

impl From<AzureToolCall> for ToolCall {
    fn from(call: AzureToolCall) -> Self {
        Self {
            id: call.id,
            function_name: call.function.name,
            arguments_json: call.function.arguments,
        }
    }
}

impl From<&ToolDefinition> for AzureTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: function_type(),
            function: AzureFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

impl From<&ConversationMessage> for AzureChatMessage {
    fn from(msg: &ConversationMessage) -> Self {
        let role = msg.role().to_string();
        match msg {
            ConversationMessage::System { content } | ConversationMessage::User { content } => Self {
                role,
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ConversationMessage::Assistant { content, tool_calls } => Self {
                role,
                content: content.clone(),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls.iter().map(AzureToolCall::from).collect())
                },
                tool_call_id: None,
            },
            ConversationMessage::Tool { tool_call_id, content } => Self {
                role,
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            },
        }
    }
}
