//! Tool-calling agent loop
//!
//! Drives a bounded sequence of completion calls for one model. Each turn either ends
//! the loop (`stop`), or asks for tool calls which are executed against the query
//! backend and appended to the transcript in the order they were issued.

use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::CompletionClient;
use super::{ChatResponse, ConversationMessage, FinishReason, ToolCall, ToolDefinition};
use crate::query::{QueryBackend, QueryError};
use crate::{GatewayError, Result};

/// Name of the single built-in tool
pub const QUERY_DATABASE_TOOL: &str = "query_database";

/// System prompt used on the tool path when the policy configures none
pub const DEFAULT_TOOL_SYSTEM_PROMPT: &str = "You are a data assistant with read-only access to a database. \
When answering requires data, call the query_database tool with a single read-only SELECT statement. \
Never attempt to modify data. If a tool result reports an error, correct the query and try again. \
Base your final answer only on the returned rows.";

/// Declaration of the `query_database` tool offered to the model
pub fn query_database_tool() -> ToolDefinition {
    ToolDefinition {
        name: QUERY_DATABASE_TOOL.to_string(),
        description: "Executes a read-only SELECT query against the database and returns the rows as a JSON array."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "A single SELECT statement"
                }
            },
            "required": ["sql"]
        }),
    }
}

/// Failures local to one tool call; reported back to the model as text
#[derive(Error, Debug)]
enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Missing required argument '{0}'")]
    MissingArgument(&'static str),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Bounded tool-calling state machine for a single model
pub struct AgentLoop {
    client: Arc<dyn CompletionClient>,
    max_iterations: u32,
}

impl AgentLoop {
    pub fn new(client: Arc<dyn CompletionClient>, max_iterations: u32) -> Self {
        Self {
            client,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run the loop against one model until it answers, fails or hits the cap
    pub async fn run(
        &self,
        user_message: &str,
        system_prompt: Option<&str>,
        tools: &[ToolDefinition],
        backend: &dyn QueryBackend,
        model_key: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let mut transcript = vec![
            ConversationMessage::system(system_prompt.unwrap_or(DEFAULT_TOOL_SYSTEM_PROMPT)),
            ConversationMessage::user(user_message),
        ];

        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            debug!(model_key, iteration, messages = transcript.len(), "Agent loop dispatch");
            let completion = self
                .client
                .raw_completion(&transcript, tools, model_key, cancel)
                .await?;

            match completion.finish_reason {
                FinishReason::Stop => {
                    info!(model_key, iteration, "Agent loop finished");
                    return Ok(ChatResponse {
                        reply: completion.content.unwrap_or_default(),
                        model: completion.model,
                        usage: completion.usage,
                    });
                }
                FinishReason::ToolCalls if !completion.tool_calls.is_empty() => {
                    info!(model_key, iteration, tool_calls = completion.tool_calls.len(), "Model requested tool calls");

                    let calls = completion.tool_calls;
                    transcript.push(ConversationMessage::Assistant {
                        content: completion.content,
                        tool_calls: calls.clone(),
                    });

                    for call in &calls {
                        let content = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                            result = self.execute_tool(call, backend) => match result {
                                Ok(rows) => rows,
                                Err(e) => {
                                    warn!(model_key, tool = %call.function_name, call_id = %call.id, error = %e, "Tool call failed");
                                    format!("Error: {}", e)
                                }
                            },
                        };
                        transcript.push(ConversationMessage::tool(call.id.clone(), content));
                    }
                }
                FinishReason::ToolCalls => {
                    return Err(GatewayError::UnexpectedFinishReason(
                        "tool_calls without any tool call".to_string(),
                    ));
                }
                FinishReason::Other(reason) => {
                    warn!(model_key, iteration, finish_reason = %reason, "Unexpected finish reason");
                    return Err(GatewayError::UnexpectedFinishReason(reason));
                }
            }
        }

        warn!(model_key, max_iterations = self.max_iterations, "Agent loop exceeded iteration cap");
        Err(GatewayError::LoopExceeded {
            iterations: self.max_iterations,
        })
    }

    async fn execute_tool(&self, call: &ToolCall, backend: &dyn QueryBackend) -> std::result::Result<String, ToolError> {
        if call.function_name != QUERY_DATABASE_TOOL {
            return Err(ToolError::UnknownTool(call.function_name.clone()));
        }

        let arguments: serde_json::Value = serde_json::from_str(&call.arguments_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let sql = arguments
            .get("sql")
            .and_then(|v| v.as_str())
            .ok_or(ToolError::MissingArgument("sql"))?;

        info!(tool = QUERY_DATABASE_TOOL, call_id = %call.id, backend = %backend.kind(), "Executing tool call");
        Ok(backend.execute_query(sql).await?)
    }
}
