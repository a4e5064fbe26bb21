//! Common traits for completion providers
//! The agent loop and the orchestrator only talk to the provider through this seam.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ChatResponse, ConversationMessage, RawCompletion, ToolDefinition};
use crate::Result;

/// Core trait that the provider client implements
///
/// Every method takes the caller's cancellation token. A cancelled token aborts
/// in-flight attempts and pending backoff sleeps with [`crate::GatewayError::Cancelled`].
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Single-turn chat completion (simple path)
    async fn chat_completion(
        &self,
        user_message: &str,
        model_key: &str,
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse>;

    /// One turn of a tool-calling conversation
    async fn raw_completion(
        &self,
        transcript: &[ConversationMessage],
        tools: &[ToolDefinition],
        model_key: &str,
        cancel: &CancellationToken,
    ) -> Result<RawCompletion>;

    /// Best-effort embedding vector, single attempt, no breaker accounting
    async fn embedding(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>>;
}
