//! Request orchestration across a model chain
//!
//! Walks the resolved chain in order and stops at the first model that produces an
//! answer. Fallthrough failures move on to the next model, fatal ones end the request.

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::agent::AgentLoop;
use super::traits::CompletionClient;
use super::{ChatResponse, ModelChain, ModelKey, ToolDefinition};
use crate::query::QueryBackend;
use crate::{GatewayError, Result};

/// The answer plus the chain entry that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct FinalAnswer {
    pub response: ChatResponse,
    pub model_key: ModelKey,
}

pub struct RequestOrchestrator {
    client: Arc<dyn CompletionClient>,
    agent: AgentLoop,
}

impl RequestOrchestrator {
    pub fn new(client: Arc<dyn CompletionClient>, max_iterations: u32) -> Self {
        Self {
            agent: AgentLoop::new(Arc::clone(&client), max_iterations),
            client,
        }
    }

    /// Single completion per chain entry
    pub async fn run_simple(
        &self,
        user_message: &str,
        chain: &ModelChain,
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FinalAnswer> {
        self.walk_chain(chain, cancel, |model_key| {
            self.client
                .chat_completion(user_message, model_key, system_prompt, cancel)
        })
        .await
    }

    /// Full tool loop per chain entry
    pub async fn run_with_tools(
        &self,
        user_message: &str,
        chain: &ModelChain,
        backend: &dyn QueryBackend,
        tools: &[ToolDefinition],
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FinalAnswer> {
        self.walk_chain(chain, cancel, |model_key| {
            self.agent
                .run(user_message, system_prompt, tools, backend, model_key, cancel)
        })
        .await
    }

    async fn walk_chain<'a, F, Fut>(
        &self,
        chain: &'a ModelChain,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<FinalAnswer>
    where
        F: Fn(&'a str) -> Fut,
        Fut: Future<Output = Result<ChatResponse>>,
    {
        let mut last_error: Option<GatewayError> = None;

        for (position, model_key) in chain.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            match attempt(model_key).await {
                Ok(response) => {
                    if position == 0 {
                        info!(model_key, "Primary model answered");
                    } else {
                        info!(model_key, position, "Fallback model answered");
                    }
                    return Ok(FinalAnswer {
                        response,
                        model_key: model_key.to_string(),
                    });
                }
                Err(e) if e.is_fallthrough() => {
                    warn!(model_key, error = %e, "Model failed, trying next in chain");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(match last_error {
            Some(GatewayError::BreakerOpen { .. }) => GatewayError::AllBreakersOpen,
            Some(e) => GatewayError::ProviderUnavailable(e.to_string()),
            None => GatewayError::ProviderUnavailable("No model in chain".to_string()),
        })
    }
}
