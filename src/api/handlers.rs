// Gateway API handlers
// Thin marshaling between HTTP and the request orchestrator

use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::types::{ApiError, ChatReply, ChatRequest, HealthResponse};
use crate::llm::agent::query_database_tool;
use crate::llm::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::llm::orchestrator::{FinalAnswer, RequestOrchestrator};
use crate::llm::router::ModelRouter;
use crate::query::QueryBackends;
use crate::Result;

/// Shared state of every handler
#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<ModelRouter>,
    pub orchestrator: Arc<RequestOrchestrator>,
    pub breaker: Arc<dyn CircuitBreaker>,
    pub backends: QueryBackends,
    /// Expected `X-Api-Key`; empty rejects every protected request
    pub api_key: Arc<str>,
}

impl ApiState {
    pub fn new(
        router: ModelRouter,
        orchestrator: RequestOrchestrator,
        breaker: Arc<dyn CircuitBreaker>,
        backends: QueryBackends,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            router: Arc::new(router),
            orchestrator: Arc::new(orchestrator),
            breaker,
            backends,
            api_key: Arc::from(api_key.into()),
        }
    }
}

/// Health probe with per-model breaker states
pub async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let breakers = state.breaker.snapshot();
    let status = if breakers.iter().any(|b| b.state == BreakerState::Open) {
        "degraded"
    } else {
        "ok"
    };
    Json(HealthResponse { status, breakers })
}

/// `POST /api/chat`
pub async fn chat(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> std::result::Result<Json<ChatReply>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "chat_request",
        request_id = %request_id,
        policy = request.policy.as_deref().unwrap_or(state.router.default_policy())
    );

    handle_chat(state, request, request_id).instrument(span).await
}

async fn handle_chat(state: ApiState, request: ChatRequest, request_id: String) -> std::result::Result<Json<ChatReply>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    info!(
        message_length = request.message.chars().count(),
        conversation_id = request.conversation_id.as_deref().unwrap_or(""),
        "Received chat request"
    );

    // Dropping the handler future (client went away) cancels in-flight attempts
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let outcome = dispatch(&state, &request, &cancel).await;

    match outcome {
        Ok(answer) => {
            info!(
                model_key = %answer.model_key,
                total_tokens = answer.response.usage.map(|u| u.total_tokens).unwrap_or(0),
                "Chat request handled successfully"
            );
            Ok(Json(ChatReply {
                reply: answer.response.reply,
                model: answer.response.model,
                model_key: answer.model_key,
                usage: answer.response.usage,
                request_id,
            }))
        }
        Err(e) => {
            error!(error = %e, "Error handling chat request");
            Err(ApiError::from(e))
        }
    }
}

/// Pick the simple or tool path for the request's policy and walk the chain
async fn dispatch(state: &ApiState, request: &ChatRequest, cancel: &CancellationToken) -> Result<FinalAnswer> {
    let policy = request.policy.as_deref();
    let chain = state.router.resolve_model_chain(policy)?;
    let system_prompt = state.router.system_prompt(policy);

    if state.router.is_tools_enabled(policy) {
        let backend = state.backends.get(state.router.query_backend_selector(policy))?;
        let tools = [query_database_tool()];
        state
            .orchestrator
            .run_with_tools(&request.message, &chain, backend.as_ref(), &tools, system_prompt, cancel)
            .await
    } else {
        state
            .orchestrator
            .run_simple(&request.message, &chain, system_prompt, cancel)
            .await
    }
}

/// Fallback for unknown routes
pub async fn not_found() -> impl IntoResponse {
    ApiError::new(axum::http::StatusCode::NOT_FOUND, "Not found", "No such route")
}
