// Gateway API types
// Request/response bodies of the chat endpoint, the health probe and problem responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::llm::circuit_breaker::BreakerSnapshot;
use crate::llm::TokenUsage;
use crate::GatewayError;

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's message
    pub message: String,

    /// Routing policy name; the default policy applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    /// Client-side correlation id, echoed into the logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Successful chat answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    /// Model name reported by the provider
    pub model: String,
    /// Chain entry that produced the answer
    pub model_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub request_id: String,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub breakers: Vec<BreakerSnapshot>,
}

/// Problem response, `{ title, detail, status }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub title: String,
    pub detail: String,
    pub status: u16,
}

/// A handler failure with its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    title: &'static str,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, title: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            title,
            detail: detail.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", "Valid X-Api-Key header required")
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Invalid request", detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let (status, title) = match &err {
            GatewayError::AllBreakersOpen => (StatusCode::SERVICE_UNAVAILABLE, "LLM temporarily unavailable"),
            GatewayError::Configuration(_) | GatewayError::Serialization(_) | GatewayError::Server(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Gateway configuration error")
            }
            GatewayError::Cancelled => (
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
                "Request cancelled",
            ),
            _ => (StatusCode::BAD_GATEWAY, "LLM gateway error"),
        };
        Self::new(status, title, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            title: self.title.to_string(),
            detail: self.detail,
            status: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}
