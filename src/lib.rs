// LLM Gateway - Rust Edition
// A resilient gateway between API clients and a chat-completion provider

//! # LLM Gateway Library
//!
//! This is the library crate behind the gateway server. It routes each chat request
//! to one of several configured models, shields the provider with a per-model circuit
//! breaker, and can run a bounded tool-calling loop in which the model queries a
//! read-only database before answering.
//!
//! ## Core Components
//!
//! ### Request Dispatch
//! - [`InMemoryCircuitBreaker`]: per-model failure bookkeeping (closed / open / half-open)
//! - [`AzureOpenAIClient`]: one provider call with per-attempt timeout, transient-failure
//!   classification and linear-backoff retries
//!
//! ### Routing and Orchestration
//! - [`ModelRouter`]: resolves a policy name into an ordered [`ModelChain`]
//! - [`AgentLoop`]: the multi-turn `query_database` tool protocol
//! - [`RequestOrchestrator`]: walks the chain and stops at the first success
//!
//! ### Query Backends
//! - [`QueryBackend`]: "execute a validated read-only query, return JSON rows"
//! - [`PostgresQueryBackend`] and [`CosmosQueryBackend`]
//!
//! **Usage Example:**
//! ```rust
//! use llm_gateway::{CircuitBreaker, InMemoryCircuitBreaker, settings::CircuitBreakerSettings};
//!
//! let breaker = InMemoryCircuitBreaker::new(CircuitBreakerSettings::default());
//! assert!(!breaker.is_open("gpt4"));
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### Errors as Values
//! The retry and fallback logic never relies on panics or exception-like unwinding.
//! Every failure is a [`GatewayError`] variant, and the orchestrator pattern-matches
//! on the variant to decide between "try the next model", "fail the request" and
//! "propagate a configuration error".

// Typed configuration loaded from file + environment
pub mod settings;

// Provider dispatch, breaker, routing and the tool loop
pub mod llm;

// Read-only query execution backends used by the tool loop
pub mod query;

// Thin HTTP surface (chat endpoint, health, API-key gate)
pub mod api;

// Re-export the core types so callers can import from the crate root
pub use llm::{
    agent::{query_database_tool, AgentLoop, DEFAULT_TOOL_SYSTEM_PROMPT},
    circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, InMemoryCircuitBreaker},
    orchestrator::{FinalAnswer, RequestOrchestrator},
    providers::azure::AzureOpenAIClient,
    router::ModelRouter,
    traits::CompletionClient,
    ChatResponse, ConversationMessage, FinishReason, ModelChain, ModelKey, RawCompletion,
    TokenUsage, ToolCall, ToolDefinition,
};

pub use query::{
    cosmos::CosmosQueryBackend, postgres::PostgresQueryBackend, validate_read_only,
    QueryBackend, QueryBackendKind, QueryBackends, QueryError,
};

pub use api::{GatewayServer, GatewayServerBuilder};

use thiserror::Error;

/// Error taxonomy for the dispatch and resilience engine
///
/// ## Rust Learning Notes:
///
/// ### Control Flow Through Variants
/// The variants fall into two groups. "Fallthrough" failures mean the current model
/// is unusable right now and the orchestrator should try the next one. Fatal failures
/// (configuration problems, caller cancellation) end the request immediately.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A ModelKey or policy could not be resolved from configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The circuit breaker rejected the call without touching the network
    #[error("Circuit breaker is open for {model_key}")]
    BreakerOpen { model_key: String },

    /// Non-transient provider error, or a transient one after retries ran out
    #[error("Provider error{}: {message}", fmt_status(.status))]
    Provider { status: Option<u16>, message: String },

    /// The per-attempt timeout fired on the last attempt
    #[error("Provider call for {model_key} timed out after {timeout_ms} ms")]
    Timeout { model_key: String, timeout_ms: u64 },

    /// The provider answered 2xx but the payload could not be understood
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// The tool loop received a finish reason it cannot act on
    #[error("Unexpected finish reason: {0}")]
    UnexpectedFinishReason(String),

    /// The tool loop hit its iteration cap without a final answer
    #[error("Tool loop exceeded {iterations} iterations without a final answer")]
    LoopExceeded { iterations: u32 },

    /// The caller cancelled the request
    #[error("Request cancelled by caller")]
    Cancelled,

    /// Every model in the chain was rejected, the last one by its breaker
    #[error("Circuit breaker open for all configured models")]
    AllBreakersOpen,

    /// Every model in the chain failed
    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The HTTP listener could not be bound or stopped with an error
    #[error("Server error: {0}")]
    Server(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether the orchestrator should move on to the next model in the chain
    pub fn is_fallthrough(&self) -> bool {
        matches!(
            self,
            GatewayError::BreakerOpen { .. }
                | GatewayError::Provider { .. }
                | GatewayError::Timeout { .. }
                | GatewayError::InvalidResponse(_)
                | GatewayError::UnexpectedFinishReason(_)
                | GatewayError::LoopExceeded { .. }
        )
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

/// Type alias for Results that use the gateway error type
pub type Result<T> = std::result::Result<T, GatewayError>;
