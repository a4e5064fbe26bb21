// Gateway HTTP surface
// This module exposes the chat endpoint and the health probe behind the API-key gate

pub mod handlers;
pub mod middleware;
pub mod types;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use handlers::{chat, health_check, not_found, ApiState};
use middleware::require_api_key;

use crate::llm::circuit_breaker::InMemoryCircuitBreaker;
use crate::llm::orchestrator::RequestOrchestrator;
use crate::llm::providers::azure::AzureOpenAIClient;
use crate::llm::router::ModelRouter;
use crate::query::QueryBackends;
use crate::settings::{GatewayConfig, ServerSettings};
use crate::{GatewayError, Result};

/// Gateway API server
pub struct GatewayServer {
    settings: ServerSettings,
    state: ApiState,
}

impl GatewayServer {
    pub fn new(settings: ServerSettings, state: ApiState) -> Self {
        Self { settings, state }
    }

    /// Wire every component from configuration
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Ok(Self::new(config.server.clone(), build_state(config)?))
    }

    pub fn state(&self) -> &ApiState {
        &self.state
    }

    /// Create the Axum router with all gateway routes
    pub fn create_router(&self) -> Router {
        let router = Router::new()
            .route("/api/chat", post(chat))
            .route("/health", get(health_check))
            .fallback(not_found)
            .layer(from_fn_with_state(self.state.clone(), require_api_key))
            .with_state(self.state.clone());

        if self.settings.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Run the server
    pub async fn run(self) -> Result<()> {
        let app = self.create_router();
        let addr = format!("{}:{}", self.settings.host, self.settings.port);

        info!("LLM gateway starting");
        info!("Server address: http://{}", addr);
        info!("   POST http://{}/api/chat", addr);
        info!("   GET  http://{}/health", addr);
        info!("CORS enabled: {}", self.settings.cors_enabled);

        let socket: SocketAddr = addr
            .parse()
            .map_err(|e| GatewayError::Server(format!("Invalid listen address '{}': {}", addr, e)))?;

        axum::Server::try_bind(&socket)
            .map_err(|e| GatewayError::Server(format!("Failed to bind {}: {}", socket, e)))?
            .serve(app.into_make_service())
            .await
            .map_err(|e| GatewayError::Server(e.to_string()))?;

        Ok(())
    }
}

fn build_state(config: &GatewayConfig) -> Result<ApiState> {
    let breaker = Arc::new(InMemoryCircuitBreaker::new(config.circuit_breaker.clone()));
    let client = Arc::new(AzureOpenAIClient::new(config.provider.clone(), breaker.clone()));
    let orchestrator = RequestOrchestrator::new(client, config.agent.max_iterations);
    let backends = QueryBackends::from_settings(&config.query)?;

    if config.api_key.key.is_empty() {
        tracing::warn!("api_key.key is empty, every protected request will be rejected");
    }

    Ok(ApiState::new(
        ModelRouter::from_config(config),
        orchestrator,
        breaker,
        backends,
        config.api_key.key.clone(),
    ))
}

/// Builder pattern for the gateway server
pub struct GatewayServerBuilder {
    settings: ServerSettings,
    state: Option<ApiState>,
}

impl GatewayServerBuilder {
    pub fn new() -> Self {
        Self {
            settings: ServerSettings::default(),
            state: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.settings.port = port;
        self
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.settings.host = host;
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.settings.cors_enabled = enabled;
        self
    }

    pub fn with_state(mut self, state: ApiState) -> Self {
        self.state = Some(state);
        self
    }

    /// Take listener settings and components from configuration
    pub fn with_config(mut self, config: &GatewayConfig) -> Result<Self> {
        self.settings = config.server.clone();
        self.state = Some(build_state(config)?);
        Ok(self)
    }

    pub fn build(self) -> Result<GatewayServer> {
        let state = self
            .state
            .ok_or_else(|| GatewayError::Configuration("Gateway server has no components configured".to_string()))?;
        Ok(GatewayServer::new(self.settings, state))
    }
}

impl Default for GatewayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
