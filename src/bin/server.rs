// LLM Gateway - Main Server
// Loads configuration, wires the dispatch engine and serves the HTTP surface
// Run with: cargo run --bin server -- --config config/gateway.toml

//! # LLM Gateway Server Binary
//!
//! ```text
//! main() function
//!   ↓ loads
//! GatewayConfig (file + LLM_GATEWAY__* environment)
//!   ↓ wires
//! InMemoryCircuitBreaker → AzureOpenAIClient → RequestOrchestrator
//!   ↓ served by
//! GatewayServer (Axum)
//! ```
//!
//! ## Rust Learning Notes:
//!
//! `anyhow::Result` is only used here, at the process boundary. Library code returns
//! the typed `GatewayError` so that callers can match on it.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use llm_gateway::settings::GatewayConfig;
use llm_gateway::GatewayServerBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llm-gateway")]
#[command(about = "Resilient gateway in front of a chat-completion provider")]
#[command(version = "0.1")]
struct Cli {
    /// Configuration file (TOML); environment variables override it
    #[arg(long, env = "LLM_GATEWAY_CONFIG", default_value = "config/gateway.toml")]
    config: String,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    if let Err(e) = dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    info!("Starting LLM Gateway...");
    info!("Configuration file: {}", cli.config);

    let config = GatewayConfig::load(Some(&cli.config)).context("Failed to load gateway configuration")?;

    info!("Provider endpoint: {}", config.provider.endpoint);
    info!(
        "Circuit breaker: threshold {}, open for {}s",
        config.circuit_breaker.failure_threshold, config.circuit_breaker.break_duration_secs
    );
    info!("Default policy: {}", config.routing.default_policy);

    let mut builder = GatewayServerBuilder::new()
        .with_config(&config)
        .context("Failed to wire gateway components")?;
    if let Some(host) = cli.host {
        builder = builder.with_host(host);
    }
    if let Some(port) = cli.port {
        builder = builder.with_port(port);
    }

    builder.build()?.run().await.context("Gateway server stopped")?;

    Ok(())
}
