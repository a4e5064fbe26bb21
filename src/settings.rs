//! Gateway configuration
//!
//! Typed configuration for every component, loaded from an optional TOML file and
//! overridden by `LLM_GATEWAY__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::query::QueryBackendKind;
use crate::{GatewayError, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "LLM_GATEWAY";

/// Name of the policy used when a request names none
pub const DEFAULT_POLICY: &str = "chat_default";

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub routing: RoutingSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub api_key: ApiKeySettings,
    #[serde(default)]
    pub query: QuerySettings,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
        }
    }
}

/// Chat-completion provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Base URL, e.g. `https://my-resource.openai.azure.com`
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// ModelKey -> physical deployment name
    #[serde(default)]
    pub deployments: HashMap<String, String>,
    #[serde(default)]
    pub embedding_deployment: Option<String>,
    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay; attempt `n` (0-based) waits `retry_delay_ms * (n + 1)`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            api_version: default_api_version(),
            deployments: HashMap::new(),
            embedding_deployment: None,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(attempt) + 1))
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive transient failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls
    #[serde(default = "default_break_duration_secs")]
    pub break_duration_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            break_duration_secs: default_break_duration_secs(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn break_duration(&self) -> Duration {
        Duration::from_secs(self.break_duration_secs)
    }
}

/// Named routing policies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    #[serde(default = "default_policy_name")]
    pub default_policy: String,
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            default_policy: default_policy_name(),
            policies: HashMap::new(),
        }
    }
}

/// One routing rule: a primary model with an ordered fallback list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub primary_model: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default)]
    pub tools_enabled: bool,
    #[serde(default)]
    pub query_backend: QueryBackendKind,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Tool loop bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// Shared-secret header check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeySettings {
    /// Empty means every protected request is rejected
    #[serde(default)]
    pub key: String,
}

/// Query backend connections; either may be absent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuerySettings {
    #[serde(default)]
    pub postgres: Option<PostgresSettings>,
    #[serde(default)]
    pub cosmos: Option<CosmosSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSettings {
    pub connection_string: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosSettings {
    /// `AccountEndpoint=...;AccountKey=...;`
    pub connection_string: String,
    pub database: String,
    pub container: String,
}

/// Canonical form of a ModelKey or policy name
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5079
}
fn default_true() -> bool {
    true
}
fn default_api_version() -> String {
    "2024-02-15-preview".to_string()
}
fn default_timeout_ms() -> u64 {
    15_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_break_duration_secs() -> u64 {
    30
}
fn default_policy_name() -> String {
    DEFAULT_POLICY.to_string()
}
fn default_max_iterations() -> u32 {
    5
}
fn default_max_connections() -> u32 {
    5
}

impl GatewayConfig {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Failed to load configuration: {}", e)))?;

        let mut config: GatewayConfig = settings
            .try_deserialize()
            .map_err(|e| GatewayError::Configuration(format!("Invalid configuration: {}", e)))?;

        config.normalize_keys();
        config.validate()?;
        info!(
            "Configuration loaded: {} deployments, {} policies",
            config.provider.deployments.len(),
            config.routing.policies.len()
        );
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let mut config: GatewayConfig = ::config::Config::builder()
            .add_source(::config::File::from_str(toml, ::config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::Configuration(format!("Invalid configuration: {}", e)))?;
        config.normalize_keys();
        config.validate()?;
        Ok(config)
    }

    /// Lowercase every ModelKey and policy name.
    ///
    /// The `config` crate lowercases map keys (deployment and policy tables) but leaves
    /// values such as `primary_model` untouched, so both sides are brought to one form.
    pub fn normalize_keys(&mut self) {
        self.provider.deployments = std::mem::take(&mut self.provider.deployments)
            .into_iter()
            .map(|(key, deployment)| (normalize_key(&key), deployment))
            .collect();

        self.routing.default_policy = normalize_key(&self.routing.default_policy);
        self.routing.policies = std::mem::take(&mut self.routing.policies)
            .into_iter()
            .map(|(name, mut policy)| {
                policy.primary_model = normalize_key(&policy.primary_model);
                for fallback in policy.fallbacks.iter_mut() {
                    *fallback = normalize_key(fallback);
                }
                (normalize_key(&name), policy)
            })
            .collect();
    }

    fn has_deployment(&self, model_key: &str) -> bool {
        self.provider
            .deployments
            .get(model_key)
            .map(|deployment| !deployment.trim().is_empty())
            .unwrap_or(false)
    }

    /// Reject configurations that could never serve a request
    pub fn validate(&self) -> Result<()> {
        if self.provider.endpoint.trim().is_empty() {
            return Err(GatewayError::Configuration("provider.endpoint is not configured".into()));
        }
        if !self.routing.policies.contains_key(&self.routing.default_policy) {
            return Err(GatewayError::Configuration(format!(
                "Default policy '{}' not configured",
                self.routing.default_policy
            )));
        }
        for (name, policy) in &self.routing.policies {
            if !self.has_deployment(&policy.primary_model) {
                return Err(GatewayError::Configuration(format!(
                    "Primary model '{}' of policy '{}' has no deployment",
                    policy.primary_model, name
                )));
            }
            for fallback in policy.fallbacks.iter().filter(|key| !self.has_deployment(key)) {
                warn!(policy = %name, model_key = %fallback, "Fallback model has no deployment and will be skipped");
            }
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(GatewayError::Configuration(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
