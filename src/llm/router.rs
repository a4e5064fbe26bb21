//! Policy-driven model routing
//!
//! Resolves a client-supplied policy name into an ordered [`ModelChain`] using static
//! configuration. Routing is side-effect free apart from logging; chains are computed
//! fresh per request.

use std::collections::HashMap;
use tracing::{debug, warn};

use super::{ModelChain, ModelKey};
use crate::query::QueryBackendKind;
use crate::settings::{normalize_key, GatewayConfig, PolicyConfig, RoutingSettings};
use crate::{GatewayError, Result};

/// Static policy table plus the set of model keys that have a deployment
#[derive(Debug, Clone)]
pub struct ModelRouter {
    routing: RoutingSettings,
    deployments: HashMap<ModelKey, String>,
}

impl ModelRouter {
    pub fn new(routing: RoutingSettings, deployments: HashMap<ModelKey, String>) -> Self {
        Self { routing, deployments }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.routing.clone(), config.provider.deployments.clone())
    }

    pub fn default_policy(&self) -> &str {
        &self.routing.default_policy
    }

    /// Look up a policy, substituting the default policy for absent or unknown names
    fn policy(&self, policy_name: Option<&str>) -> Result<(&str, &PolicyConfig)> {
        let requested = policy_name
            .map(normalize_key)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.routing.default_policy.clone());

        if let Some((name, policy)) = self.routing.policies.get_key_value(&requested) {
            return Ok((name.as_str(), policy));
        }

        warn!(
            policy = %requested,
            default_policy = %self.routing.default_policy,
            "Unknown policy, falling back to default"
        );

        self.routing
            .policies
            .get_key_value(&self.routing.default_policy)
            .map(|(name, policy)| (name.as_str(), policy))
            .ok_or_else(|| {
                GatewayError::Configuration(format!(
                    "Default policy '{}' not configured",
                    self.routing.default_policy
                ))
            })
    }

    fn has_deployment(&self, model_key: &str) -> bool {
        self.deployments
            .get(model_key)
            .map(|deployment| !deployment.trim().is_empty())
            .unwrap_or(false)
    }

    /// Resolve a policy into `[primary, resolvable fallbacks...]`
    pub fn resolve_model_chain(&self, policy_name: Option<&str>) -> Result<ModelChain> {
        let (name, policy) = self.policy(policy_name)?;

        let primary = policy.primary_model.trim();
        if primary.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "Policy '{}' has no primary_model",
                name
            )));
        }
        if !self.has_deployment(primary) {
            return Err(GatewayError::Configuration(format!(
                "Primary model '{}' of policy '{}' has no deployment",
                primary, name
            )));
        }

        let fallbacks: Vec<ModelKey> = policy
            .fallbacks
            .iter()
            .filter(|key| {
                let resolvable = self.has_deployment(key);
                if !resolvable {
                    warn!(policy = name, model_key = %key, "Skipping fallback without deployment");
                }
                resolvable
            })
            .cloned()
            .collect();

        let chain = ModelChain::new(primary.to_string(), fallbacks);
        debug!(policy = name, chain = %chain, "Resolved model chain");
        Ok(chain)
    }

    /// First entry of the resolved chain
    pub fn resolve_model_key(&self, policy_name: Option<&str>) -> Result<ModelKey> {
        self.resolve_model_chain(policy_name)
            .map(|chain| chain.primary().to_string())
    }

    pub fn is_tools_enabled(&self, policy_name: Option<&str>) -> bool {
        match self.policy(policy_name) {
            Ok((_, policy)) => policy.tools_enabled,
            Err(e) => {
                warn!(error = %e, "Cannot resolve policy, tools disabled");
                false
            }
        }
    }

    pub fn query_backend_selector(&self, policy_name: Option<&str>) -> QueryBackendKind {
        match self.policy(policy_name) {
            Ok((_, policy)) => policy.query_backend,
            Err(e) => {
                warn!(error = %e, "Cannot resolve policy, using default query backend");
                QueryBackendKind::default()
            }
        }
    }

    /// Policy-specific system prompt, if one is configured
    pub fn system_prompt(&self, policy_name: Option<&str>) -> Option<&str> {
        self.policy(policy_name)
            .ok()
            .and_then(|(_, policy)| policy.system_prompt.as_deref())
    }
}
