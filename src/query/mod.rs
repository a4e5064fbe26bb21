//! Read-only query execution backends
//!
//! The tool loop only needs "execute a validated read-only query, return JSON rows".
//! Each backend implements [`QueryBackend`]; [`QueryBackends`] selects one per policy.

pub mod cosmos;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::settings::QuerySettings;
use crate::GatewayError;

/// Longest query prefix written to the logs
pub(crate) const QUERY_LOG_CHARS: usize = 200;

/// Upper bound on one backend query, in milliseconds
pub(crate) const QUERY_TIMEOUT_MS: u64 = 30_000;

/// Which backend a policy's tool calls run against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryBackendKind {
    /// Relational database with a SQL dialect
    #[default]
    Sql,
    /// Document store with its SQL-like query API
    Cosmos,
}

impl std::fmt::Display for QueryBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryBackendKind::Sql => write!(f, "sql"),
            QueryBackendKind::Cosmos => write!(f, "cosmos"),
        }
    }
}

/// Query execution failures
#[derive(Error, Debug)]
pub enum QueryError {
    /// The statement is not a read-only SELECT
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Empty or otherwise unusable query text
    #[error("Bad argument: {0}")]
    BadArgument(String),

    /// The backend itself failed
    #[error("Query backend error: {0}")]
    Backend(String),
}

/// Guard shared by every backend, applied before any I/O
pub fn validate_read_only(query: &str) -> Result<&str, QueryError> {
    let trimmed = query.trim_start();
    if trimmed.is_empty() {
        return Err(QueryError::BadArgument("Query text cannot be empty".to_string()));
    }

    let starts_with_select = trimmed
        .get(..6)
        .map(|prefix| prefix.eq_ignore_ascii_case("SELECT"))
        .unwrap_or(false);
    if !starts_with_select {
        return Err(QueryError::InvalidOperation(
            "Only SELECT queries are allowed in query_database tool".to_string(),
        ));
    }

    Ok(trimmed)
}

/// Truncate query text for logging
pub(crate) fn query_snippet(query: &str) -> &str {
    match query.char_indices().nth(QUERY_LOG_CHARS) {
        Some((idx, _)) => &query[..idx],
        None => query,
    }
}

/// A read-only query executor
#[async_trait]
pub trait QueryBackend: Send + Sync {
    fn kind(&self) -> QueryBackendKind;

    /// Execute a validated SELECT and return the rows as a JSON array
    async fn execute_query(&self, query: &str) -> Result<String, QueryError>;
}

/// Configured backends, keyed by kind
#[derive(Clone, Default)]
pub struct QueryBackends {
    backends: HashMap<QueryBackendKind, Arc<dyn QueryBackend>>,
}

impl QueryBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every backend that has a configuration section
    pub fn from_settings(settings: &QuerySettings) -> crate::Result<Self> {
        let mut backends = Self::new();

        if let Some(pg) = &settings.postgres {
            backends = backends.with_backend(Arc::new(postgres::PostgresQueryBackend::connect_lazy(pg)?));
        }
        if let Some(cosmos) = &settings.cosmos {
            backends = backends.with_backend(Arc::new(cosmos::CosmosQueryBackend::from_settings(cosmos)?));
        }

        info!(
            sql = backends.backends.contains_key(&QueryBackendKind::Sql),
            cosmos = backends.backends.contains_key(&QueryBackendKind::Cosmos),
            "Query backends configured"
        );
        Ok(backends)
    }

    pub fn with_backend(mut self, backend: Arc<dyn QueryBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn get(&self, kind: QueryBackendKind) -> crate::Result<Arc<dyn QueryBackend>> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| GatewayError::Configuration(format!("Query backend '{}' is not configured", kind)))
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
