//! Relational query backend over a PostgreSQL pool

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::{query_snippet, validate_read_only, QueryBackend, QueryBackendKind, QueryError, QUERY_TIMEOUT_MS};
use crate::settings::PostgresSettings;
use crate::{GatewayError, Result};

/// Server-side limit for one tool query
/// Executes model-generated SELECT statements inside a read-only transaction
pub struct PostgresQueryBackend {
    pool: PgPool,
}

impl PostgresQueryBackend {
    /// Build the pool without opening a connection; the first query connects
    pub fn connect_lazy(settings: &PostgresSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_lazy(&settings.connection_string)
            .map_err(|e| GatewayError::Configuration(format!("Invalid postgres connection string: {}", e)))?;
        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Wrap an arbitrary SELECT so the server returns its rows as one JSON array.
    ///
    /// The closing paren goes on its own line so a trailing `--` comment cannot swallow it.
    fn wrap_as_json_array(query: &str) -> String {
        let statement = query.trim_end().trim_end_matches(';');
        format!(
            "SELECT COALESCE(json_agg(row_to_json(q)), '[]'::json) FROM ({}\n) AS q",
            statement
        )
    }
}

fn backend_error(e: sqlx::Error) -> QueryError {
    QueryError::Backend(e.to_string())
}

#[async_trait]
impl QueryBackend for PostgresQueryBackend {
    fn kind(&self) -> QueryBackendKind {
        QueryBackendKind::Sql
    }

    async fn execute_query(&self, query: &str) -> std::result::Result<String, QueryError> {
        let query = validate_read_only(query)?;
        info!(query_snippet = %query_snippet(query), "Executing PostgreSQL query");

        let mut tx = self.pool.begin().await.map_err(backend_error)?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(backend_error)?;
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", QUERY_TIMEOUT_MS))
            .execute(&mut *tx)
            .await
            .map_err(backend_error)?;

        let rows: serde_json::Value = sqlx::query_scalar(&Self::wrap_as_json_array(query))
            .fetch_one(&mut *tx)
            .await
            .map_err(backend_error)?;

        tx.rollback().await.map_err(backend_error)?;

        let count = rows.as_array().map(Vec::len).unwrap_or(0);
        info!(row_count = count, "Query returned rows");
        debug!(rows = %rows, "Query result");

        Ok(rows.to_string())
    }
}
