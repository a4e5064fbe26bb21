//! Document-store query backend over the Cosmos DB SQL REST API
//!
//! Requests are signed with the account master key (HMAC-SHA256 over verb, resource
//! type, resource link and date). Result pages are followed through the
//! `x-ms-continuation` header and concatenated into one JSON array.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{query_snippet, validate_read_only, QueryBackend, QueryBackendKind, QueryError, QUERY_TIMEOUT_MS};
use crate::settings::CosmosSettings;
use crate::{GatewayError, Result};

const API_VERSION: &str = "2018-12-31";
const CONTINUATION_HEADER: &str = "x-ms-continuation";
const MAX_PAGES: usize = 1_000;

type HmacSha256 = Hmac<Sha256>;

/// One page of a query response
#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

pub struct CosmosQueryBackend {
    client: Client,
    endpoint: String,
    master_key: Vec<u8>,
    database: String,
    container: String,
}

impl CosmosQueryBackend {
    pub fn from_settings(settings: &CosmosSettings) -> Result<Self> {
        let (endpoint, key) = parse_connection_string(&settings.connection_string)?;
        let client = query_client(Duration::from_millis(QUERY_TIMEOUT_MS))?;
        Self::new(client, &endpoint, &key, &settings.database, &settings.container)
    }

    /// `key` is the base64 master key as shown in the account's connection string
    pub fn new(client: Client, endpoint: &str, key: &str, database: &str, container: &str) -> Result<Self> {
        let master_key = STANDARD
            .decode(key.trim())
            .map_err(|e| GatewayError::Configuration(format!("Invalid Cosmos account key: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            master_key,
            database: database.to_string(),
            container: container.to_string(),
        })
    }

    fn resource_link(&self) -> String {
        format!("dbs/{}/colls/{}", self.database, self.container)
    }

    /// Master-key authorization header value for one request
    fn authorization_token(&self, verb: &str, resource_type: &str, resource_link: &str, date: &str) -> std::result::Result<String, QueryError> {
        let payload = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.to_lowercase(),
            resource_type.to_lowercase(),
            resource_link,
            date.to_lowercase()
        );

        let mut mac = HmacSha256::new_from_slice(&self.master_key)
            .map_err(|e| QueryError::Backend(format!("Cannot sign request: {}", e)))?;
        mac.update(payload.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(urlencoding::encode(&format!("type=master&ver=1.0&sig={}", signature)).into_owned())
    }

    async fn fetch_page(
        &self,
        body: &[u8],
        continuation: Option<&str>,
    ) -> std::result::Result<(QueryPage, Option<String>), QueryError> {
        let resource_link = self.resource_link();
        let url = format!("{}/{}/docs", self.endpoint, resource_link);
        let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let authorization = self.authorization_token("post", "docs", &resource_link, &date)?;

        let mut request = self
            .client
            .post(&url)
            .header("authorization", authorization)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-documentdb-isquery", "True")
            .header("x-ms-documentdb-query-enablecrosspartition", "True")
            .header("content-type", "application/query+json")
            .body(body.to_vec());
        if let Some(token) = continuation {
            request = request.header(CONTINUATION_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| QueryError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body_snippet = %query_snippet(&text), "Cosmos query failed");
            return Err(QueryError::Backend(format!("Cosmos query failed with status {}", status.as_u16())));
        }

        let next = response
            .headers()
            .get(CONTINUATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let page = response
            .json::<QueryPage>()
            .await
            .map_err(|e| QueryError::Backend(format!("Invalid Cosmos response: {}", e)))?;

        Ok((page, next))
    }
}

/// HTTP client whose requests (connect, headers and body) are bounded by `timeout`
fn query_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Configuration(format!("Failed to build Cosmos HTTP client: {}", e)))
}

/// Split `AccountEndpoint=...;AccountKey=...;` into endpoint and key
fn parse_connection_string(connection_string: &str) -> Result<(String, String)> {
    let mut endpoint = None;
    let mut key = None;

    for part in connection_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some((name, value)) if name.eq_ignore_ascii_case("AccountEndpoint") => endpoint = Some(value.to_string()),
            Some((name, value)) if name.eq_ignore_ascii_case("AccountKey") => key = Some(value.to_string()),
            _ => {}
        }
    }

    match (endpoint, key) {
        (Some(endpoint), Some(key)) => Ok((endpoint, key)),
        _ => Err(GatewayError::Configuration(
            "Cosmos connection string must contain AccountEndpoint and AccountKey".to_string(),
        )),
    }
}

#[async_trait]
impl QueryBackend for CosmosQueryBackend {
    fn kind(&self) -> QueryBackendKind {
        QueryBackendKind::Cosmos
    }

    async fn execute_query(&self, query: &str) -> std::result::Result<String, QueryError> {
        let query = validate_read_only(query)?;
        info!(query_snippet = %query_snippet(query), "Executing Cosmos DB query");

        let body = serde_json::to_vec(&json!({ "query": query, "parameters": [] }))
            .map_err(|e| QueryError::Backend(e.to_string()))?;

        let mut rows = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut continuation: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let (page, next) = self.fetch_page(&body, continuation.as_deref()).await?;
            debug!(page_rows = page.documents.len(), "Cosmos page received");
            rows.extend(page.documents);

            match next {
                None => {
                    info!(row_count = rows.len(), "Query returned rows");
                    return Ok(Value::Array(rows).to_string());
                }
                Some(token) if !seen_tokens.insert(token.clone()) => {
                    warn!(continuation = %token, "Cosmos repeated a continuation token");
                    return Err(QueryError::Backend("Cosmos returned a repeated continuation token".to_string()));
                }
                Some(token) => continuation = Some(token),
            }
        }

        Err(QueryError::Backend(format!("Cosmos query exceeded {} result pages", MAX_PAGES)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "dGVzdC1tYXN0ZXIta2V5";
    const DOCS_PATH: &str = "/dbs/analytics/colls/orders/docs";

    fn backend(endpoint: &str) -> CosmosQueryBackend {
        CosmosQueryBackend::new(Client::new(), endpoint, KEY, "analytics", "orders").unwrap()
    }

    #[test]
    fn test_authorization_token_matches_reference_signature() {
        let backend = backend("https://example.documents.azure.com:443/");
        let token = backend
            .authorization_token("POST", "docs", "dbs/analytics/colls/orders", "Tue, 14 Oct 2025 08:00:00 GMT")
            .unwrap();
        assert_eq!(
            token,
            "type%3Dmaster%26ver%3D1.0%26sig%3DHAEHybOmQHhTRTimzHAh7LpByLH3aCUK%2BQ7VQeIpstw%3D"
        );
    }

    #[test]
    fn test_parse_connection_string() {
        let (endpoint, key) =
            parse_connection_string("AccountEndpoint=https://acct.documents.azure.com:443/;AccountKey=abc==;").unwrap();
        assert_eq!(endpoint, "https://acct.documents.azure.com:443/");
        assert_eq!(key, "abc==");

        assert!(matches!(
            parse_connection_string("AccountEndpoint=https://acct.documents.azure.com:443/"),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_key_is_configuration_error() {
        let result = CosmosQueryBackend::new(Client::new(), "https://x", "not base64!", "db", "c");
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_rejected_queries_never_reach_the_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Documents": [] })))
            .expect(0)
            .mount(&server)
            .await;

        let backend = backend(&server.uri());
        assert!(matches!(backend.execute_query("DELETE FROM c").await, Err(QueryError::InvalidOperation(_))));
        assert!(matches!(backend.execute_query("  ").await, Err(QueryError::BadArgument(_))));
    }

    #[tokio::test]
    async fn test_single_page_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .and(header("x-ms-documentdb-isquery", "True"))
            .and(header("content-type", "application/query+json"))
            .and(header("x-ms-version", API_VERSION))
            .and(header_exists("authorization"))
            .and(header_exists("x-ms-date"))
            .and(body_json(json!({ "query": "SELECT c.id FROM c", "parameters": [] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_rid": "abc",
                "Documents": [{ "id": "1" }, { "id": "2" }],
                "_count": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rows = backend(&server.uri()).execute_query("SELECT c.id FROM c").await.unwrap();
        let rows: Value = serde_json::from_str(&rows).unwrap();
        assert_eq!(rows, json!([{ "id": "1" }, { "id": "2" }]));
    }

    #[tokio::test]
    async fn test_continuation_pages_are_joined() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .and(header(CONTINUATION_HEADER, "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Documents": [{ "id": "3" }] })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(CONTINUATION_HEADER, "page-2")
                    .set_body_json(json!({ "Documents": [{ "id": "1" }, { "id": "2" }] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let rows = backend(&server.uri()).execute_query("SELECT * FROM c").await.unwrap();
        let rows: Value = serde_json::from_str(&rows).unwrap();
        assert_eq!(rows, json!([{ "id": "1" }, { "id": "2" }, { "id": "3" }]));
    }

    #[tokio::test]
    async fn test_error_status_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"code\":\"BadRequest\"}"))
            .expect(1)
            .mount(&server)
            .await;

        let err = backend(&server.uri()).execute_query("SELECT * FROM c").await.unwrap_err();
        assert!(matches!(err, QueryError::Backend(_)));
    }

    #[tokio::test]
    async fn test_repeated_continuation_token_stops_paging() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(CONTINUATION_HEADER, "same-page")
                    .set_body_json(json!({ "Documents": [{ "id": "1" }] })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let err = backend(&server.uri()).execute_query("SELECT * FROM c").await.unwrap_err();
        assert!(matches!(err, QueryError::Backend(ref message) if message.contains("continuation")));
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "Documents": [] }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = query_client(Duration::from_millis(200)).unwrap();
        let backend = CosmosQueryBackend::new(client, &server.uri(), KEY, "analytics", "orders").unwrap();

        let started = std::time::Instant::now();
        let err = backend.execute_query("SELECT * FROM c").await.unwrap_err();
        assert!(matches!(err, QueryError::Backend(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_settings_client_is_built() {
        let settings = CosmosSettings {
            connection_string: format!("AccountEndpoint=https://acct.documents.azure.com:443/;AccountKey={};", KEY),
            database: "analytics".to_string(),
            container: "orders".to_string(),
        };
        assert!(CosmosQueryBackend::from_settings(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_empty_result_is_empty_array() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Documents": [] })))
            .mount(&server)
            .await;

        let rows = backend(&server.uri()).execute_query("SELECT * FROM c WHERE c.id = 'x'").await.unwrap();
        assert_eq!(rows, "[]");
    }
}
