//! Azure OpenAI provider client implementation
//! This module contains the completion dispatcher: breaker gate, per-attempt timeout,
//! transient-failure classification and linear-backoff retries.

use async_trait::async_trait;
use reqwest::{header::HeaderMap, header::HeaderValue, header::AUTHORIZATION, header::CONTENT_TYPE, Client};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::llm::circuit_breaker::CircuitBreaker;
use crate::llm::traits::CompletionClient;
use crate::llm::{ChatResponse, ConversationMessage, FinishReason, RawCompletion, ToolDefinition};
use crate::settings::ProviderSettings;
use crate::{GatewayError, Result};

use super::types::{
    AzureChatMessage, AzureChatRequest, AzureChatResponse, AzureEmbeddingRequest, AzureEmbeddingResponse,
    AzureTool,
};

const TEMPERATURE: f64 = 0.2;
const SIMPLE_MAX_TOKENS: u32 = 512;
const TOOL_MAX_TOKENS: u32 = 1024;
const BODY_SNIPPET_CHARS: usize = 300;

/// 408, 429 and every 5xx indicate upstream trouble worth retrying
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

/// Result of one HTTP exchange that reached the server
enum Exchange {
    Success(String),
    Failure { status: u16, reason: String, body: String },
}

/// Azure OpenAI completion dispatcher
pub struct AzureOpenAIClient {
    client: Client,
    settings: ProviderSettings,
    breaker: Arc<dyn CircuitBreaker>,
}

impl AzureOpenAIClient {
    /// Create a new client with configuration and a shared breaker
    pub fn new(settings: ProviderSettings, breaker: Arc<dyn CircuitBreaker>) -> Self {
        Self::with_http_client(Client::new(), settings, breaker)
    }

    /// Create a client around an existing connection pool
    pub fn with_http_client(client: Client, settings: ProviderSettings, breaker: Arc<dyn CircuitBreaker>) -> Self {
        Self {
            client,
            settings,
            breaker,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Resolve a model key to its physical deployment
    fn deployment(&self, model_key: &str) -> Result<&str> {
        self.settings
            .deployments
            .get(model_key)
            .map(String::as_str)
            .ok_or_else(|| GatewayError::Configuration(format!("Unknown modelKey '{}' for AzureOpenAI", model_key)))
    }

    fn deployment_url(&self, deployment: &str, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.settings.endpoint.trim_end_matches('/'),
            deployment,
            operation,
            self.settings.api_version
        )
    }

    /// Build HTTP headers for requests
    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.settings.api_key))
                .map_err(|e| GatewayError::Configuration(format!("Invalid API key format: {}", e)))?,
        );
        Ok(headers)
    }

    async fn exchange(&self, url: &str, headers: HeaderMap, body: &AzureChatRequest) -> reqwest::Result<Exchange> {
        let response = self.client.post(url).headers(headers).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(Exchange::Success(text))
        } else {
            Ok(Exchange::Failure {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                body: text,
            })
        }
    }

    /// Breaker-gated, retried chat-completion call shared by both public paths
    async fn dispatch(
        &self,
        model_key: &str,
        body: &AzureChatRequest,
        cancel: &CancellationToken,
    ) -> Result<AzureChatResponse> {
        let deployment = self.deployment(model_key)?;

        if self.breaker.is_open(model_key) {
            warn!(model_key, "Circuit breaker is OPEN, rejecting request");
            return Err(GatewayError::BreakerOpen {
                model_key: model_key.to_string(),
            });
        }

        let url = self.deployment_url(deployment, "chat/completions");
        let headers = self.build_headers()?;
        let timeout = self.settings.timeout();
        let max_retries = self.settings.max_retries;

        debug!(model_key, deployment, url = %url, "Dispatching chat completion");

        let mut last_error = None;

        for attempt in 0..=max_retries {
            let attempt_number = attempt + 1;
            info!(model_key, attempt = attempt_number, "Sending Azure OpenAI request");

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                result = tokio::time::timeout(timeout, self.exchange(&url, headers.clone(), body)) => result,
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            let failure = match outcome {
                Ok(Ok(Exchange::Success(text))) => {
                    self.breaker.record_success(model_key);
                    info!(model_key, latency_ms, "Azure OpenAI call succeeded");
                    return serde_json::from_str::<AzureChatResponse>(&text)
                        .map_err(|e| GatewayError::InvalidResponse(format!("Failed to deserialize Azure OpenAI response: {}", e)));
                }
                Ok(Ok(Exchange::Failure { status, reason, body })) => {
                    warn!(
                        model_key,
                        status,
                        latency_ms,
                        body_snippet = %snippet(&body, BODY_SNIPPET_CHARS),
                        "Azure OpenAI non-success status"
                    );
                    let failure = GatewayError::Provider {
                        status: Some(status),
                        message: format!("Azure OpenAI error: {} {}", status, reason),
                    };
                    if !is_transient_status(status) {
                        // Client-shaped errors say nothing about upstream health
                        return Err(failure);
                    }
                    failure
                }
                Ok(Err(e)) => {
                    error!(model_key, attempt = attempt_number, error = %e, "Azure OpenAI request failed unexpectedly");
                    GatewayError::Provider {
                        status: None,
                        message: e.to_string(),
                    }
                }
                Err(_) => {
                    warn!(model_key, attempt = attempt_number, timeout_ms = self.settings.timeout_ms, "Azure OpenAI request timed out");
                    GatewayError::Timeout {
                        model_key: model_key.to_string(),
                        timeout_ms: self.settings.timeout_ms,
                    }
                }
            };

            self.breaker.record_failure(model_key);

            if attempt < max_retries {
                let delay = self.settings.retry_delay(attempt);
                info!(model_key, delay_ms = delay.as_millis() as u64, "Transient failure, will retry");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            last_error = Some(failure);
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::ProviderUnavailable("Azure OpenAI request failed with unknown error".to_string())
        }))
    }
}

#[async_trait]
impl CompletionClient for AzureOpenAIClient {
    async fn chat_completion(
        &self,
        user_message: &str,
        model_key: &str,
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let mut messages = Vec::with_capacity(2);
        if let Some(prompt) = system_prompt {
            messages.push(AzureChatMessage::from(&ConversationMessage::system(prompt)));
        }
        messages.push(AzureChatMessage::from(&ConversationMessage::user(user_message)));

        let request = AzureChatRequest {
            messages,
            tools: None,
            temperature: TEMPERATURE,
            max_tokens: SIMPLE_MAX_TOKENS,
        };

        let response = self.dispatch(model_key, &request, cancel).await?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();

        Ok(ChatResponse {
            reply,
            model: response.model,
            usage: response.usage.map(Into::into),
        })
    }

    async fn raw_completion(
        &self,
        transcript: &[ConversationMessage],
        tools: &[ToolDefinition],
        model_key: &str,
        cancel: &CancellationToken,
    ) -> Result<RawCompletion> {
        let request = AzureChatRequest {
            messages: transcript.iter().map(AzureChatMessage::from).collect(),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(AzureTool::from).collect())
            },
            temperature: TEMPERATURE,
            max_tokens: TOOL_MAX_TOKENS,
        };

        let response = self.dispatch(model_key, &request, cancel).await?;
        let choice = response.choices.into_iter().next();

        let (finish_reason, content, tool_calls) = match choice {
            Some(choice) => {
                let finish_reason = choice
                    .finish_reason
                    .as_deref()
                    .map(FinishReason::from)
                    .unwrap_or(FinishReason::Stop);
                let (content, tool_calls) = match choice.message {
                    Some(message) => (
                        message.content,
                        message
                            .tool_calls
                            .unwrap_or_default()
                            .into_iter()
                            .map(Into::into)
                            .collect(),
                    ),
                    None => (None, Vec::new()),
                };
                (finish_reason, content, tool_calls)
            }
            None => (FinishReason::Stop, None, Vec::new()),
        };

        Ok(RawCompletion {
            finish_reason,
            content,
            tool_calls,
            usage: response.usage.map(Into::into),
            model: response.model,
        })
    }

    async fn embedding(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let deployment = self
            .settings
            .embedding_deployment
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| GatewayError::Configuration("AzureOpenAI embedding_deployment is not configured".to_string()))?;

        let url = self.deployment_url(deployment, "embeddings");
        let request = self
            .client
            .post(&url)
            .headers(self.build_headers()?)
            .json(&AzureEmbeddingRequest { input: text })
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            result = tokio::time::timeout(self.settings.timeout(), request) => result,
        };

        let response = match response {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(GatewayError::Provider {
                    status: None,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(GatewayError::Timeout {
                    model_key: deployment.to_string(),
                    timeout_ms: self.settings.timeout_ms,
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Provider {
                status: Some(status.as_u16()),
                message: format!(
                    "Embedding API error: {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            });
        }

        let parsed: AzureEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| GatewayError::InvalidResponse("Embedding response contained no data".to_string()))
    }
}

fn snippet(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHAT_PATH: &str = "/openai/deployments/gpt4o-mini-deployment/chat/completions";

    #[derive(Default)]
    struct CountingBreaker {
        open: AtomicBool,
        successes: AtomicU32,
        failures: AtomicU32,
    }

    impl CircuitBreaker for CountingBreaker {
        fn is_open(&self, _key: &str) -> bool {
            self.open.load(Ordering::SeqCst)
        }
        fn record_success(&self, _key: &str) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
        fn record_failure(&self, _key: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        fn snapshot(&self) -> Vec<crate::llm::circuit_breaker::BreakerSnapshot> {
            Vec::new()
        }
    }

    fn settings(endpoint: &str, max_retries: u32) -> ProviderSettings {
        ProviderSettings {
            endpoint: endpoint.to_string(),
            api_key: "test-key".to_string(),
            deployments: HashMap::from([("gpt4oMini".to_string(), "gpt4o-mini-deployment".to_string())]),
            embedding_deployment: Some("embedding-deployment".to_string()),
            timeout_ms: 5_000,
            max_retries,
            retry_delay_ms: 0,
            ..Default::default()
        }
    }

    fn client(endpoint: &str, max_retries: u32) -> (AzureOpenAIClient, Arc<CountingBreaker>) {
        let breaker = Arc::new(CountingBreaker::default());
        let client = AzureOpenAIClient::new(settings(endpoint, max_retries), breaker.clone());
        (client, breaker)
    }

    fn success_body(reply: &str) -> serde_json::Value {
        json!({
            "id": "cmpl-123",
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": reply },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
    }

    fn tool_call_body() -> serde_json::Value {
        json!({
            "id": "cmpl-456",
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call-1",
                        "type": "function",
                        "function": { "name": "query_database", "arguments": "{\"sql\":\"SELECT 1\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 20, "completion_tokens": 10, "total_tokens": 30 }
        })
    }

    #[test]
    fn test_transient_status_classification() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(is_transient_status(status), "{} should be transient", status);
        }
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(!is_transient_status(status), "{} should not be transient", status);
        }
    }

    #[tokio::test]
    async fn test_success_returns_chat_response_and_records_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .and(query_param("api-version", "2024-02-15-preview"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({ "max_tokens": 512, "messages": [{ "role": "user", "content": "Hei" }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("Moi!")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, breaker) = client(&server.uri(), 0);
        let response = client
            .chat_completion("Hei", "gpt4oMini", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.reply, "Moi!");
        assert_eq!(response.model, "gpt-4");
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
        assert_eq!(breaker.successes.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_system_prompt_is_sent_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .and(body_partial_json(json!({
                "messages": [
                    { "role": "system", "content": "Be brief" },
                    { "role": "user", "content": "Hei" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(&server.uri(), 0);
        client
            .chat_completion("Hei", "gpt4oMini", Some("Be brief"), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_breaker_open_rejects_without_http_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("never")))
            .expect(0)
            .mount(&server)
            .await;

        let (client, breaker) = client(&server.uri(), 2);
        breaker.open.store(true, Ordering::SeqCst);

        let err = client
            .chat_completion("Hi", "gpt4oMini", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BreakerOpen { ref model_key } if model_key == "gpt4oMini"));

        let err = client
            .raw_completion(&[ConversationMessage::user("test")], &[], "gpt4oMini", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BreakerOpen { .. }));
    }

    #[tokio::test]
    async fn test_unknown_model_key_is_configuration_error() {
        let server = MockServer::start().await;
        let (client, _) = client(&server.uri(), 0);

        let err = client
            .chat_completion("Hi", "unknownKey", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_429_retries_and_records_each_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let (client, breaker) = client(&server.uri(), 2);
        let err = client
            .chat_completion("Hi", "gpt4oMini", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Provider { status: Some(429), .. }));
        assert_eq!(breaker.failures.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.successes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_transient_400_fails_fast_without_breaker_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string("error"))
            .expect(1)
            .mount(&server)
            .await;

        let (client, breaker) = client(&server.uri(), 2);
        let err = client
            .chat_completion("Hi", "gpt4oMini", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Provider { status: Some(400), .. }));
        assert_eq!(breaker.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("second time")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, breaker) = client(&server.uri(), 2);
        let response = client
            .chat_completion("Hi", "gpt4oMini", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.reply, "second time");
        assert_eq!(breaker.failures.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_attempt_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(success_body("late"))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let breaker = Arc::new(CountingBreaker::default());
        let mut provider = settings(&server.uri(), 1);
        provider.timeout_ms = 50;
        let client = AzureOpenAIClient::new(provider, breaker.clone());

        let err = client
            .chat_completion("Hi", "gpt4oMini", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Timeout { timeout_ms: 50, .. }));
        assert_eq!(breaker.failures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_caller_cancellation_aborts_without_breaker_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(success_body("late"))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let (client, breaker) = client(&server.uri(), 2);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = client
            .chat_completion("Hi", "gpt4oMini", None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Cancelled));
        assert_eq!(breaker.failures.load(Ordering::SeqCst), 0);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        // Port 1 refuses connections
        let (client, breaker) = client("http://127.0.0.1:1", 2);
        let err = client
            .chat_completion("Hi", "gpt4oMini", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Provider { status: None, .. }));
        assert_eq!(breaker.failures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_raw_completion_stop_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .and(body_partial_json(json!({ "max_tokens": 1024 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("Vastaus")))
            .mount(&server)
            .await;

        let (client, _) = client(&server.uri(), 0);
        let result = client
            .raw_completion(&[ConversationMessage::user("Hei")], &[], "gpt4oMini", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.content.as_deref(), Some("Vastaus"));
        assert!(result.tool_calls.is_empty());
        assert_eq!(result.model, "gpt-4");
        assert_eq!(result.usage.map(|u| u.total_tokens), Some(15));

        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(sent.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_raw_completion_tool_calls_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .and(body_partial_json(json!({ "tools": [{ "type": "function", "function": { "name": "query_database" } }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_body()))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(&server.uri(), 0);
        let tools = vec![crate::llm::agent::query_database_tool()];
        let result = client
            .raw_completion(&[ConversationMessage::user("Laske keskiarvo")], &tools, "gpt4oMini", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.content, None);
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].id, "call-1");
        assert_eq!(result.tool_calls[0].function_name, "query_database");
        assert_eq!(result.tool_calls[0].arguments_json, r#"{"sql":"SELECT 1"}"#);
    }

    #[tokio::test]
    async fn test_missing_finish_reason_defaults_to_stop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4",
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": "hi" } }]
            })))
            .mount(&server)
            .await;

        let (client, _) = client(&server.uri(), 0);
        let result = client
            .raw_completion(&[ConversationMessage::user("Hei")], &[], "gpt4oMini", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.usage, None);
    }

    #[tokio::test]
    async fn test_embedding_single_attempt_without_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/embedding-deployment/embeddings"))
            .and(body_partial_json(json!({ "input": "sää Helsingissä" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [0.25, -0.5, 1.0] }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, breaker) = client(&server.uri(), 2);
        let vector = client.embedding("sää Helsingissä", &CancellationToken::new()).await.unwrap();
        assert_eq!(vector, vec![0.25, -0.5, 1.0]);
        assert_eq!(breaker.successes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/embedding-deployment/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let (client, breaker) = client(&server.uri(), 2);
        let err = client.embedding("text", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Provider { status: Some(503), .. }));
        assert_eq!(breaker.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embedding_requires_deployment() {
        let breaker = Arc::new(CountingBreaker::default());
        let mut provider = settings("http://127.0.0.1:1", 0);
        provider.embedding_deployment = None;
        let client = AzureOpenAIClient::new(provider, breaker);

        let err = client.embedding("text", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        assert_eq!(snippet("äöå", 2), "äö");
        assert_eq!(snippet("short", 300), "short");
    }
}
