//! Structured-generation capability consumed by the research engine.
//!
//! Defines the `ObjectGenerator` trait for schema-constrained generation and
//! provides an OpenAI-compatible implementation that requests JSON-schema
//! response formatting from a chat-completions endpoint. The engine itself
//! only ever sees the trait; swapping the backend is a construction-time
//! decision.

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// The default OpenAI-compatible API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// A single structured-generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System prompt establishing the researcher persona.
    pub system: String,
    /// The task prompt.
    pub prompt: String,
    /// Short identifier for the output schema, used in error context.
    pub schema_name: String,
    /// JSON Schema the generated object must satisfy.
    pub schema: Value,
    /// Per-call timeout override. Falls back to the backend's default.
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    pub fn new(
        system: impl Into<String>,
        prompt: impl Into<String>,
        schema_name: impl Into<String>,
        schema: Value,
    ) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            schema_name: schema_name.into(),
            schema,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Trait for structured-generation backends.
///
/// Implementations return a JSON value that satisfies the request's schema;
/// callers deserialize it into a typed shape with [`generate_as`].
#[async_trait]
pub trait ObjectGenerator: Send + Sync {
    /// Generate an object satisfying the request's schema.
    async fn generate_object(&self, request: GenerationRequest) -> Result<Value, GenerationError>;
}

/// Generate an object and deserialize it into `T`.
///
/// A backend response that fails to deserialize is reported as
/// `GenerationError::SchemaMismatch` with the request's schema name.
pub async fn generate_as<T: DeserializeOwned>(
    generator: &dyn ObjectGenerator,
    request: GenerationRequest,
) -> Result<T, GenerationError> {
    let schema_name = request.schema_name.clone();
    let value = generator.generate_object(request).await?;
    serde_json::from_value(value).map_err(|e| GenerationError::SchemaMismatch {
        schema: schema_name,
        message: e.to_string(),
    })
}

/// The shared researcher system prompt.
pub fn researcher_system_prompt() -> String {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    format!(
        "You are an expert researcher. Today is {today}. Follow these instructions when responding:\n\
         - You may be asked to research subjects past your knowledge cutoff; assume the user is right when presented with news.\n\
         - The user is a highly experienced analyst; be as detailed as possible and make sure your response is correct.\n\
         - Be highly organized and proactive: anticipate the user's needs and suggest research directions they did not think about.\n\
         - Treat the user as an expert in all subject matter. Accuracy over hedging; flag speculation explicitly."
    )
}

/// Truncate `text` to at most `max_chars` characters, respecting char
/// boundaries.
pub fn trim_to_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// OpenAI-compatible structured-generation backend.
///
/// Posts to `{base}/chat/completions` with
/// `response_format: {"type": "json_schema", ...}` and parses the first
/// choice's message content as JSON.
pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    default_timeout: Duration,
}

impl OpenAiCompatibleGenerator {
    /// Create a new generator from configuration.
    ///
    /// Reads the API key from the environment variable named in
    /// `config.api_key_env`. Returns `GenerationError::AuthFailed` if the
    /// variable is not set.
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| GenerationError::AuthFailed {
            provider: format!("{} (env var '{}' not set)", config.provider, config.api_key_env),
        })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new generator with an explicitly provided API key.
    pub fn new_with_key(config: &GenerationConfig, api_key: String) -> Result<Self, GenerationError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            default_timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Map an HTTP status code to the appropriate GenerationError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> GenerationError {
        match status.as_u16() {
            401 => {
                debug!(body = %body, "Authentication failed (401)");
                GenerationError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // Try to extract a retry hint from "... try again in Xs"
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                GenerationError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => GenerationError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => GenerationError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    async fn post_completion(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": self.temperature,
            "max_completion_tokens": self.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": true,
                },
            },
        });

        debug!(url = %url, model = %self.model, schema = %request.schema_name, "Sending generation request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GenerationError::Connection {
                        message: e.to_string(),
                    }
                } else {
                    GenerationError::ApiRequest {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| GenerationError::ApiRequest {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let parsed: Value =
            serde_json::from_str(&response_body).map_err(|e| GenerationError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        let content = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "Response has no choices[0].message.content".to_string(),
            })?;

        serde_json::from_str(content).map_err(|e| GenerationError::ResponseParse {
            message: format!("Generated content is not valid JSON: {}", e),
        })
    }
}

#[async_trait]
impl ObjectGenerator for OpenAiCompatibleGenerator {
    async fn generate_object(&self, request: GenerationRequest) -> Result<Value, GenerationError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, self.post_completion(&request)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// A mock structured-generation backend for testing and development.
///
/// Returns scripted responses in FIFO order, falling back to a fixed value
/// when the queue is empty. Records every prompt it receives.
#[derive(Default)]
pub struct MockObjectGenerator {
    responses: Mutex<VecDeque<Result<Value, GenerationError>>>,
    fallback: Option<Value>,
    prompts: Mutex<Vec<String>>,
}

impl MockObjectGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that always returns clones of the given value.
    pub fn with_value(value: Value) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(value),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a value to be returned by the next `generate_object` call.
    pub fn queue_value(&self, value: Value) {
        self.responses.lock().unwrap().push_back(Ok(value));
    }

    /// Queue an error to be returned by the next `generate_object` call.
    pub fn queue_error(&self, error: GenerationError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Number of `generate_object` calls received so far.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// All prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectGenerator for MockObjectGenerator {
    async fn generate_object(&self, request: GenerationRequest) -> Result<Value, GenerationError> {
        self.prompts.lock().unwrap().push(request.prompt);
        if let Some(scripted) = self.responses.lock().unwrap().pop_front() {
            return scripted;
        }
        if let Some(fallback) = &self.fallback {
            return Ok(fallback.clone());
        }
        Err(GenerationError::ApiRequest {
            message: "MockObjectGenerator has no scripted response".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_to_chars_short_input_untouched() {
        assert_eq!(trim_to_chars("hello", 10), "hello");
    }

    #[test]
    fn test_trim_to_chars_truncates() {
        assert_eq!(trim_to_chars("hello world", 5), "hello");
    }

    #[test]
    fn test_trim_to_chars_multibyte_boundary() {
        // Each snowman is 3 bytes; trimming must count chars, not bytes.
        let text = "☃☃☃☃";
        assert_eq!(trim_to_chars(text, 2), "☃☃");
    }

    #[test]
    fn test_map_http_error_auth() {
        let err = OpenAiCompatibleGenerator::map_http_error(
            reqwest::StatusCode::UNAUTHORIZED,
            "{\"error\": \"bad key\"}",
        );
        assert!(matches!(err, GenerationError::AuthFailed { .. }));
    }

    #[test]
    fn test_map_http_error_rate_limit_parses_hint() {
        let body = r#"{"error": {"message": "Rate limit reached, try again in 20s"}}"#;
        let err = OpenAiCompatibleGenerator::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            body,
        );
        match err {
            GenerationError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 20),
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_map_http_error_server_error() {
        let err = OpenAiCompatibleGenerator::map_http_error(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "boom",
        );
        assert!(matches!(err, GenerationError::ApiRequest { .. }));
    }

    #[tokio::test]
    async fn test_mock_generator_fifo_order() {
        let generator = MockObjectGenerator::new();
        generator.queue_value(json!({"first": true}));
        generator.queue_value(json!({"second": true}));

        let request = GenerationRequest::new("sys", "prompt one", "probe", json!({}));
        let first = generator.generate_object(request).await.unwrap();
        assert_eq!(first, json!({"first": true}));

        let request = GenerationRequest::new("sys", "prompt two", "probe", json!({}));
        let second = generator.generate_object(request).await.unwrap();
        assert_eq!(second, json!({"second": true}));

        assert_eq!(generator.call_count(), 2);
        assert_eq!(generator.prompts(), vec!["prompt one", "prompt two"]);
    }

    #[tokio::test]
    async fn test_mock_generator_fallback() {
        let generator = MockObjectGenerator::with_value(json!({"ok": 1}));
        for _ in 0..3 {
            let request = GenerationRequest::new("sys", "p", "probe", json!({}));
            assert_eq!(generator.generate_object(request).await.unwrap(), json!({"ok": 1}));
        }
    }

    #[tokio::test]
    async fn test_generate_as_schema_mismatch() {
        #[derive(serde::Deserialize)]
        struct Expected {
            #[allow(dead_code)]
            queries: Vec<String>,
        }
        let generator = MockObjectGenerator::with_value(json!({"wrong_field": []}));
        let request = GenerationRequest::new("sys", "p", "serp_queries", json!({}));
        let result = generate_as::<Expected>(&generator, request).await;
        match result {
            Err(GenerationError::SchemaMismatch { schema, .. }) => {
                assert_eq!(schema, "serp_queries");
            }
            other => panic!("Expected SchemaMismatch, got {:?}", other.err()),
        }
    }
}
