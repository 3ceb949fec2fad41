//! Jina search backend (`s.jina.ai`).
//!
//! The retrying backend: POST `{"q": query}` with an optional bearer key,
//! bounded retry with a per-attempt timeout, `Retry-After` handling for rate
//! limits, and exponential backoff otherwise. Malformed-but-present result
//! fields are salvaged with placeholder strings; a payload without a `data`
//! array is a parse error and propagates once the attempts are exhausted.

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::search::{
    NO_SNIPPET, NO_TITLE, NO_URL, SearchOptions, SearchProvider, SearchResponse, SearchResult,
    content_field, field_or, with_retry,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// The default Jina search endpoint.
const DEFAULT_BASE_URL: &str = "https://s.jina.ai/";

/// Jina search provider.
pub struct JinaProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_timeout: Duration,
    retry: crate::config::RetryPolicy,
}

impl JinaProvider {
    /// Create a new Jina provider from configuration.
    ///
    /// The bearer key is optional: it is read from the configured environment
    /// variable (`JINA_API_KEY` by default) when present, and unauthenticated
    /// requests are sent otherwise.
    pub fn new(config: &SearchConfig) -> Self {
        let key_env = config.api_key_env.as_deref().unwrap_or("JINA_API_KEY");
        let api_key = std::env::var(key_env).ok().filter(|k| !k.is_empty());
        Self::new_with_key(config, api_key)
    }

    /// Create a new Jina provider with an explicitly provided (or absent) key.
    pub fn new_with_key(config: &SearchConfig, api_key: Option<String>) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            default_timeout: Duration::from_millis(config.attempt_timeout_ms),
            retry: config.retry.clone(),
        }
    }

    /// Execute one attempt, bounded by the per-attempt timeout.
    async fn attempt(&self, query: &str, timeout: Duration) -> Result<SearchResponse, SearchError> {
        let request = async {
            let mut builder = self
                .client
                .post(&self.base_url)
                .header("Content-Type", "application/json")
                .header("Accept", "application/json")
                .json(&json!({ "q": query }));
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_connect() {
                    SearchError::Connection {
                        message: e.to_string(),
                    }
                } else {
                    SearchError::ApiRequest {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after_secs = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                return Err(SearchError::RateLimited { retry_after_secs });
            }

            let body = response.text().await.map_err(|e| SearchError::ApiRequest {
                message: format!("Failed to read response body: {}", e),
            })?;

            if !status.is_success() {
                return Err(SearchError::ApiRequest {
                    message: format!("HTTP {}: {}", status, body),
                });
            }

            let parsed: Value =
                serde_json::from_str(&body).map_err(|e| SearchError::ResponseParse {
                    message: format!("Invalid JSON: {}", e),
                })?;

            Self::normalize_response(&parsed)
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Validate the payload shape and salvage per-document fields.
    fn normalize_response(payload: &Value) -> Result<SearchResponse, SearchError> {
        let data = payload
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| SearchError::ResponseParse {
                message: "Response payload has no `data` array".to_string(),
            })?;

        Ok(SearchResponse {
            data: data.iter().map(Self::normalize_document).collect(),
        })
    }

    /// Salvage one document: display fields get placeholders when missing,
    /// content stays absent so the distiller can filter it.
    fn normalize_document(item: &Value) -> SearchResult {
        let content = content_field(item, "content");
        SearchResult {
            url: field_or(item, "url", NO_URL),
            title: field_or(item, "title", NO_TITLE),
            snippet: content.clone().unwrap_or_else(|| NO_SNIPPET.to_string()),
            content,
        }
    }
}

#[async_trait]
impl SearchProvider for JinaProvider {
    fn name(&self) -> &str {
        "jina"
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        // The Jina endpoint takes no result-limit or format parameters; the
        // response is returned as ranked by the backend.
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        debug!(query = %query, timeout_ms = timeout.as_millis() as u64, "Searching Jina");
        with_retry(&self.retry, || self.attempt(query, timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_document_salvages_missing_fields() {
        let item = json!({ "title": "Result title" });
        let doc = JinaProvider::normalize_document(&item);
        assert_eq!(doc.url, NO_URL);
        assert_eq!(doc.title, "Result title");
        assert_eq!(doc.snippet, NO_SNIPPET);
        assert_eq!(doc.content, None);
    }

    #[test]
    fn test_normalize_document_content_feeds_snippet() {
        let item = json!({
            "url": "https://example.com",
            "title": "T",
            "content": "The page content"
        });
        let doc = JinaProvider::normalize_document(&item);
        assert_eq!(doc.snippet, "The page content");
        assert_eq!(doc.content, Some("The page content".to_string()));
    }

    #[test]
    fn test_normalize_response_requires_data_array() {
        let payload = json!({ "results": [] });
        let err = JinaProvider::normalize_response(&payload).unwrap_err();
        assert!(matches!(err, SearchError::ResponseParse { .. }));

        let payload = json!({ "data": "not an array" });
        assert!(JinaProvider::normalize_response(&payload).is_err());
    }

    #[test]
    fn test_normalize_response_preserves_order() {
        let payload = json!({
            "data": [
                { "url": "https://a", "title": "A", "content": "alpha" },
                { "url": "https://b", "title": "B", "content": "beta" },
            ]
        });
        let response = JinaProvider::normalize_response(&payload).unwrap();
        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0].url, "https://a");
        assert_eq!(response.data[1].url, "https://b");
    }

    #[test]
    fn test_new_with_key_uses_config_base_url() {
        let config = SearchConfig {
            base_url: Some("http://localhost:8080/search".to_string()),
            ..Default::default()
        };
        let provider = JinaProvider::new_with_key(&config, None);
        assert_eq!(provider.base_url, "http://localhost:8080/search");
        assert_eq!(provider.default_timeout, Duration::from_millis(30_000));
    }
}
