//! Firecrawl search-and-scrape backend.
//!
//! POSTs a search request with scrape options to `{base}/v1/search`. Unlike
//! the Jina backend this one makes a single attempt per search; the bearer
//! key is required and its absence is a fatal configuration error at setup.

use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use crate::search::{
    NO_SNIPPET, NO_TITLE, NO_URL, SearchOptions, SearchProvider, SearchResponse, SearchResult,
    content_field, field_or,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// The default Firecrawl API base URL.
const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";

/// Firecrawl search provider.
pub struct FirecrawlProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_timeout: Duration,
}

impl FirecrawlProvider {
    /// Create a new Firecrawl provider from configuration.
    ///
    /// Reads the required bearer key from the configured environment variable
    /// (`FIRECRAWL_KEY` by default); a missing key is a fatal
    /// `ConfigError::MissingCredential`.
    pub fn new(config: &SearchConfig) -> Result<Self, ConfigError> {
        let key_env = config.api_key_env.as_deref().unwrap_or("FIRECRAWL_KEY");
        let api_key = std::env::var(key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingCredential {
                var: key_env.to_string(),
            })?;
        Ok(Self::new_with_key(config, api_key))
    }

    /// Create a new Firecrawl provider with an explicitly provided key.
    pub fn new_with_key(config: &SearchConfig, api_key: String) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            default_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }

    async fn request(
        &self,
        query: &str,
        options: &SearchOptions,
        timeout: Duration,
    ) -> Result<SearchResponse, SearchError> {
        let url = format!("{}/v1/search", self.base_url);
        let body = json!({
            "query": query,
            "limit": options.limit,
            "timeout": timeout.as_millis() as u64,
            "scrapeOptions": { "formats": [options.format.to_string()] },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
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
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SearchError::AuthFailed {
                provider: "firecrawl".to_string(),
            });
        }

        let body = response.text().await.map_err(|e| SearchError::ApiRequest {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(SearchError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|e| SearchError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })?;

        Self::normalize_response(&parsed)
    }

    fn normalize_response(payload: &Value) -> Result<SearchResponse, SearchError> {
        if payload.get("success").and_then(|s| s.as_bool()) == Some(false) {
            let message = payload
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(SearchError::ApiRequest { message });
        }

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

    fn normalize_document(item: &Value) -> SearchResult {
        SearchResult {
            url: field_or(item, "url", NO_URL),
            title: field_or(item, "title", NO_TITLE),
            snippet: field_or(item, "description", NO_SNIPPET),
            content: content_field(item, "markdown"),
        }
    }
}

#[async_trait]
impl SearchProvider for FirecrawlProvider {
    fn name(&self) -> &str {
        "firecrawl"
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        debug!(query = %query, limit = options.limit, "Searching Firecrawl");
        match tokio::time::timeout(timeout, self.request(query, options, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
