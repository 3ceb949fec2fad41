//! Search retrieval providers.
//!
//! Provides the `SearchProvider` trait plus two builtin backends:
//! - Jina (`s.jina.ai`) with bounded retry and exponential backoff
//! - Firecrawl search-and-scrape
//!
//! Use `create_search_provider()` to instantiate the backend selected by
//! configuration. Provider selection happens once, before a research run
//! begins, and an unknown variant or missing required credential is a fatal
//! configuration error.

pub mod firecrawl;
pub mod jina;

use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use crate::config::RetryPolicy;
pub use firecrawl::FirecrawlProvider;
pub use jina::JinaProvider;

/// Placeholder for a document missing its URL.
pub(crate) const NO_URL: &str = "No URL provided";
/// Placeholder for a document missing its title.
pub(crate) const NO_TITLE: &str = "No title available";
/// Placeholder for a document missing its snippet.
pub(crate) const NO_SNIPPET: &str = "No snippet available";

/// Requested content format for scraped documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    #[default]
    Markdown,
}

impl std::fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// Options for a single search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Per-attempt timeout override. Falls back to the provider's default.
    pub timeout: Option<Duration>,
    /// Maximum number of documents to return.
    pub limit: usize,
    /// Content format requested for scraped documents.
    pub format: ContentFormat,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            limit: 5,
            format: ContentFormat::Markdown,
        }
    }
}

/// A single retrieved document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Scraped content in the requested format. Absent when the backend did
    /// not return usable content for this document.
    pub content: Option<String>,
}

/// A ranked batch of retrieved documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub data: Vec<SearchResult>,
}

/// Trait for search retrieval backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// The backend's name, as used in configuration.
    fn name(&self) -> &str;

    /// Execute a search and return ranked documents.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError>;
}

/// Create the search provider selected by the configuration.
///
/// Routes to the appropriate backend:
/// - `"jina"` → [`JinaProvider`] (bearer key optional)
/// - `"firecrawl"` → [`FirecrawlProvider`] (bearer key required)
///
/// Returns `ConfigError::UnknownProvider` for any other name and
/// `ConfigError::MissingCredential` when a required key is absent. Both are
/// fatal: they surface before any research begins.
pub fn create_search_provider(
    config: &SearchConfig,
) -> Result<Arc<dyn SearchProvider>, ConfigError> {
    match config.provider.as_str() {
        "jina" => Ok(Arc::new(JinaProvider::new(config))),
        "firecrawl" => Ok(Arc::new(FirecrawlProvider::new(config)?)),
        other => Err(ConfigError::UnknownProvider {
            name: other.to_string(),
        }),
    }
}

/// Execute an async search operation with bounded retry.
///
/// Every failure is retried until `policy.max_attempts` total attempts have
/// been made; the final attempt's error propagates. The wait before a retry
/// honors a server `Retry-After` hint when the error carries one, otherwise
/// exponential backoff capped at `policy.max_backoff_ms`.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T, SearchError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, SearchError>>,
{
    let mut last_err = SearchError::ApiRequest {
        message: "retry policy allows no attempts".to_string(),
    };
    for attempt in 0..policy.max_attempts {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if attempt + 1 == policy.max_attempts {
                    return Err(e);
                }
                let backoff_ms = compute_backoff(policy, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = policy.max_attempts,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying search after error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(policy: &RetryPolicy, attempt: u32, err: &SearchError) -> u64 {
    if let SearchError::RateLimited {
        retry_after_secs: Some(secs),
    } = err
    {
        return secs * 1000;
    }
    compute_exponential_backoff(policy, attempt)
}

/// Pure exponential backoff: `initial * multiplier^attempt`, capped.
fn compute_exponential_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let base = policy.initial_backoff_ms as f64 * policy.backoff_multiplier.powi(attempt as i32);
    base.min(policy.max_backoff_ms as f64) as u64
}

/// Read a string field, substituting a placeholder when missing or empty.
pub(crate) fn field_or(value: &Value, key: &str, placeholder: &str) -> String {
    match value.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => placeholder.to_string(),
    }
}

/// Read an optional content field; missing or empty content stays absent.
pub(crate) fn content_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// A mock search provider for testing and development.
///
/// Returns scripted outcomes in FIFO order, falling back to a fixed response
/// when the queue is empty. Records every query it receives.
#[derive(Default)]
pub struct MockSearchProvider {
    outcomes: Mutex<VecDeque<Result<SearchResponse, SearchError>>>,
    fallback: Option<SearchResponse>,
    queries: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that always returns clones of the given response.
    pub fn with_response(response: SearchResponse) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Build a single-document response for test scripting.
    pub fn document(url: &str, title: &str, content: &str) -> SearchResponse {
        SearchResponse {
            data: vec![SearchResult {
                url: url.to_string(),
                title: title.to_string(),
                snippet: content.to_string(),
                content: Some(content.to_string()),
            }],
        }
    }

    /// Queue a response to be returned by the next `search` call.
    pub fn queue_response(&self, response: SearchResponse) {
        self.outcomes.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error to be returned by the next `search` call.
    pub fn queue_error(&self, error: SearchError) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    /// Number of `search` calls received so far.
    pub fn call_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    /// All queries received so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(
        &self,
        query: &str,
        _options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(scripted) = self.outcomes.lock().unwrap().pop_front() {
            return scripted;
        }
        if let Some(fallback) = &self.fallback {
            return Ok(fallback.clone());
        }
        Err(SearchError::ApiRequest {
            message: "MockSearchProvider has no scripted response".to_string(),
        })
    }
}
