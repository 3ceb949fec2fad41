//! Configuration for the Delver research engine.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for a research run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelverConfig {
    /// Research tree shape and budgets.
    #[serde(default)]
    pub research: ResearchConfig,
    /// Search retrieval backend.
    #[serde(default)]
    pub search: SearchConfig,
    /// Structured-generation backend.
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Shape and budgets of the recursive research tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Number of sibling queries planned at the root frame.
    pub breadth: usize,
    /// Remaining recursive levels below the root frame.
    pub depth: usize,
    /// Maximum concurrent search-and-distill units per limiter.
    pub concurrency: usize,
    /// Whether the concurrency cap applies per recursion frame or to the
    /// whole research tree.
    pub concurrency_scope: ConcurrencyScope,
    /// Maximum learnings requested from the distiller per query.
    pub max_learnings: usize,
    /// Per-call timeout for search requests issued by the orchestrator, in ms.
    pub search_timeout_ms: u64,
    /// Maximum documents requested per search.
    pub search_result_limit: usize,
    /// Character budget applied to each document's content before distillation.
    pub content_budget_chars: usize,
    /// Character budget applied to the combined learnings fed to the final
    /// report pass.
    pub report_budget_chars: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            breadth: 4,
            depth: 2,
            concurrency: 2,
            concurrency_scope: ConcurrencyScope::PerFrame,
            max_learnings: 3,
            search_timeout_ms: 15_000,
            search_result_limit: 5,
            content_budget_chars: 25_000,
            report_budget_chars: 150_000,
        }
    }
}

/// Scope of the concurrency limiter.
///
/// `PerFrame` bounds only the units started by one recursion frame; child
/// frames each get their own limiter, so aggregate in-flight work grows with
/// tree width. `Global` shares one limiter across the whole tree, capping
/// aggregate in-flight work at `concurrency`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyScope {
    #[default]
    PerFrame,
    Global,
}

impl std::fmt::Display for ConcurrencyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyScope::PerFrame => write!(f, "per_frame"),
            ConcurrencyScope::Global => write!(f, "global"),
        }
    }
}

/// Search retrieval backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Provider name: "jina" or "firecrawl".
    pub provider: String,
    /// Environment variable holding the API key. When unset, the provider's
    /// conventional variable is used (`JINA_API_KEY`, `FIRECRAWL_KEY`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Optional base URL override for the search endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-attempt timeout for a single search request, in ms.
    pub attempt_timeout_ms: u64,
    /// Retry policy for backends that retry.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "jina".to_string(),
            api_key_env: None,
            base_url: None,
            attempt_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded-retry policy with exponential backoff.
///
/// `max_attempts` counts total attempts, first call included. Backoff before
/// attempt `n` (0-based) is `initial_backoff_ms * multiplier^n`, capped at
/// `max_backoff_ms`; a server `Retry-After` hint takes precedence when
/// present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Structured-generation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Provider name. Any OpenAI-compatible chat-completions endpoint.
    pub provider: String,
    /// Model identifier (e.g., "o3-mini").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate per call.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-call timeout, in ms.
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "o3-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 8_192,
            temperature: 1.0,
            timeout_ms: 60_000,
        }
    }
}

impl DelverConfig {
    /// Validate this config and return any warnings.
    ///
    /// Returns an empty Vec if the config is unremarkable. Returns
    /// human-readable warning messages for problematic values (does not
    /// error; hard failures are left to provider setup).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.research.breadth == 0 {
            warnings.push("research.breadth is 0; no queries will be planned".to_string());
        }
        if self.research.concurrency == 0 {
            warnings.push(
                "research.concurrency is 0; every search unit will deadlock waiting for a permit"
                    .to_string(),
            );
        }
        if self.research.breadth > 10 {
            warnings.push(format!(
                "research.breadth ({}) is above the recommended 2-10 range",
                self.research.breadth
            ));
        }
        if self.search.retry.max_attempts == 0 {
            warnings.push("search.retry.max_attempts is 0; every search will fail".to_string());
        }
        warnings
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DELVER_`)
/// 3. Workspace-local config (`.delver/config.toml`)
/// 4. User config (`~/.config/delver/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DelverConfig>,
) -> Result<DelverConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DelverConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "delver", "delver") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".delver").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (DELVER_RESEARCH__BREADTH, DELVER_SEARCH__PROVIDER, etc.)
    figment = figment.merge(Env::prefixed("DELVER_").split("__"));

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
