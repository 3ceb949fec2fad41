//! Error types for the Delver research core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering search retrieval, structured generation, and configuration.
//!
//! Recovery policy: search and generation errors are recovered locally by
//! the component that observes them (a failed branch contributes nothing to
//! the research result); configuration errors are fatal and surface before
//! any research begins.

/// Top-level error type for the Delver core library.
#[derive(Debug, thiserror::Error)]
pub enum DelverError {
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from search retrieval backends.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {message}")]
    ApiRequest { message: String },

    #[error("Search response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Rate limited by search backend{}", retry_after_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Search request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Search backend connection failed: {message}")]
    Connection { message: String },

    #[error("Authentication failed for search backend {provider}")]
    AuthFailed { provider: String },
}

fn retry_after_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(", retry after {secs}s"),
        None => String::new(),
    }
}

/// Errors from the structured-generation backend.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation request failed: {message}")]
    ApiRequest { message: String },

    #[error("Generation response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Generated object did not match schema '{schema}': {message}")]
    SchemaMismatch { schema: String, message: String },

    #[error("Authentication failed for generation backend {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by generation backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Generation backend connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the configuration system. Always fatal at setup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown search provider: {name}")]
    UnknownProvider { name: String },

    #[error("Missing required credential: environment variable {var} is not set")]
    MissingCredential { var: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `DelverError`.
pub type Result<T> = std::result::Result<T, DelverError>;
