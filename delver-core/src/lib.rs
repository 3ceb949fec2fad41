//! # Delver Core
//!
//! Core library for the Delver recursive research engine.
//! Provides search retrieval providers, query planning, result distillation,
//! the recursive orchestrator, progress reporting, and configuration.

pub mod config;
pub mod distill;
pub mod error;
pub mod generation;
pub mod planner;
pub mod progress;
pub mod research;
pub mod search;

// Re-export commonly used types at the crate root.
pub use config::{
    ConcurrencyScope, DelverConfig, GenerationConfig, ResearchConfig, RetryPolicy, SearchConfig,
    load_config,
};
pub use distill::{LearningsBatch, distill_documents};
pub use error::{ConfigError, DelverError, GenerationError, Result, SearchError};
pub use generation::{
    GenerationRequest, MockObjectGenerator, ObjectGenerator, OpenAiCompatibleGenerator,
    generate_as, researcher_system_prompt, trim_to_chars,
};
pub use planner::{PlannedQuery, plan_queries};
pub use progress::{
    ProgressCallback, ProgressUpdate, ResearchObserver, ResearchProgress, TreeProgress,
    TreeProgressCallback,
};
pub use research::{ResearchEngine, ResearchRequest, ResearchResult, run_research};
pub use search::{
    ContentFormat, FirecrawlProvider, JinaProvider, MockSearchProvider, SearchOptions,
    SearchProvider, SearchResponse, SearchResult, create_search_provider,
};
