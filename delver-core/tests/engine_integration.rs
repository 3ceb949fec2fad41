//! Integration tests for the research engine.
//!
//! These tests exercise the full plan → search → distill → recurse loop
//! end-to-end using MockSearchProvider and MockObjectGenerator, verifying
//! branch isolation, set-union merging, and progress accounting.

use delver_core::config::{ConcurrencyScope, ResearchConfig};
use delver_core::generation::MockObjectGenerator;
use delver_core::progress::{ResearchObserver, ResearchProgress};
use delver_core::research::{ResearchEngine, ResearchRequest};
use delver_core::search::{MockSearchProvider, SearchResponse, SearchResult};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn engine(
    search: Arc<MockSearchProvider>,
    generator: Arc<MockObjectGenerator>,
) -> ResearchEngine {
    ResearchEngine::new(search, generator, ResearchConfig::default())
}

fn engine_with_scope(
    search: Arc<MockSearchProvider>,
    generator: Arc<MockObjectGenerator>,
    scope: ConcurrencyScope,
) -> ResearchEngine {
    let config = ResearchConfig {
        concurrency_scope: scope,
        ..Default::default()
    };
    ResearchEngine::new(search, generator, config)
}

fn planned(query: &str, goal: &str) -> serde_json::Value {
    json!({ "query": query, "research_goal": goal })
}

fn batch(learnings: &[&str], follow_ups: &[&str]) -> serde_json::Value {
    json!({ "learnings": learnings, "follow_up_questions": follow_ups })
}

fn document(url: &str, content: Option<&str>) -> SearchResponse {
    SearchResponse {
        data: vec![SearchResult {
            url: url.to_string(),
            title: "title".to_string(),
            snippet: "snippet".to_string(),
            content: content.map(|c| c.to_string()),
        }],
    }
}

/// Observer that records every frame-local progress record it sees.
fn recording_observer() -> (ResearchObserver, Arc<Mutex<Vec<ResearchProgress>>>) {
    let records: Arc<Mutex<Vec<ResearchProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = records.clone();
    let observer = ResearchObserver::new().with_progress_callback(Arc::new(move |p| {
        sink.lock().unwrap().push(p.clone());
    }));
    (observer, records)
}

#[tokio::test]
async fn depth_one_plans_exactly_once() {
    let generator = Arc::new(MockObjectGenerator::new());
    generator.queue_value(json!({
        "queries": [planned("q1", "g1"), planned("q2", "g2")]
    }));
    // Documents carry no content, so distillation short-circuits without
    // invoking the generator: the only generation call is the root plan.
    let search = Arc::new(MockSearchProvider::new());
    search.queue_response(document("https://a", None));
    search.queue_response(document("https://b", None));

    let result = engine(search.clone(), generator.clone())
        .run(ResearchRequest::new("topic", 2, 1), ResearchObserver::new())
        .await;

    assert_eq!(generator.call_count(), 1);
    assert_eq!(search.call_count(), 2);
    assert!(result.learnings.is_empty());
    let mut urls = result.visited_urls.clone();
    urls.sort();
    assert_eq!(urls, vec!["https://a", "https://b"]);
}

#[tokio::test]
async fn overlapping_sibling_facts_union_to_one() {
    let generator = Arc::new(MockObjectGenerator::with_value(batch(&["shared fact"], &[])));
    generator.queue_value(json!({
        "queries": [planned("q1", "g1"), planned("q2", "g2")]
    }));
    // Both units retrieve the same document and distill the same learning.
    let search = Arc::new(MockSearchProvider::with_response(document(
        "https://same",
        Some("body"),
    )));

    let result = engine(search, generator)
        .run(ResearchRequest::new("topic", 2, 1), ResearchObserver::new())
        .await;

    assert_eq!(result.learnings, vec!["shared fact"]);
    assert_eq!(result.visited_urls, vec!["https://same"]);
}

#[tokio::test]
async fn failed_branch_does_not_abort_siblings() {
    let generator = Arc::new(MockObjectGenerator::with_value(batch(
        &["surviving fact"],
        &[],
    )));
    generator.queue_value(json!({
        "queries": [planned("q1", "g1"), planned("q2", "g2")]
    }));
    let search = Arc::new(MockSearchProvider::new());
    search.queue_error(delver_core::error::SearchError::ApiRequest {
        message: "backend exploded".into(),
    });
    search.queue_response(document("https://ok", Some("body")));

    let (observer, records) = recording_observer();
    let result = engine(search, generator)
        .run(ResearchRequest::new("topic", 2, 1), observer)
        .await;

    // The failing branch contributes nothing; the sibling's result survives.
    assert_eq!(result.learnings, vec!["surviving fact"]);
    assert_eq!(result.visited_urls, vec!["https://ok"]);

    // Progress still reaches total_queries despite the failure.
    let records = records.lock().unwrap();
    let max_completed = records
        .iter()
        .filter(|r| r.total_queries == 2)
        .map(|r| r.completed_queries)
        .max()
        .unwrap();
    assert_eq!(max_completed, 2);
}

#[tokio::test]
async fn all_branches_failing_yields_empty_result() {
    let generator = Arc::new(MockObjectGenerator::new());
    generator.queue_value(json!({
        "queries": [planned("q1", "g1"), planned("q2", "g2")]
    }));
    let search = Arc::new(MockSearchProvider::new());
    search.queue_error(delver_core::error::SearchError::Timeout { timeout_ms: 15_000 });
    search.queue_error(delver_core::error::SearchError::Connection {
        message: "refused".into(),
    });

    let (observer, records) = recording_observer();
    let result = engine(search, generator)
        .run(ResearchRequest::new("topic", 2, 1), observer)
        .await;

    assert!(result.learnings.is_empty());
    assert!(result.visited_urls.is_empty());
    let records = records.lock().unwrap();
    assert_eq!(
        records
            .iter()
            .filter(|r| r.total_queries == 2)
            .map(|r| r.completed_queries)
            .max(),
        Some(2)
    );
}

#[tokio::test]
async fn end_to_end_two_branches_two_learnings() {
    let generator = Arc::new(MockObjectGenerator::new());
    generator.queue_value(json!({
        "queries": [planned("q1", "g1"), planned("q2", "g2")]
    }));
    generator.queue_value(batch(&["learning one"], &[]));
    generator.queue_value(batch(&["learning two"], &[]));
    let search = Arc::new(MockSearchProvider::new());
    search.queue_response(document("https://one", Some("body one")));
    search.queue_response(document("https://two", Some("body two")));

    let result = engine(search, generator)
        .run(ResearchRequest::new("X", 2, 1), ResearchObserver::new())
        .await;

    let mut learnings = result.learnings.clone();
    learnings.sort();
    assert_eq!(learnings, vec!["learning one", "learning two"]);
    assert!(result.visited_urls.len() <= 2);
}

#[tokio::test]
async fn depth_two_recurses_with_accumulated_state() {
    let generator = Arc::new(MockObjectGenerator::new());
    // Root plan, root distill, child plan, child distill; breadth 1 keeps
    // the sequence deterministic.
    generator.queue_value(json!({ "queries": [planned("q-root", "goal-root")] }));
    generator.queue_value(batch(&["L1"], &["Q1"]));
    generator.queue_value(json!({ "queries": [planned("q-child", "goal-child")] }));
    generator.queue_value(batch(&["L2"], &[]));
    let search = Arc::new(MockSearchProvider::new());
    search.queue_response(document("https://root-doc", Some("root body")));
    search.queue_response(document("https://child-doc", Some("child body")));

    let (observer, records) = recording_observer();
    let result = engine(search.clone(), generator.clone())
        .run(ResearchRequest::new("topic", 1, 2), observer)
        .await;

    // The child branch carries the root unit's accumulated state downward.
    assert_eq!(result.learnings, vec!["L1", "L2"]);
    assert_eq!(result.visited_urls, vec!["https://root-doc", "https://child-doc"]);
    assert_eq!(search.queries(), vec!["q-root", "q-child"]);

    // The child's planning prompt is built from the research goal, the
    // follow-up questions, and the accumulated learnings.
    let prompts = generator.prompts();
    assert!(prompts[2].contains("Previous research goal: goal-root"));
    assert!(prompts[2].contains("Q1"));
    assert!(prompts[2].contains("L1"));

    // Each frame reports its own record: the child's resets the counters.
    let records = records.lock().unwrap();
    assert!(records.iter().any(|r| r.current_depth == 2 && r.total_queries == 1));
    assert!(
        records
            .iter()
            .any(|r| r.current_depth == 1 && r.total_queries == 1 && r.completed_queries == 0)
    );
}

#[tokio::test]
async fn depth_zero_still_searches_one_level() {
    let generator = Arc::new(MockObjectGenerator::new());
    generator.queue_value(json!({ "queries": [planned("q1", "g1")] }));
    generator.queue_value(batch(&["only fact"], &[]));
    let search = Arc::new(MockSearchProvider::with_response(document(
        "https://doc",
        Some("body"),
    )));

    let result = engine(search.clone(), generator)
        .run(ResearchRequest::new("topic", 1, 0), ResearchObserver::new())
        .await;

    // Depth counts remaining recursive levels; the first frame still runs.
    assert_eq!(search.call_count(), 1);
    assert_eq!(result.learnings, vec!["only fact"]);
}

#[tokio::test]
async fn breadth_zero_is_an_immediate_base_case() {
    let generator = Arc::new(MockObjectGenerator::new());
    let search = Arc::new(MockSearchProvider::new());

    let result = engine(search.clone(), generator.clone())
        .run(ResearchRequest::new("topic", 0, 2), ResearchObserver::new())
        .await;

    assert!(result.learnings.is_empty());
    assert!(result.visited_urls.is_empty());
    assert_eq!(generator.call_count(), 0);
    assert_eq!(search.call_count(), 0);
}

#[tokio::test]
async fn planning_failure_terminates_the_frame_quietly() {
    let generator = Arc::new(MockObjectGenerator::new());
    generator.queue_error(delver_core::error::GenerationError::ApiRequest {
        message: "planner down".into(),
    });
    let search = Arc::new(MockSearchProvider::new());

    let result = engine(search.clone(), generator)
        .run(ResearchRequest::new("topic", 3, 2), ResearchObserver::new())
        .await;

    assert!(result.learnings.is_empty());
    assert_eq!(search.call_count(), 0);
}

#[tokio::test]
async fn prior_learnings_seed_the_result_and_the_plan() {
    let generator = Arc::new(MockObjectGenerator::new());
    generator.queue_value(json!({ "queries": [planned("q1", "g1")] }));
    generator.queue_value(batch(&["new fact"], &[]));
    let search = Arc::new(MockSearchProvider::with_response(document(
        "https://doc",
        Some("body"),
    )));

    let mut request = ResearchRequest::new("continue the research", 1, 1);
    request.learnings = vec!["prior fact".to_string()];
    request.visited_urls = vec!["https://prior".to_string()];

    let result = engine(search, generator.clone())
        .run(request, ResearchObserver::new())
        .await;

    // Continuation research: prior state flows through the branch unions.
    assert_eq!(result.learnings, vec!["prior fact", "new fact"]);
    assert_eq!(result.visited_urls, vec!["https://prior", "https://doc"]);
    assert!(generator.prompts()[0].contains("prior fact"));
}

#[tokio::test]
async fn global_scope_produces_the_same_result() {
    let generator = Arc::new(MockObjectGenerator::with_value(batch(&["fact"], &[])));
    generator.queue_value(json!({
        "queries": [planned("q1", "g1"), planned("q2", "g2")]
    }));
    let search = Arc::new(MockSearchProvider::with_response(document(
        "https://doc",
        Some("body"),
    )));

    let result = engine_with_scope(search, generator, ConcurrencyScope::Global)
        .run(ResearchRequest::new("topic", 2, 1), ResearchObserver::new())
        .await;

    assert_eq!(result.learnings, vec!["fact"]);
}

#[tokio::test]
async fn run_research_rejects_unknown_provider_before_starting() {
    use delver_core::config::DelverConfig;
    use delver_core::error::DelverError;
    use delver_core::research::run_research;

    let mut config = DelverConfig::default();
    config.search.provider = "altavista".to_string();
    let err = run_research(
        ResearchRequest::new("topic", 2, 1),
        &config,
        ResearchObserver::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DelverError::Config(_)));
}

#[tokio::test]
async fn tree_aggregate_counts_every_frame() {
    let generator = Arc::new(MockObjectGenerator::new());
    generator.queue_value(json!({ "queries": [planned("q-root", "goal")] }));
    generator.queue_value(batch(&["L1"], &["Q1"]));
    generator.queue_value(json!({ "queries": [planned("q-child", "goal")] }));
    generator.queue_value(batch(&["L2"], &[]));
    let search = Arc::new(MockSearchProvider::with_response(document(
        "https://doc",
        Some("body"),
    )));

    let observer = ResearchObserver::new();
    engine(search, generator)
        .run(ResearchRequest::new("topic", 1, 2), observer.clone())
        .await;

    // Two frames planned one query each; both branches resolved.
    let tree = observer.tree();
    assert_eq!(tree.total_queries, 2);
    assert_eq!(tree.completed_queries, 2);
}
