//! Query planning.
//!
//! Turns a research topic (plus any prior learnings) into a bounded list of
//! search queries via structured generation. Planning failures are never
//! fatal: a malformed generation or backend error yields an empty plan, which
//! the orchestrator treats as "no further expansion at this branch".

use crate::generation::{
    GenerationRequest, ObjectGenerator, generate_as, researcher_system_prompt,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// One planned search query and the research goal behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedQuery {
    /// The query to submit to the search backend.
    pub query: String,
    /// What this query is meant to accomplish and where the research should
    /// go once its results are in.
    pub research_goal: String,
}

#[derive(Debug, Deserialize)]
struct PlannedQueries {
    queries: Vec<PlannedQuery>,
}

fn planning_schema(max_queries: usize) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "queries": {
                "type": "array",
                "description": format!("List of search queries, max of {max_queries}"),
                "items": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query",
                        },
                        "research_goal": {
                            "type": "string",
                            "description": "First talk about the goal of the research that this query is meant to accomplish, then go deeper into how to advance the research once the results are found, mention additional research directions. Be as specific as possible, especially for additional research directions.",
                        },
                    },
                    "required": ["query", "research_goal"],
                    "additionalProperties": false,
                },
            },
        },
        "required": ["queries"],
        "additionalProperties": false,
    })
}

fn planning_prompt(topic: &str, prior_learnings: &[String], max_queries: usize) -> String {
    let mut prompt = format!(
        "Given the following prompt from the user, generate a list of search queries to research \
         the topic. Return a maximum of {max_queries} queries, but feel free to return less if the \
         original prompt is clear. Make sure each query is unique and not similar to each other: \
         <prompt>{topic}</prompt>"
    );
    if !prior_learnings.is_empty() {
        prompt.push_str(&format!(
            "\n\nHere are some learnings from previous research, use them to generate more \
             specific queries: {}",
            prior_learnings.join("\n")
        ));
    }
    prompt
}

/// Plan up to `max_queries` search queries for `topic`.
///
/// `prior_learnings`, when non-empty, steer the plan toward novel sub-queries
/// (continuation research). Each query/goal pair's uniqueness is a generation
/// instruction, not re-verified here. Returns an empty list on any
/// generation failure.
pub async fn plan_queries(
    generator: &dyn ObjectGenerator,
    topic: &str,
    prior_learnings: &[String],
    max_queries: usize,
) -> Vec<PlannedQuery> {
    let request = GenerationRequest::new(
        researcher_system_prompt(),
        planning_prompt(topic, prior_learnings, max_queries),
        "search_queries",
        planning_schema(max_queries),
    );

    match generate_as::<PlannedQueries>(generator, request).await {
        Ok(mut planned) => {
            planned.queries.truncate(max_queries);
            debug!(
                count = planned.queries.len(),
                max = max_queries,
                "Planned search queries"
            );
            planned.queries
        }
        Err(e) => {
            warn!(topic = %topic, error = %e, "Query planning failed; no expansion at this branch");
            Vec::new()
        }
    }
}
