//! Result distillation.
//!
//! Turns a batch of retrieved documents into deduplicated atomic learnings
//! and candidate follow-up questions via structured generation. Documents
//! without usable content are dropped, each remaining document is trimmed to
//! a character budget, and generation failures are non-fatal: the branch
//! continues with an empty batch.

use crate::generation::{
    GenerationRequest, ObjectGenerator, generate_as, researcher_system_prompt, trim_to_chars,
};
use crate::search::SearchResult;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for one distillation call.
const DISTILL_TIMEOUT: Duration = Duration::from_secs(60);

/// Learnings and follow-up questions distilled from one query's documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningsBatch {
    pub learnings: Vec<String>,
    pub follow_up_questions: Vec<String>,
}

impl LearningsBatch {
    pub fn empty() -> Self {
        Self::default()
    }
}

fn distillation_schema(max_learnings: usize, max_follow_ups: usize) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "learnings": {
                "type": "array",
                "items": { "type": "string" },
                "description": format!("List of learnings, max of {max_learnings}"),
            },
            "follow_up_questions": {
                "type": "array",
                "items": { "type": "string" },
                "description": format!(
                    "List of follow-up questions to research the topic further, max of {max_follow_ups}"
                ),
            },
        },
        "required": ["learnings", "follow_up_questions"],
        "additionalProperties": false,
    })
}

fn distillation_prompt(query: &str, contents: &[&str], max_learnings: usize) -> String {
    let wrapped: String = contents
        .iter()
        .map(|content| format!("<content>\n{content}\n</content>"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Given the following contents from a web search for the query <query>{query}</query>, \
         generate a list of learnings from the contents. Return a maximum of {max_learnings} \
         learnings, but feel free to return less if the contents are clear. Make sure each \
         learning is unique and not similar to each other. The learnings should be concise and to \
         the point, as detailed and information dense as possible. Make sure to include any \
         entities like people, places, companies, products, things, etc in the learnings, as well \
         as any exact metrics, numbers, or dates. The learnings will be used to research the topic \
         further.\n\n<contents>{wrapped}</contents>"
    )
}

/// Distill `documents` retrieved for `query` into a bounded learnings batch.
///
/// Documents lacking textual content are filtered out; each content is
/// trimmed to `content_budget_chars`. When nothing usable remains, the
/// generation backend is not invoked at all. The requested caps are also
/// enforced on the returned sequences, so the batch never exceeds
/// `max_learnings`/`max_follow_ups` even if the backend ignores the
/// instruction.
pub async fn distill_documents(
    generator: &dyn ObjectGenerator,
    query: &str,
    documents: &[SearchResult],
    max_learnings: usize,
    max_follow_ups: usize,
    content_budget_chars: usize,
) -> LearningsBatch {
    let contents: Vec<&str> = documents
        .iter()
        .filter_map(|doc| doc.content.as_deref())
        .filter(|content| !content.is_empty())
        .map(|content| trim_to_chars(content, content_budget_chars))
        .collect();

    if contents.is_empty() {
        debug!(query = %query, "No usable content to distill");
        return LearningsBatch::empty();
    }

    let request = GenerationRequest::new(
        researcher_system_prompt(),
        distillation_prompt(query, &contents, max_learnings),
        "learnings",
        distillation_schema(max_learnings, max_follow_ups),
    )
    .with_timeout(DISTILL_TIMEOUT);

    match generate_as::<LearningsBatch>(generator, request).await {
        Ok(mut batch) => {
            batch.learnings.truncate(max_learnings);
            batch.follow_up_questions.truncate(max_follow_ups);
            debug!(
                query = %query,
                learnings = batch.learnings.len(),
                follow_ups = batch.follow_up_questions.len(),
                "Distilled search results"
            );
            batch
        }
        Err(e) => {
            warn!(query = %query, error = %e, "Distillation failed; continuing with empty batch");
            LearningsBatch::empty()
        }
    }
}
