//! Final report generation.
//!
//! A single structured-generation call that turns the accumulated learnings
//! into a long-form Markdown report, with the visited URLs appended as a
//! Sources section. Unlike the research loop, errors here propagate: without
//! a report there is nothing to save.

use delver_core::error::GenerationError;
use delver_core::generation::{
    GenerationRequest, ObjectGenerator, generate_as, researcher_system_prompt, trim_to_chars,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct FinalReport {
    report_markdown: String,
}

/// Write the final report for `prompt` from the accumulated research state.
///
/// The learnings are wrapped in `<learning>` tags and trimmed to
/// `report_budget_chars` before generation; the Sources section is appended
/// mechanically from `visited_urls`.
pub async fn write_final_report(
    generator: &dyn ObjectGenerator,
    prompt: &str,
    learnings: &[String],
    visited_urls: &[String],
    report_budget_chars: usize,
) -> Result<String, GenerationError> {
    let wrapped: String = learnings
        .iter()
        .map(|learning| format!("<learning>\n{learning}\n</learning>"))
        .collect::<Vec<_>>()
        .join("\n");
    let learnings_string = trim_to_chars(&wrapped, report_budget_chars);
    debug!(
        learnings = learnings.len(),
        chars = learnings_string.len(),
        "Generating final report"
    );

    let request = GenerationRequest::new(
        researcher_system_prompt(),
        format!(
            "Given the following prompt from the user, write a final report on the topic using \
             the learnings from research. Make it as detailed as possible, aim for 3 or more \
             pages, include ALL the learnings from research:\n\n<prompt>{prompt}</prompt>\n\nHere \
             are all the learnings from previous research:\n\n<learnings>\n{learnings_string}\n</learnings>"
        ),
        "final_report",
        json!({
            "type": "object",
            "properties": {
                "report_markdown": {
                    "type": "string",
                    "description": "Final report on the topic in Markdown",
                },
            },
            "required": ["report_markdown"],
            "additionalProperties": false,
        }),
    );

    let report: FinalReport = generate_as(generator, request).await?;

    let sources: String = visited_urls
        .iter()
        .map(|url| format!("- {url}"))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(format!(
        "{}\n\n## Sources\n\n{}",
        report.report_markdown, sources
    ))
}
