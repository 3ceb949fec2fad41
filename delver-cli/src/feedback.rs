//! Clarifying questions asked before research begins.
//!
//! Given the initial topic, generates open-ended follow-up questions whose
//! answers sharpen the research scope. Generation failures fall back to a
//! fixed set of generic questions rather than blocking the run.

use delver_core::generation::{
    GenerationRequest, ObjectGenerator, generate_as, researcher_system_prompt,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

/// Questions used when the generation backend is unavailable.
const DEFAULT_QUESTIONS: [&str; 3] = [
    "Could you provide more specific details about what aspects of this topic you're most interested in?",
    "Are there any particular use cases or scenarios you want the research to focus on?",
    "What's your current level of knowledge on this topic, and what gaps are you trying to fill?",
];

#[derive(Debug, Deserialize)]
struct FeedbackQuestions {
    questions: Vec<String>,
}

fn feedback_prompt(topic: &str, num_questions: usize) -> String {
    format!(
        "Given the following research topic, generate {num_questions} follow-up questions to \
         better understand the user's research needs. These questions should help clarify the \
         scope, focus, and specific aspects of the research topic that would be most valuable to \
         explore.\n\nResearch Topic: {topic}\n\nThe questions should be clear, specific, and \
         designed to elicit informative responses that will guide the research process. Avoid \
         yes/no questions and instead ask open-ended questions that encourage detailed answers."
    )
}

/// Generate up to `num_questions` clarifying questions for `topic`.
///
/// Never fails: on any generation error the default questions are returned.
pub async fn generate_feedback(
    generator: &dyn ObjectGenerator,
    topic: &str,
    num_questions: usize,
) -> Vec<String> {
    let request = GenerationRequest::new(
        researcher_system_prompt(),
        feedback_prompt(topic, num_questions),
        "feedback_questions",
        json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": format!(
                        "List of {num_questions} follow-up questions to better understand the research needs"
                    ),
                },
            },
            "required": ["questions"],
            "additionalProperties": false,
        }),
    );

    match generate_as::<FeedbackQuestions>(generator, request).await {
        Ok(mut feedback) => {
            feedback.questions.truncate(num_questions);
            feedback.questions
        }
        Err(e) => {
            warn!(topic = %topic, error = %e, "Feedback generation failed; using default questions");
            DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect()
        }
    }
}
