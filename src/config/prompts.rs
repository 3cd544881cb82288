//! Built-in prompt text

use std::collections::BTreeMap;

/// Returned as the response body when the model produced no text.
pub const FALLBACK_RESPONSE: &str = "Sorry, I couldn't generate a response.";

/// System prompt for the response evaluator.
pub const EVALUATOR: &str = "You are an expert AI evaluator. Be objective and critical.";

/// Evaluator runs cooler than chat for more consistent scores.
pub const EVALUATOR_TEMPERATURE: f32 = 0.3;

/// Default evaluation criteria, keyed by name.
pub fn default_criteria() -> BTreeMap<String, String> {
    [
        ("relevance", "Is the response relevant to the prompt?"),
        ("accuracy", "Is the information accurate?"),
        ("completeness", "Is the response complete?"),
        ("clarity", "Is the response clear and well-structured?"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Build the prompt asking the model to grade `response` against `criteria`.
pub fn evaluation_prompt(prompt: &str, response: &str, criteria: &BTreeMap<String, String>) -> String {
    let criteria_lines = criteria
        .iter()
        .map(|(name, question)| format!("- {name}: {question}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Please evaluate the following AI response to a prompt.\n\
         Rate each criterion from 1-10 and provide a brief explanation.\n\n\
         Prompt: {prompt}\n\
         Response: {response}\n\n\
         Criteria to evaluate:\n{criteria_lines}\n\n\
         Format your response as JSON with 'scores' and 'explanations' keys."
    )
}
