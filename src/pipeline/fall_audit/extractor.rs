//! Turns raw model output into a `Verdict`.
//!
//! The answer is the LAST ```json fenced object in the text: the model may
//! echo the example reply format before giving its own answer. Every path
//! yields a verdict; nothing here returns an error.

use std::sync::LazyLock;

use regex::Regex;

use super::types::Verdict;

pub const NO_RESPONSE: &str = "Error: No response from model";
pub const NO_JSON_FOUND: &str = "No JSON found in response";

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("valid regex"));

pub fn parse_model_output(output: &str) -> Verdict {
    if output.is_empty() {
        return Verdict::Diagnostic(NO_RESPONSE.to_string());
    }

    let Some(json_text) = last_fenced_json(output) else {
        return Verdict::Diagnostic(NO_JSON_FOUND.to_string());
    };

    match serde_json::from_str::<serde_json::Value>(json_text) {
        Ok(value) => Verdict::Structured(value),
        Err(e) => {
            tracing::debug!(error = %e, "Fenced JSON block did not parse");
            Verdict::Diagnostic(format!("Error parsing JSON: {e}"))
        }
    }
}

fn last_fenced_json(output: &str) -> Option<&str> {
    JSON_FENCE_RE
        .captures_iter(output)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
