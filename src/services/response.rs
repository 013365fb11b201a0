//! Helpers for pulling structured data out of free-form model answers.

use serde::de::DeserializeOwned;

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        rest.trim_end_matches("```").trim().to_string()
    } else if let Some(rest) = s.strip_prefix("```") {
        // Drop a language tag such as ```text
        let rest = match rest.find('\n') {
            Some(i) if !rest[..i].contains(' ') => &rest[i + 1..],
            _ => rest,
        };
        rest.trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

/// Parses JSON from a model answer. Falls back to the outermost
/// `open..close` span when the model wrapped the JSON in prose.
pub fn extract_json<T: DeserializeOwned>(response: &str) -> Result<T, serde_json::Error> {
    let cleaned = strip_code_blocks(response);
    match serde_json::from_str(&cleaned) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            for (open, close) in [('{', '}'), ('[', ']')] {
                if let Some(span) = outer_span(&cleaned, open, close) {
                    if let Ok(value) = serde_json::from_str(span) {
                        return Ok(value);
                    }
                }
            }
            Err(first_err)
        }
    }
}

fn outer_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Plain-text answer with fences removed; `None` when nothing is left.
pub fn clean_text(response: &str) -> Option<String> {
    let text = strip_code_blocks(response);
    (!text.is_empty()).then_some(text)
}
