//! Lenient parsing of model-produced JSON.
//!
//! Models wrap JSON in prose or code fences often enough that strict
//! parsing alone loses usable output. Parsing tries the raw text, then
//! a fence-stripped version, then the outermost brace/bracket span.
//! Callers substitute a documented default when all three fail.

use serde::de::DeserializeOwned;

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence.
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn outer_span(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse a JSON value out of free-form model output.
pub fn parse_loose<T: DeserializeOwned>(raw: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str(raw.trim()) {
        return Some(value);
    }
    let unfenced = strip_fences(raw);
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(span) = outer_span(unfenced, open, close) {
            if let Ok(value) = serde_json::from_str(span) {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn parses_plain_json() {
        let v: Value = parse_loose(r#"{"ok": true}"#).unwrap();
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn parses_fenced_json() {
        let v: Value = parse_loose("```json\n{\"ok\": true}\n```").unwrap();
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let v: Value = parse_loose("Here you go: {\"k\": 6} hope that helps").unwrap();
        assert_eq!(v["k"], 6);
    }

    #[test]
    fn parses_array_output() {
        let v: Vec<u32> = parse_loose("the list is [1, 2, 3].").unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse_loose::<Value>("no json here").is_none());
    }
}
