//! Redaction applied to every record before it is written.
//!
//! Values under secret-looking keys are replaced with a sentinel;
//! oversized strings are truncated with a marker that preserves the
//! original length.

use serde_json::Value;

use crate::event::TraceEvent;

pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark a value as sensitive (case-insensitive
/// substring match).
const SECRET_KEY_FRAGMENTS: &[&str] = &[
    "api_key",
    "token",
    "password",
    "authorization",
    "cookie",
    "secret",
];

pub fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_KEY_FRAGMENTS.iter().any(|frag| lower.contains(frag))
}

/// Truncate a string above `cap` chars, appending a length marker.
pub fn truncate_value(value: &str, cap: usize) -> String {
    if value.chars().count() <= cap {
        return value.to_owned();
    }
    let head: String = value.chars().take(cap).collect();
    format!("{head}...[TRUNCATED:{} chars]", value.chars().count())
}

/// Redact a JSON value in place: secret keys are masked at any depth,
/// long strings truncated.
pub fn redact_json(value: &mut Value, cap: usize) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_secret_key(key) {
                    *entry = Value::String(REDACTED.to_owned());
                } else {
                    redact_json(entry, cap);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_json(item, cap);
            }
        }
        Value::String(s) => {
            let trimmed = truncate_value(s, cap);
            if trimmed.len() != s.len() {
                *s = trimmed;
            }
        }
        _ => {}
    }
}

/// Apply redaction and truncation to a whole event.
pub fn redact_event(event: &mut TraceEvent, cap: usize) {
    if let Some(prompt) = &event.prompt {
        event.prompt = Some(truncate_value(prompt, cap));
    }
    if let Some(output) = &event.output {
        event.output = Some(truncate_value(output, cap));
    }
    redact_json(&mut event.metadata, cap);
}
