//! Output guardrails: PII masking applied to final answer text.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap_or_else(|e| {
        unreachable!("email pattern is a constant: {e}")
    })
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d[\d\-\s]{7,}\d").unwrap_or_else(|e| {
        unreachable!("phone pattern is a constant: {e}")
    })
});

/// Mask email addresses and phone numbers.
pub fn redact_pii(text: &str) -> String {
    let masked = EMAIL_RE.replace_all(text, "[redacted-email]");
    PHONE_RE.replace_all(&masked, "[redacted-phone]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_masked() {
        let out = redact_pii("Contact jane.doe@example.com for details.");
        assert_eq!(out, "Contact [redacted-email] for details.");
    }

    #[test]
    fn phone_numbers_are_masked() {
        let out = redact_pii("Call +1 555-123-4567 now");
        assert!(out.contains("[redacted-phone]"));
        assert!(!out.contains("555"));
    }

    #[test]
    fn clean_text_is_untouched() {
        let text = "Founded in 2012 with 7 employees.";
        assert_eq!(redact_pii(text), text);
    }
}
