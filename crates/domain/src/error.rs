/// Shared error type used across all ensemble crates.
///
/// Variants map one-to-one onto the runtime's error taxonomy; `kind()`
/// returns the stable string used in terminal `done` payloads and logs.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("transient external failure: {0}")]
    TransientExternal(String),

    /// A model returned non-parseable structured output and no local
    /// default applied. Most call sites recover with a default instead
    /// of surfacing this.
    #[error("malformed structured output: {0}")]
    MalformedOutput(String),

    #[error("convergence exhausted: {0}")]
    Exhausted(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable taxonomy tag for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InputInvalid(_) => "input_invalid",
            Error::RateLimited(_) => "rate_limited",
            Error::DependencyUnavailable(_) => "dependency_unavailable",
            Error::TransientExternal(_) => "transient_external",
            Error::MalformedOutput(_) => "structured_output_malformed",
            Error::Exhausted(_) => "convergence_exhausted",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Conflict(_) => "conflict",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "internal",
        }
    }

    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientExternal(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::InputInvalid("x".into()).kind(), "input_invalid");
        assert_eq!(Error::RateLimited("x".into()).kind(), "rate_limited");
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(
            Error::MalformedOutput("x".into()).kind(),
            "structured_output_malformed"
        );
        assert_eq!(Error::Exhausted("x".into()).kind(), "convergence_exhausted");
        assert_eq!(Error::Timeout("x".into()).kind(), "timeout");
        assert_eq!(Error::Conflict("x".into()).kind(), "conflict");
        assert_eq!(Error::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn only_external_failures_are_transient() {
        assert!(Error::TransientExternal("x".into()).is_transient());
        assert!(!Error::Timeout("x".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }
}
