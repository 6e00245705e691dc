use ens_domain::error::Result;

/// Options for a single completion call.
#[derive(Debug, Clone)]
pub struct CompleteOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// When `true`, request a single JSON object as the whole response.
    pub json: bool,
}

impl Default for CompleteOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: None,
            json: false,
        }
    }
}

impl CompleteOptions {
    pub fn json() -> Self {
        Self {
            json: true,
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// The opaque model boundary every engine talks through.
///
/// Implementations must be deterministic under replay: given the same
/// prompt sequence, a replay-backed completer returns the recorded
/// outputs in order.
#[async_trait::async_trait]
pub trait Completer: Send + Sync {
    /// Complete a (system, user) prompt pair into text.
    async fn complete(&self, system: &str, user: &str, opts: &CompleteOptions) -> Result<String>;

    /// A short identifier for logs and traces.
    fn id(&self) -> &str;
}
