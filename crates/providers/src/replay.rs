//! Journal-backed completer for deterministic replay.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use ens_domain::error::{Error, Result};
use ens_trace::{TraceEvent, TraceKind};

use crate::traits::{CompleteOptions, Completer};

/// What to do when recorded completions run out mid-replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Error on exhaustion: the replay diverged from the recording.
    Strict,
    /// Delegate to a fallback completer, or return a sentinel when no
    /// fallback is configured.
    Lenient,
}

pub const EXHAUSTED_SENTINEL: &str = "[REPLAY: completer exhausted]";

/// Replays recorded `llm_output` values in the order the original run's
/// `llm_prompt` events were journaled.
pub struct ReplayCompleter {
    outputs: Mutex<VecDeque<String>>,
    mode: ReplayMode,
    fallback: Option<Arc<dyn Completer>>,
}

impl ReplayCompleter {
    pub fn from_events(events: &[TraceEvent], mode: ReplayMode) -> Self {
        let outputs = events
            .iter()
            .filter(|e| e.kind == TraceKind::LlmOutput)
            .filter_map(|e| e.output.clone())
            .collect();
        Self {
            outputs: Mutex::new(outputs),
            mode,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Completer>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn remaining(&self) -> usize {
        self.outputs.lock().len()
    }
}

#[async_trait::async_trait]
impl Completer for ReplayCompleter {
    async fn complete(&self, system: &str, user: &str, opts: &CompleteOptions) -> Result<String> {
        if let Some(output) = self.outputs.lock().pop_front() {
            return Ok(output);
        }
        match self.mode {
            ReplayMode::Strict => Err(Error::Internal(
                "replay: recorded completions exhausted, run diverged from journal".into(),
            )),
            ReplayMode::Lenient => match &self.fallback {
                Some(fallback) => fallback.complete(system, user, opts).await,
                None => {
                    tracing::warn!("replay completer exhausted, returning sentinel");
                    Ok(EXHAUSTED_SENTINEL.to_owned())
                }
            },
        }
    }

    fn id(&self) -> &str {
        "replay"
    }
}
