//! Deterministic queue-backed completer for tests and offline runs.

use std::collections::VecDeque;

use parking_lot::Mutex;

use ens_domain::error::{Error, Result};

use crate::traits::{CompleteOptions, Completer};

/// Returns canned completions in order and records the prompts it saw.
pub struct ScriptedCompleter {
    id: String,
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedCompleter {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: "scripted".into(),
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue another response at the back.
    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().push_back(response.into());
    }

    /// The `(system, user)` prompt pairs observed so far.
    pub fn seen_prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait::async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, system: &str, user: &str, _opts: &CompleteOptions) -> Result<String> {
        self.prompts
            .lock()
            .push((system.to_owned(), user.to_owned()));
        self.responses.lock().pop_front().ok_or_else(|| {
            Error::Internal("scripted completer exhausted: no response queued".into())
        })
    }

    fn id(&self) -> &str {
        &self.id
    }
}
