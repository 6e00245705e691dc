//! Per-run execution context.
//!
//! A `Context` carries every handle an engine needs: the completer,
//! vector index, history store, trace journal, tool registry, optional
//! web collaborators, the cancellation token, and the run identity.
//! Tests inject mocks by constructing a context around test doubles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use ens_domain::cancel::CancelToken;
use ens_domain::config::LimitsConfig;
use ens_domain::error::{Error, Result};
use ens_domain::state::ToolCall;
use ens_memory::history::KvHistory;
use ens_memory::vector::VectorIndex;
use ens_providers::{with_retry, CompleteOptions, Completer, RetryPolicy};
use ens_tools::web::{Fetcher, Searcher};
use ens_tools::ToolRegistry;
use ens_trace::{TraceEvent, TraceJournal, TraceKind};

#[derive(Clone)]
pub struct Context {
    pub completer: Arc<dyn Completer>,
    pub index: Arc<dyn VectorIndex>,
    pub history: Arc<dyn KvHistory>,
    pub journal: Arc<TraceJournal>,
    pub tools: Arc<ToolRegistry>,
    pub searcher: Option<Arc<dyn Searcher>>,
    pub fetcher: Option<Arc<dyn Fetcher>>,
    pub cancel: CancelToken,
    pub session_id: String,
    pub run_id: String,
    pub limits: LimitsConfig,
    pub retry: RetryPolicy,
}

impl Context {
    pub fn new(
        completer: Arc<dyn Completer>,
        index: Arc<dyn VectorIndex>,
        history: Arc<dyn KvHistory>,
        journal: Arc<TraceJournal>,
        tools: Arc<ToolRegistry>,
        session_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            completer,
            index,
            history,
            journal,
            tools,
            searcher: None,
            fetcher: None,
            cancel: CancelToken::new(),
            session_id: session_id.into(),
            run_id: run_id.into(),
            limits: LimitsConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_searcher(mut self, searcher: Arc<dyn Searcher>) -> Self {
        self.searcher = Some(searcher);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Error out if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// One journaled model call: records `llm_prompt`/`llm_output`,
    /// observes cancellation first, retries transient failures, and
    /// enforces the per-call model timeout.
    pub async fn complete(
        &self,
        node: &str,
        system: &str,
        user: &str,
        opts: &CompleteOptions,
    ) -> Result<String> {
        self.check_cancelled()?;

        self.journal.append(
            TraceEvent::new(TraceKind::LlmPrompt, &self.session_id, &self.run_id)
                .with_node(node)
                .with_prompt(format!("{system}\n---\n{user}"))
                .with_metadata(json!({ "completer": self.completer.id() })),
        )?;

        let started = Instant::now();
        let model_timeout = Duration::from_secs(self.limits.model_timeout_secs);
        let output = with_retry(&self.retry, || async {
            match tokio::time::timeout(model_timeout, self.completer.complete(system, user, opts))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "model call in {node} exceeded {}s",
                    model_timeout.as_secs()
                ))),
            }
        })
        .await?;

        self.journal.append(
            TraceEvent::new(TraceKind::LlmOutput, &self.session_id, &self.run_id)
                .with_node(node)
                .with_output(&output)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )?;

        Ok(output)
    }

    /// Dispatch one tool call through the registry with the configured
    /// per-call timeout.
    pub async fn dispatch_tool(&self, call: &ToolCall) -> Result<(String, bool)> {
        self.tools
            .dispatch(
                &self.journal,
                &self.session_id,
                &self.run_id,
                call,
                Duration::from_secs(self.limits.tool_timeout_secs),
                &self.cancel,
            )
            .await
    }

    // ── Journal helpers ──────────────────────────────────────────────

    pub fn trace_node_enter(&self, node: &str) -> Result<()> {
        self.journal.append(
            TraceEvent::new(TraceKind::NodeEnter, &self.session_id, &self.run_id).with_node(node),
        )
    }

    pub fn trace_node_exit(&self, node: &str, started: Instant) -> Result<()> {
        self.journal.append(
            TraceEvent::new(TraceKind::NodeExit, &self.session_id, &self.run_id)
                .with_node(node)
                .with_duration_ms(started.elapsed().as_millis() as u64),
        )
    }

    pub fn trace_transition(&self, from: &str, to: &str) -> Result<()> {
        self.journal.append(
            TraceEvent::new(TraceKind::StateTransition, &self.session_id, &self.run_id)
                .with_metadata(json!({ "from": from, "to": to })),
        )
    }

    pub fn trace_run_start(&self, task: &str) -> Result<()> {
        self.journal.append(
            TraceEvent::new(TraceKind::RunStart, &self.session_id, &self.run_id)
                .with_metadata(json!({ "task": task })),
        )
    }

    pub fn trace_run_end(&self, status: &str) -> Result<()> {
        self.journal.append(
            TraceEvent::new(TraceKind::RunEnd, &self.session_id, &self.run_id)
                .with_metadata(json!({ "status": status })),
        )
    }
}
