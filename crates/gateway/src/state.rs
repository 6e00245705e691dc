//! Shared application state passed to all API handlers.

use std::sync::Arc;

use ens_domain::cancel::CancelToken;
use ens_domain::config::Config;
use ens_domain::error::Result;
use ens_engines::Context;
use ens_memory::history::{JsonlHistory, KvHistory};
use ens_memory::vector::{InMemoryIndex, VectorIndex};
use ens_providers::Completer;
use ens_tools::builtin::{CalculatorTool, EmailDraftTool, FileWriteTool, KbSearchTool};
use ens_tools::issues::{HttpIssueResolver, IssueResolver};
use ens_tools::web::{CseSearcher, WebFetchTool, WebSearchTool};
use ens_tools::{Fetcher, HttpFetcher, Searcher, ToolRegistry};
use ens_trace::TraceJournal;

use crate::cancel::CancelMap;
use crate::dispatcher::{self, PipelineRegistry};
use crate::ratelimit::RateLimiter;
use crate::timeline::SessionController;

/// Handles shared by every request: engines get them via [`Context`],
/// HTTP handlers via axum state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub completer: Arc<dyn Completer>,
    pub index: Arc<dyn VectorIndex>,
    pub history: Arc<dyn KvHistory>,
    pub journal: Arc<TraceJournal>,
    pub tools: Arc<ToolRegistry>,
    pub searcher: Option<Arc<dyn Searcher>>,
    pub fetcher: Option<Arc<dyn Fetcher>>,
    pub issues: Option<Arc<dyn IssueResolver>>,
    pub pipelines: Arc<PipelineRegistry>,
    pub sessions: Arc<SessionController>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cancel_map: Arc<CancelMap>,
}

impl AppState {
    /// Wire the state from explicit parts. The tool registry and
    /// pipeline registry are built here so every construction path
    /// gets the same built-ins.
    pub fn new(
        config: Arc<Config>,
        completer: Arc<dyn Completer>,
        index: Arc<dyn VectorIndex>,
        history: Arc<dyn KvHistory>,
        journal: Arc<TraceJournal>,
        searcher: Option<Arc<dyn Searcher>>,
        fetcher: Option<Arc<dyn Fetcher>>,
        issues: Option<Arc<dyn IssueResolver>>,
    ) -> Self {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(CalculatorTool));
        tools.register(Arc::new(EmailDraftTool));
        tools.register(Arc::new(KbSearchTool::new(index.clone())));
        tools.register(Arc::new(FileWriteTool::new(
            config.workspace.root.join("files"),
        )));
        if let Some(searcher) = &searcher {
            tools.register(Arc::new(WebSearchTool::new(searcher.clone())));
        }
        if let Some(fetcher) = &fetcher {
            tools.register(Arc::new(WebFetchTool::new(fetcher.clone())));
        }

        let pipelines = Arc::new(PipelineRegistry::new());
        dispatcher::register_builtin(&pipelines);

        let rate_limiter = Arc::new(RateLimiter::from_config(&config.limits));

        Self {
            completer,
            index,
            history,
            journal,
            tools,
            searcher,
            fetcher,
            issues,
            pipelines,
            sessions: Arc::new(SessionController::new(config.limits.max_iterations)),
            rate_limiter,
            cancel_map: Arc::new(CancelMap::new()),
            config,
        }
    }

    /// Production wiring from configuration. Web search requires its
    /// API key and engine id; both are optional features.
    pub fn from_config(config: Arc<Config>, completer: Arc<dyn Completer>) -> Result<Self> {
        let journal = Arc::new(TraceJournal::from_config(&config.trace)?);
        let index: Arc<dyn VectorIndex> =
            Arc::new(InMemoryIndex::with_dim(config.retrieval.embed_dim));
        let history: Arc<dyn KvHistory> = Arc::new(JsonlHistory::new(
            &config.workspace.root.join("history"),
        )?);

        let fetch_timeout = std::time::Duration::from_secs(config.limits.fetch_timeout_secs);
        let fetcher: Option<Arc<dyn Fetcher>> = Some(Arc::new(HttpFetcher::new(fetch_timeout)?));

        let searcher: Option<Arc<dyn Searcher>> = match (
            std::env::var(&config.retrieval.search_api_key_env).ok(),
            config.retrieval.search_engine_id.as_str(),
        ) {
            (Some(key), engine_id) if !engine_id.is_empty() => {
                Some(Arc::new(CseSearcher::new(key, engine_id, fetch_timeout)?))
            }
            _ => {
                tracing::info!("web search not configured, retrieval uses the vector index only");
                None
            }
        };

        let issues: Option<Arc<dyn IssueResolver>> = Some(Arc::new(HttpIssueResolver::new()?));

        Ok(Self::new(
            config, completer, index, history, journal, searcher, fetcher, issues,
        ))
    }

    /// Build a per-run engine context.
    pub fn context(&self, session_id: &str, run_id: &str, cancel: CancelToken) -> Context {
        let mut ctx = Context::new(
            self.completer.clone(),
            self.index.clone(),
            self.history.clone(),
            self.journal.clone(),
            self.tools.clone(),
            session_id,
            run_id,
        )
        .with_cancel(cancel)
        .with_limits(self.config.limits.clone());
        if let Some(searcher) = &self.searcher {
            ctx = ctx.with_searcher(searcher.clone());
        }
        if let Some(fetcher) = &self.fetcher {
            ctx = ctx.with_fetcher(fetcher.clone());
        }
        ctx
    }
}
