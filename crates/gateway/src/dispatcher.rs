//! Registry-based request dispatch.
//!
//! A pipeline name maps to a handler that drives one engine run and
//! streams `EngineEvent`s. The dispatcher owns the cross-cutting
//! pieces: input validation, rate limiting, run ids, cancellation
//! registration, the per-task timeout, run_start/run_end journaling,
//! and the guarantee that exactly one terminal `done` event is emitted
//! per invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use ens_domain::error::{Error, Result};
use ens_domain::event::EngineEvent;
use ens_engines::{
    Agent, CoderAgent, CodingPipeline, Context, FormatterAgent, ReasoningGraph, ReviewerAgent,
    RetrievalOrchestrator, TesterAgent,
};
use ens_trace::reproducible_run_id;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request & registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub pipeline: String,
    pub task: String,
    pub session_id: Option<String>,
    pub seed: Option<String>,
    /// Extra pipeline-specific inputs (e.g. `github`, `jira` refs).
    pub inputs: Map<String, Value>,
}

impl DispatchRequest {
    pub fn new(pipeline: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            task: task.into(),
            session_id: None,
            seed: None,
            inputs: Map::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(Value::as_str)
    }
}

/// One engine run behind a pipeline name. Handlers emit their stream
/// events through `tx` and return the summary for the terminal `done`
/// payload; the dispatcher emits `done` itself.
#[async_trait::async_trait]
pub trait PipelineHandler: Send + Sync {
    async fn run(
        &self,
        app: &AppState,
        req: &DispatchRequest,
        ctx: &Context,
        tx: &mpsc::Sender<EngineEvent>,
    ) -> Result<Value>;
}

/// Pipeline name → handler. Registering an existing name replaces the
/// binding.
#[derive(Default)]
pub struct PipelineRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn PipelineHandler>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn PipelineHandler>) {
        self.handlers.write().insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PipelineHandler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Register the built-in pipelines.
pub fn register_builtin(registry: &PipelineRegistry) {
    registry.register("coding", Arc::new(CodingHandler));
    registry.register("chat", Arc::new(ChatHandler));
    registry.register("rag", Arc::new(RagHandler));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and launch a run. Returns the run id and the event
/// receiver; the run proceeds in a spawned task and always terminates
/// the stream with exactly one `done` event.
pub fn dispatch(
    app: &AppState,
    req: DispatchRequest,
) -> Result<(String, mpsc::Receiver<EngineEvent>)> {
    let handler = app
        .pipelines
        .get(&req.pipeline)
        .ok_or_else(|| Error::InputInvalid(format!("pipeline not registered: {}", req.pipeline)))?;

    if req.task.trim().is_empty() && req.inputs.is_empty() {
        return Err(Error::InputInvalid("empty task".into()));
    }

    let session_id = req
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if !app.rate_limiter.allow(&session_id) {
        return Err(Error::RateLimited(format!("session {session_id}")));
    }

    let run_id = reproducible_run_id(&session_id, &req.task, req.seed.as_deref());
    let cancel = app.cancel_map.register(&session_id);
    let ctx = app.context(&session_id, &run_id, cancel);

    let (tx, rx) = mpsc::channel::<EngineEvent>(64);
    let app = app.clone();
    let task_timeout = Duration::from_secs(app.config.limits.task_timeout_secs);

    tokio::spawn(async move {
        if let Err(e) = ctx.trace_run_start(&req.task) {
            tracing::warn!(error = %e, "failed to journal run_start");
        }

        let outcome = tokio::time::timeout(task_timeout, handler.run(&app, &req, &ctx, &tx)).await;
        let terminal = match outcome {
            Err(_) => EngineEvent::done_failed(&Error::Timeout("timeout".into())),
            Ok(Ok(summary)) => EngineEvent::done_ok(summary),
            Ok(Err(Error::Cancelled)) => EngineEvent::done_cancelled(),
            Ok(Err(e)) => {
                tracing::warn!(pipeline = %req.pipeline, error = %e, "pipeline run failed");
                EngineEvent::done_failed(&e)
            }
        };

        let status = match &terminal {
            EngineEvent::Done { payload } => payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("completed")
                .to_owned(),
            _ => "completed".to_owned(),
        };
        if let Err(e) = ctx.trace_run_end(&status) {
            tracing::warn!(error = %e, "failed to journal run_end");
        }

        // The terminal event is the final event on the stream.
        let _ = tx.send(terminal).await;
        app.cancel_map.remove(&ctx.session_id);
    });

    Ok((run_id, rx))
}

/// Drain a run's events into one JSON object (the non-streaming path).
pub async fn collect(mut rx: mpsc::Receiver<EngineEvent>) -> Value {
    let mut logs: Vec<String> = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut answer: Option<String> = None;
    let mut sources: Option<Value> = None;
    let mut report: Option<Value> = None;
    let mut done: Option<Value> = None;

    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Log { text } => logs.push(text),
            EngineEvent::Token { text } => tokens.push(text),
            EngineEvent::Answer { text } => answer = Some(text),
            EngineEvent::Sources { json } => {
                sources = serde_json::from_str(&json).ok();
            }
            EngineEvent::Report { payload } => report = Some(payload),
            EngineEvent::Done { payload } => done = Some(payload),
        }
    }

    let mut out = Map::new();
    out.insert("done".into(), done.unwrap_or_else(|| json!({ "status": "failed" })));
    if !logs.is_empty() {
        out.insert("logs".into(), json!(logs));
    }
    if !tokens.is_empty() {
        out.insert("tokens".into(), json!(tokens));
    }
    if let Some(answer) = answer {
        out.insert("answer".into(), json!(answer));
    }
    if let Some(sources) = sources {
        out.insert("sources".into(), sources);
    }
    if let Some(report) = report {
        out.insert("report".into(), report);
    }
    Value::Object(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn send(tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) -> Result<()> {
    tx.send(event).await.map_err(|_| Error::Cancelled)
}

/// Standard agent lineup for the coding pipeline.
pub fn build_coding_pipeline(max_iterations: u32) -> CodingPipeline {
    CodingPipeline::new(
        vec![Arc::new(CoderAgent::new("coder")) as Arc<dyn Agent>],
        vec![Arc::new(FormatterAgent::new("formatter")) as Arc<dyn Agent>],
        vec![Arc::new(TesterAgent::new("tester")) as Arc<dyn Agent>],
        vec![Arc::new(ReviewerAgent::new("qa")) as Arc<dyn Agent>],
        max_iterations,
    )
}

/// `coding`: issue intake + the iterative coding loop.
struct CodingHandler;

#[async_trait::async_trait]
impl PipelineHandler for CodingHandler {
    async fn run(
        &self,
        app: &AppState,
        req: &DispatchRequest,
        ctx: &Context,
        tx: &mpsc::Sender<EngineEvent>,
    ) -> Result<Value> {
        send(tx, EngineEvent::log("Starting pipeline...")).await?;

        // Intake: explicit task text wins, then issue references.
        let mut source = "text";
        let mut title: Option<String> = None;
        let task = if !req.task.trim().is_empty() {
            req.task.clone()
        } else if let (Some(reference), Some(issues)) = (req.input_str("github"), &app.issues) {
            let issue = issues.github(reference).await.ok_or_else(|| {
                Error::DependencyUnavailable(format!("could not resolve github issue {reference}"))
            })?;
            source = "github";
            title = Some(issue.title.clone());
            format!("{}\n\n{}", issue.title, issue.description)
        } else if let (Some(reference), Some(issues)) = (req.input_str("jira"), &app.issues) {
            let issue = issues.jira(reference).await.ok_or_else(|| {
                Error::DependencyUnavailable(format!("could not resolve jira issue {reference}"))
            })?;
            source = "jira";
            title = Some(issue.title.clone());
            format!("{}\n\n{}", issue.title, issue.description)
        } else {
            return Err(Error::InputInvalid(
                "no task text or issue reference provided".into(),
            ));
        };

        send(tx, EngineEvent::log(format!("Task source: {source}"))).await?;
        if let Some(title) = &title {
            send(tx, EngineEvent::log(format!("Title: {title}"))).await?;
        }
        send(
            tx,
            EngineEvent::log("Running agents (coding -> format -> tests -> QA)..."),
        )
        .await?;

        let pipeline = build_coding_pipeline(app.config.limits.max_iterations);
        let state = pipeline.run(ctx, &task).await?;

        let status = state
            .status
            .map(|s| s.as_str())
            .unwrap_or("unknown")
            .to_owned();
        send(tx, EngineEvent::log(format!("Status: {status}"))).await?;

        let feedback = [&state.test_output, &state.qa_output, &state.feedback]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
            .cloned();
        if let Some(feedback) = &feedback {
            send(tx, EngineEvent::log(format!("Feedback:\n{feedback}"))).await?;
        }

        send(
            tx,
            EngineEvent::report(json!({
                "status": status,
                "proposed_code": state.proposed_code,
                "tests_passed": state.tests_passed,
                "qa_passed": state.qa_passed,
                "feedback": state.feedback,
                "iterations": state.extra.get("iterations"),
                "reason": state.reason,
            })),
        )
        .await?;

        let mut summary = json!({
            "status": status,
            "task": { "source": source, "title": title },
        });
        if state.reason.as_deref() == Some("max iterations reached") {
            // Convergence exhaustion surfaces as failed with the last
            // feedback attached.
            summary["error_kind"] = json!(Error::Exhausted(String::new()).kind());
            summary["feedback"] = json!(state.feedback);
        }
        Ok(summary)
    }
}

/// `chat`: one reasoning-graph run with token streaming.
struct ChatHandler;

#[async_trait::async_trait]
impl PipelineHandler for ChatHandler {
    async fn run(
        &self,
        _app: &AppState,
        req: &DispatchRequest,
        ctx: &Context,
        tx: &mpsc::Sender<EngineEvent>,
    ) -> Result<Value> {
        let state = ReasoningGraph::run(ctx, &req.task, tx).await?;
        Ok(json!({
            "status": state.status.map(|s| s.as_str()).unwrap_or("completed"),
            "session_id": ctx.session_id,
        }))
    }
}

/// `rag`: retrieval + grounded synthesis with citations.
struct RagHandler;

#[async_trait::async_trait]
impl PipelineHandler for RagHandler {
    async fn run(
        &self,
        _app: &AppState,
        req: &DispatchRequest,
        ctx: &Context,
        tx: &mpsc::Sender<EngineEvent>,
    ) -> Result<Value> {
        send(tx, EngineEvent::log("Planning and retrieving evidence...")).await?;
        let result = RetrievalOrchestrator::answer(ctx, &req.task).await?;
        send(tx, EngineEvent::answer(result.answer)).await?;
        send(
            tx,
            EngineEvent::sources(serde_json::to_string(&result.citations)?),
        )
        .await?;
        Ok(json!({ "ok": true, "session_id": ctx.session_id }))
    }
}
