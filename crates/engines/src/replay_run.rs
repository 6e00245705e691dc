//! Deterministic re-execution of a recorded reasoning-graph run.
//!
//! The harness rebuilds a [`Context`] around the journal: recorded
//! completions stand in for the model, recorded tool responses stand
//! in for the tools. Given the original's journal, the replay must
//! visit the same nodes, request the same tools, and emit byte-equal
//! assistant output; [`compare`] verifies all three.

use std::sync::Arc;

use tokio::sync::mpsc;

use ens_domain::error::{Error, Result};
use ens_domain::event::EngineEvent;
use ens_domain::state::State;
use ens_memory::history::MemoryHistory;
use ens_memory::vector::InMemoryIndex;
use ens_providers::{ReplayCompleter, ReplayMode, RetryPolicy};
use ens_tools::replay_registry;
use ens_trace::{compare, reproducible_run_id, ReplayReport, TraceEvent, TraceJournal, TraceKind};

use crate::context::Context;
use crate::graph::ReasoningGraph;

/// Everything a replay produces.
pub struct ReplayOutcome {
    pub state: State,
    /// The replay's own journal.
    pub events: Vec<TraceEvent>,
    /// Assistant messages emitted, in order.
    pub tokens: Vec<String>,
    /// Comparison against the original journal.
    pub report: ReplayReport,
}

/// Pull the original task and session out of a recorded journal.
fn recorded_input(original: &[TraceEvent]) -> Result<(String, String)> {
    let start = original
        .iter()
        .find(|e| e.kind == TraceKind::RunStart)
        .ok_or_else(|| Error::InputInvalid("journal has no run_start event".into()))?;
    let task = start
        .metadata
        .get("task")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InputInvalid("run_start records no task".into()))?;
    Ok((start.session_id.clone(), task.to_owned()))
}

/// Re-run the reasoning graph against a recorded journal.
pub async fn replay_graph(original: &[TraceEvent], mode: ReplayMode) -> Result<ReplayOutcome> {
    let (original_session, task) = recorded_input(original)?;
    let session_id = format!("replay-{original_session}");
    let run_id = reproducible_run_id(&session_id, &task, Some("replay"));

    let journal = Arc::new(TraceJournal::in_memory());
    let ctx = Context::new(
        Arc::new(ReplayCompleter::from_events(original, mode)),
        Arc::new(InMemoryIndex::with_dim(64)),
        Arc::new(MemoryHistory::new()),
        journal.clone(),
        Arc::new(replay_registry(original)),
        &session_id,
        &run_id,
    )
    .with_retry(RetryPolicy::none());

    let (tx, mut rx) = mpsc::channel::<EngineEvent>(64);
    let drain = tokio::spawn(async move {
        let mut tokens = Vec::new();
        while let Some(event) = rx.recv().await {
            if let EngineEvent::Token { text } = event {
                tokens.push(text);
            }
        }
        tokens
    });

    ctx.trace_run_start(&task)?;
    let result = ReasoningGraph::run(&ctx, &task, &tx).await;
    drop(tx);
    let tokens = drain
        .await
        .map_err(|e| Error::Internal(format!("replay event drain: {e}")))?;

    let state = result?;
    ctx.trace_run_end(
        state
            .status
            .map(|s| s.as_str())
            .unwrap_or("completed"),
    )?;

    let events = journal.read(&session_id);
    let report = compare(original, &events);
    Ok(ReplayOutcome {
        state,
        events,
        tokens,
        report,
    })
}
