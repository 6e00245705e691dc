//! Reasoning-graph end-to-end run plus deterministic replay.

use std::sync::Arc;

use tokio::sync::mpsc;

use ens_domain::cancel::CancelToken;
use ens_domain::config::LimitsConfig;
use ens_domain::event::EngineEvent;
use ens_domain::state::{MessageKind, RunStatus, State};
use ens_engines::replay_run::replay_graph;
use ens_engines::{Context, ReasoningGraph};
use ens_memory::history::MemoryHistory;
use ens_memory::vector::InMemoryIndex;
use ens_providers::{ReplayMode, RetryPolicy, ScriptedCompleter};
use ens_tools::builtin::CalculatorTool;
use ens_tools::ToolRegistry;
use ens_trace::{TraceJournal, TraceKind};

fn context(completer: Arc<ScriptedCompleter>, journal: Arc<TraceJournal>) -> Context {
    let tools = ToolRegistry::new();
    tools.register(Arc::new(CalculatorTool));
    Context::new(
        completer,
        Arc::new(InMemoryIndex::with_dim(64)),
        Arc::new(MemoryHistory::new()),
        journal,
        Arc::new(tools),
        "sess-graph",
        "run-graph",
    )
    .with_retry(RetryPolicy::none())
}

/// Scripted model outputs for the 12×7 calculator scenario.
fn calculator_script() -> Arc<ScriptedCompleter> {
    Arc::new(ScriptedCompleter::new([
        "1. Use the calculator to compute 12*7.\n2. Report the result.",
        "calculate",
        r#"{"expression": "12*7"}"#,
        "BRIEFING\n- 12 x 7 = 84",
    ]))
}

async fn run_graph(ctx: &Context, message: &str) -> (State, Vec<String>) {
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

    ctx.trace_run_start(message).unwrap();
    let state = ReasoningGraph::run(ctx, message, &tx).await.unwrap();
    ctx.trace_run_end(state.status.map(|s| s.as_str()).unwrap_or("completed"))
        .unwrap();
    drop(tx);
    (state, drain.await.unwrap())
}

#[tokio::test]
async fn calculator_question_reaches_a_briefing() {
    let journal = Arc::new(TraceJournal::in_memory());
    let ctx = context(calculator_script(), journal.clone());

    let (state, tokens) = run_graph(&ctx, "What is 12 x 7?").await;

    assert!(state.done);
    assert_eq!(state.status, Some(RunStatus::Completed));

    let briefing = state.last_assistant().unwrap();
    assert!(briefing.content.starts_with("BRIEFING"));
    assert!(briefing.content.contains("84"));
    assert!(tokens.iter().any(|t| t.contains("84")));

    let events = journal.read("sess-graph");
    let nodes: Vec<&str> = events
        .iter()
        .filter(|e| e.kind == TraceKind::NodeEnter)
        .filter_map(|e| e.node.as_deref())
        .collect();
    assert_eq!(
        nodes,
        vec!["plan", "decide", "act", "tool", "reflect", "finalize"]
    );

    // The calculator actually ran, and its response is paired by call id.
    let request = events
        .iter()
        .find(|e| e.kind == TraceKind::ToolRequest)
        .unwrap();
    let response = events
        .iter()
        .find(|e| e.kind == TraceKind::ToolResponse)
        .unwrap();
    assert_eq!(request.tool.as_deref(), Some("calculator"));
    assert_eq!(request.call_id(), response.call_id());
    assert_eq!(response.output.as_deref(), Some("84"));
}

#[tokio::test]
async fn tool_results_are_visible_to_reflection() {
    let journal = Arc::new(TraceJournal::in_memory());
    let completer = calculator_script();
    let ctx = context(completer.clone(), journal);

    run_graph(&ctx, "What is 12 x 7?").await;

    // The reflect prompt (last completion) carries the tool output.
    let prompts = completer.seen_prompts();
    let reflect_prompt = &prompts.last().unwrap().1;
    assert!(reflect_prompt.contains("84"));
}

#[tokio::test]
async fn replay_matches_the_original_run() {
    let journal = Arc::new(TraceJournal::in_memory());
    let ctx = context(calculator_script(), journal.clone());
    let (_, original_tokens) = run_graph(&ctx, "What is 12 x 7?").await;

    let original_events = journal.read("sess-graph");
    let outcome = replay_graph(&original_events, ReplayMode::Strict)
        .await
        .unwrap();

    assert!(outcome.report.is_match(), "{:?}", outcome.report.mismatches);
    assert_eq!(outcome.tokens, original_tokens);
    assert!(outcome.state.done);

    // Same tool sequence, no unmatched calls.
    let replay_tools: Vec<&str> = outcome
        .events
        .iter()
        .filter(|e| e.kind == TraceKind::ToolRequest)
        .filter_map(|e| e.tool.as_deref())
        .collect();
    assert_eq!(replay_tools, vec!["calculator"]);
    assert!(!outcome
        .events
        .iter()
        .any(|e| e.output.as_deref().is_some_and(|o| o.starts_with("[REPLAY:"))));
}

#[tokio::test]
async fn rerunning_a_replay_is_stable() {
    let journal = Arc::new(TraceJournal::in_memory());
    let ctx = context(calculator_script(), journal.clone());
    run_graph(&ctx, "What is 12 x 7?").await;
    let original_events = journal.read("sess-graph");

    let first = replay_graph(&original_events, ReplayMode::Strict).await.unwrap();
    let second = replay_graph(&original_events, ReplayMode::Strict).await.unwrap();
    assert_eq!(first.tokens, second.tokens);
}

#[tokio::test]
async fn finalize_action_short_circuits() {
    let journal = Arc::new(TraceJournal::in_memory());
    let completer = Arc::new(ScriptedCompleter::new([
        "1. Nothing to do.",
        "finalize",
    ]));
    let ctx = context(completer, journal.clone());

    let (state, _) = run_graph(&ctx, "no-op request").await;
    assert!(state.done);

    let events = journal.read("sess-graph");
    let nodes: Vec<&str> = events
        .iter()
        .filter(|e| e.kind == TraceKind::NodeEnter)
        .filter_map(|e| e.node.as_deref())
        .collect();
    assert_eq!(nodes, vec!["plan", "decide", "finalize"]);
}

#[tokio::test]
async fn step_budget_forces_termination() {
    let journal = Arc::new(TraceJournal::in_memory());
    let completer = Arc::new(ScriptedCompleter::new([
        "1. Ponder.",   // plan
        "ponder",       // decide: unroutable -> reflect
        "NEXT: ponder", // reflect: still unroutable -> decide
        "ponder",       // decide again; budget runs out here
    ]));
    let limits = LimitsConfig {
        graph_step_budget: 4,
        ..LimitsConfig::default()
    };
    let ctx = context(completer, journal).with_limits(limits);

    let (tx, mut rx) = mpsc::channel::<EngineEvent>(64);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let state = ReasoningGraph::run(&ctx, "loop forever", &tx).await.unwrap();
    assert!(state.done);
    assert_eq!(state.status, Some(RunStatus::Failed));
    assert_eq!(state.reason.as_deref(), Some("step budget exhausted"));
}

#[tokio::test]
async fn messages_only_ever_grow() {
    let journal = Arc::new(TraceJournal::in_memory());
    let ctx = context(calculator_script(), journal);
    let (state, _) = run_graph(&ctx, "What is 12 x 7?").await;

    // user, plan, tool-call marker, tool result, briefing
    assert!(state.messages.len() >= 5);
    assert_eq!(state.messages[0].kind, MessageKind::User);
}

#[tokio::test]
async fn empty_message_is_invalid() {
    let journal = Arc::new(TraceJournal::in_memory());
    let ctx = context(Arc::new(ScriptedCompleter::new(Vec::<String>::new())), journal);
    let (tx, _rx) = mpsc::channel::<EngineEvent>(64);
    let err = ReasoningGraph::run(&ctx, "  ", &tx).await.unwrap_err();
    assert_eq!(err.kind(), "input_invalid");
}

#[tokio::test]
async fn pre_cancelled_run_never_starts() {
    let journal = Arc::new(TraceJournal::in_memory());
    let cancel = CancelToken::new();
    cancel.cancel();
    let ctx = context(Arc::new(ScriptedCompleter::new(Vec::<String>::new())), journal.clone())
        .with_cancel(cancel);
    let (tx, _rx) = mpsc::channel::<EngineEvent>(64);

    let err = ReasoningGraph::run(&ctx, "hello", &tx).await.unwrap_err();
    assert_eq!(err.kind(), "cancelled");
    // No tool requests were journaled.
    assert!(!journal
        .read("sess-graph")
        .iter()
        .any(|e| e.kind == TraceKind::ToolRequest));
}
