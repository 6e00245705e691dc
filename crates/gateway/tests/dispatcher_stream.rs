//! Dispatcher behavior: event ordering, terminal guarantees, rate
//! limiting, cancellation, and timeouts.

use std::sync::Arc;
use std::time::Duration;

use ens_domain::config::Config;
use ens_domain::error::Result;
use ens_domain::event::EngineEvent;
use ens_gateway::dispatcher::{self, DispatchRequest};
use ens_gateway::AppState;
use ens_memory::history::MemoryHistory;
use ens_memory::vector::InMemoryIndex;
use ens_providers::{CompleteOptions, Completer, ScriptedCompleter};
use ens_trace::{TraceJournal, TraceKind};

fn app_with(completer: Arc<dyn Completer>, config: Config) -> AppState {
    AppState::new(
        Arc::new(config),
        completer,
        Arc::new(InMemoryIndex::with_dim(64)),
        Arc::new(MemoryHistory::new()),
        Arc::new(TraceJournal::in_memory()),
        None,
        None,
        None,
    )
}

fn app(completer: Arc<dyn Completer>) -> AppState {
    app_with(completer, Config::default())
}

async fn drain(mut rx: tokio::sync::mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn done_status(events: &[EngineEvent]) -> String {
    match events.last() {
        Some(EngineEvent::Done { payload }) => payload["status"]
            .as_str()
            .unwrap_or("missing")
            .to_owned(),
        other => panic!("final event is not done: {other:?}"),
    }
}

#[tokio::test]
async fn chat_run_streams_tokens_then_one_done() {
    let completer = Arc::new(ScriptedCompleter::new(["1. Nothing needed.", "finalize"]));
    let state = app(completer);

    let request = DispatchRequest::new("chat", "hello").with_session("s-chat");
    let (_run_id, rx) = dispatcher::dispatch(&state, request).unwrap();
    let events = drain(rx).await;

    assert!(matches!(events[0], EngineEvent::Token { .. }));
    assert_eq!(done_status(&events), "completed");
    // Exactly one done, and it is the final event.
    assert_eq!(events.iter().filter(|e| e.is_done()).count(), 1);

    // The journal brackets the run.
    let journal_events = state.journal.read("s-chat");
    assert_eq!(journal_events.first().unwrap().kind, TraceKind::RunStart);
    let last = journal_events.last().unwrap();
    assert_eq!(last.kind, TraceKind::RunEnd);
    assert_eq!(last.metadata["status"], "completed");
}

#[tokio::test]
async fn rag_run_emits_answer_sources_done() {
    let completer = Arc::new(ScriptedCompleter::new([
        r#"{"intents":["answer"],"safety":[],"urgency":"low","notes":""}"#,
        r#"[{"id":"s1","goal":"question","sources":["vector"],"done_test":"answered"}]"#,
        r#"{"queries":["question"],"k":6}"#,
        r#"{"status":"ok","draft":"An answer [#1].","missing":[]}"#,
        r#"{"ok":true,"issues":[],"followup_queries":[]}"#,
    ]));
    let state = app(completer);
    state
        .index
        .add(vec![ens_domain::state::Evidence {
            doc_id: "d1".into(),
            chunk_id: "0".into(),
            text: "relevant context".into(),
            meta: Default::default(),
        }])
        .unwrap();

    let request = DispatchRequest::new("rag", "question").with_session("s-rag");
    let (_run_id, rx) = dispatcher::dispatch(&state, request).unwrap();
    let events = drain(rx).await;

    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["log", "answer", "sources", "done"]);
    assert_eq!(done_status(&events), "completed");
}

#[tokio::test]
async fn failing_run_still_terminates_with_done() {
    // No scripted responses: the first model call errors out.
    let completer = Arc::new(ScriptedCompleter::new(Vec::<String>::new()));
    let state = app(completer);

    let request = DispatchRequest::new("chat", "hello").with_session("s-fail");
    let (_run_id, rx) = dispatcher::dispatch(&state, request).unwrap();
    let events = drain(rx).await;

    assert_eq!(done_status(&events), "failed");
    assert_eq!(events.iter().filter(|e| e.is_done()).count(), 1);

    let last = state.journal.read("s-fail").last().unwrap().clone();
    assert_eq!(last.kind, TraceKind::RunEnd);
    assert_eq!(last.metadata["status"], "failed");
}

#[tokio::test]
async fn unknown_pipeline_is_rejected_upfront() {
    let state = app(Arc::new(ScriptedCompleter::new(Vec::<String>::new())));
    let err = dispatcher::dispatch(&state, DispatchRequest::new("nope", "task")).unwrap_err();
    assert_eq!(err.kind(), "input_invalid");
}

#[tokio::test]
async fn empty_task_is_rejected_upfront() {
    let state = app(Arc::new(ScriptedCompleter::new(Vec::<String>::new())));
    let err = dispatcher::dispatch(&state, DispatchRequest::new("chat", "   ")).unwrap_err();
    assert_eq!(err.kind(), "input_invalid");
}

#[tokio::test]
async fn per_session_rate_limit_kicks_in() {
    let completer = Arc::new(ScriptedCompleter::new(Vec::<String>::new()));
    let state = app(completer);

    for _ in 0..5 {
        let request = DispatchRequest::new("chat", "hi").with_session("busy");
        let (_, rx) = dispatcher::dispatch(&state, request).unwrap();
        // Drain so the spawned runs finish.
        drain(rx).await;
    }
    let err = dispatcher::dispatch(
        &state,
        DispatchRequest::new("chat", "hi").with_session("busy"),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "rate_limited");

    // Another session is unaffected.
    assert!(dispatcher::dispatch(
        &state,
        DispatchRequest::new("chat", "hi").with_session("calm"),
    )
    .is_ok());
}

/// Completer that takes a while, giving tests a window to cancel.
struct SlowCompleter;

#[async_trait::async_trait]
impl Completer for SlowCompleter {
    async fn complete(&self, _system: &str, _user: &str, _opts: &CompleteOptions) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok("1. Keep planning.".into())
    }

    fn id(&self) -> &str {
        "slow"
    }
}

#[tokio::test]
async fn cancellation_flushes_a_cancelled_done() {
    let state = app(Arc::new(SlowCompleter));

    let request = DispatchRequest::new("chat", "hello").with_session("s-cancel");
    let (_run_id, rx) = dispatcher::dispatch(&state, request).unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(state.cancel_map.cancel("s-cancel"));

    let events = drain(rx).await;
    assert_eq!(done_status(&events), "cancelled");

    let last = state.journal.read("s-cancel").last().unwrap().clone();
    assert_eq!(last.kind, TraceKind::RunEnd);
    assert_eq!(last.metadata["status"], "cancelled");
    // The token is released once the run ends.
    assert!(!state.cancel_map.is_running("s-cancel"));
}

#[tokio::test]
async fn task_timeout_yields_failed_done() {
    let mut config = Config::default();
    config.limits.task_timeout_secs = 0;
    let state = app_with(Arc::new(SlowCompleter), config);

    let request = DispatchRequest::new("chat", "hello").with_session("s-timeout");
    let (_run_id, rx) = dispatcher::dispatch(&state, request).unwrap();
    let events = drain(rx).await;

    match events.last() {
        Some(EngineEvent::Done { payload }) => {
            assert_eq!(payload["status"], "failed");
            assert_eq!(payload["error_kind"], "timeout");
        }
        other => panic!("expected done, got {other:?}"),
    }
}

#[tokio::test]
async fn collect_flattens_a_rag_stream() {
    let completer = Arc::new(ScriptedCompleter::new([
        r#"{"intents":["answer"],"safety":[],"urgency":"low","notes":""}"#,
        r#"[{"id":"s1","goal":"q","sources":["vector"],"done_test":"t"}]"#,
        r#"{"queries":["q"],"k":6}"#,
        r#"{"status":"ok","draft":"Answer text.","missing":[]}"#,
        r#"{"ok":true,"issues":[],"followup_queries":[]}"#,
    ]));
    let state = app(completer);

    let request = DispatchRequest::new("rag", "q").with_session("s-collect");
    let (_run_id, rx) = dispatcher::dispatch(&state, request).unwrap();
    let collected = dispatcher::collect(rx).await;

    assert_eq!(collected["answer"], "Answer text.");
    assert_eq!(collected["done"]["status"], "completed");
    assert!(collected["logs"].as_array().is_some());
}

#[tokio::test]
async fn registry_reregistration_replaces_binding() {
    let state = app(Arc::new(ScriptedCompleter::new(Vec::<String>::new())));
    let names_before = state.pipelines.names();
    assert_eq!(names_before, vec!["chat", "coding", "rag"]);

    // Re-registering an existing name keeps the name list stable.
    ens_gateway::dispatcher::register_builtin(&state.pipelines);
    assert_eq!(state.pipelines.names(), names_before);
}
