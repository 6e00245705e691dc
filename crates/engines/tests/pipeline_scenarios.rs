//! End-to-end coding-pipeline scenarios with a scripted completer.

use std::sync::Arc;

use ens_domain::cancel::CancelToken;
use ens_domain::state::RunStatus;
use ens_engines::{
    Agent, CoderAgent, CodingPipeline, Context, FormatterAgent, ReviewerAgent, TesterAgent,
};
use ens_memory::history::MemoryHistory;
use ens_memory::vector::InMemoryIndex;
use ens_providers::{RetryPolicy, ScriptedCompleter};
use ens_tools::ToolRegistry;
use ens_trace::TraceJournal;

fn context(completer: Arc<ScriptedCompleter>) -> Context {
    Context::new(
        completer,
        Arc::new(InMemoryIndex::with_dim(64)),
        Arc::new(MemoryHistory::new()),
        Arc::new(TraceJournal::in_memory()),
        Arc::new(ToolRegistry::new()),
        "sess-pipeline",
        "run-1",
    )
    .with_retry(RetryPolicy::none())
}

fn pipeline(max_iterations: u32) -> CodingPipeline {
    CodingPipeline::new(
        vec![Arc::new(CoderAgent::new("coder")) as Arc<dyn Agent>],
        vec![Arc::new(FormatterAgent::new("formatter")) as Arc<dyn Agent>],
        vec![Arc::new(TesterAgent::new("tester")) as Arc<dyn Agent>],
        vec![Arc::new(ReviewerAgent::new("qa")) as Arc<dyn Agent>],
        max_iterations,
    )
}

const PASSING_TESTS: &str = r#"{"passed": true, "output": "1 passed"}"#;
const PASSING_QA: &str = r#"{"passed": true, "output": "PASS"}"#;

#[tokio::test]
async fn happy_path_completes_in_one_iteration() {
    let completer = Arc::new(ScriptedCompleter::new([
        "def add(a,b):\n    return a+b\n",
        PASSING_TESTS,
        PASSING_QA,
    ]));
    let ctx = context(completer.clone());

    let state = pipeline(3).run(&ctx, "add two numbers").await.unwrap();

    assert_eq!(state.status, Some(RunStatus::Completed));
    assert!(state.done);
    assert!(state.proposed_code.as_deref().unwrap().contains("def add"));
    assert_eq!(state.tests_passed, Some(true));
    assert_eq!(state.qa_passed, Some(true));
    assert_eq!(state.extra["iterations"], 1);
    assert_eq!(completer.remaining(), 0);
}

#[tokio::test]
async fn failing_tests_feed_back_into_a_revision() {
    let completer = Arc::new(ScriptedCompleter::new([
        // Iteration 1: draft, then a failing test run.
        "def sort_list(xs):\n    return xs\n",
        r#"{"passed": false, "output": "AssertionError: order"}"#,
        // Iteration 2: revision, green tests, green review.
        "def sort_list(xs):\n    return sorted(xs)\n",
        PASSING_TESTS,
        PASSING_QA,
    ]));
    let ctx = context(completer.clone());

    let state = pipeline(3).run(&ctx, "sort list").await.unwrap();

    assert_eq!(state.status, Some(RunStatus::Completed));
    assert_eq!(state.extra["iterations"], 2);
    assert!(state.proposed_code.as_deref().unwrap().contains("sorted"));
    // The iteration-1 test output stays on the state as feedback until
    // something overwrites it.
    assert_eq!(state.feedback.as_deref(), Some("AssertionError: order"));

    // The revising coder saw the prior code and the feedback.
    let prompts = completer.seen_prompts();
    let revision_prompt = &prompts[2].1;
    assert!(revision_prompt.contains("Improve the following code"));
    assert!(revision_prompt.contains("AssertionError: order"));
    assert!(revision_prompt.contains("return xs"));
}

#[tokio::test]
async fn exhaustion_fails_with_last_feedback() {
    let completer = Arc::new(ScriptedCompleter::new([
        "code v1",
        r#"{"passed": false, "output": "first failure"}"#,
        "code v2",
        r#"{"passed": false, "output": "second failure"}"#,
    ]));
    let ctx = context(completer);

    let state = pipeline(2).run(&ctx, "impossible task").await.unwrap();

    assert_eq!(state.status, Some(RunStatus::Failed));
    assert_eq!(state.feedback.as_deref(), Some("second failure"));
    assert_eq!(state.extra["iterations"], 2);
}

#[tokio::test]
async fn failing_review_also_loops() {
    let completer = Arc::new(ScriptedCompleter::new([
        "code v1",
        PASSING_TESTS,
        r#"{"passed": false, "output": "naming needs work"}"#,
        "code v2",
        PASSING_TESTS,
        PASSING_QA,
    ]));
    let ctx = context(completer);

    let state = pipeline(3).run(&ctx, "rename things").await.unwrap();
    assert_eq!(state.status, Some(RunStatus::Completed));
    assert_eq!(state.extra["iterations"], 2);
    assert_eq!(state.feedback.as_deref(), Some("naming needs work"));
}

#[tokio::test]
async fn zero_iterations_fails_immediately() {
    let completer = Arc::new(ScriptedCompleter::new(Vec::<String>::new()));
    let ctx = context(completer);

    let state = pipeline(0).run(&ctx, "anything").await.unwrap();
    assert_eq!(state.status, Some(RunStatus::Failed));
    assert_eq!(state.reason.as_deref(), Some("no iterations"));
}

#[tokio::test]
async fn empty_task_is_invalid_input() {
    let completer = Arc::new(ScriptedCompleter::new(Vec::<String>::new()));
    let ctx = context(completer);

    let err = pipeline(3).run(&ctx, "   ").await.unwrap_err();
    assert_eq!(err.kind(), "input_invalid");
}

#[tokio::test]
async fn empty_code_from_coder_fails_the_run() {
    let completer = Arc::new(ScriptedCompleter::new(["   \n"]));
    let ctx = context(completer);

    let state = pipeline(3).run(&ctx, "do something").await.unwrap();
    assert_eq!(state.status, Some(RunStatus::Failed));
    assert_eq!(state.reason.as_deref(), Some("coder did not return code"));
}

#[tokio::test]
async fn malformed_test_verdict_counts_as_failure() {
    let completer = Arc::new(ScriptedCompleter::new([
        "code v1",
        "I think it is probably fine",
    ]));
    let ctx = context(completer);

    let state = pipeline(1).run(&ctx, "something").await.unwrap();
    assert_eq!(state.status, Some(RunStatus::Failed));
    assert_eq!(
        state.feedback.as_deref(),
        Some("I think it is probably fine")
    );
}

#[tokio::test]
async fn cancellation_aborts_the_run() {
    let completer = Arc::new(ScriptedCompleter::new(["code"]));
    let cancel = CancelToken::new();
    cancel.cancel();
    let ctx = context(completer).with_cancel(cancel);

    let err = pipeline(3).run(&ctx, "task").await.unwrap_err();
    assert_eq!(err.kind(), "cancelled");
}

#[tokio::test]
async fn completed_implies_all_gates_green() {
    let completer = Arc::new(ScriptedCompleter::new([
        "fn answer() -> u32 { 42 }",
        PASSING_TESTS,
        PASSING_QA,
    ]));
    let ctx = context(completer);

    let state = pipeline(3).run(&ctx, "answer").await.unwrap();
    if state.status == Some(RunStatus::Completed) {
        assert_eq!(state.tests_passed, Some(true));
        assert_eq!(state.qa_passed, Some(true));
    } else {
        panic!("expected completion");
    }
}
