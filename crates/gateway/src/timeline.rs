//! Human-in-the-loop session controller.
//!
//! A session walks a fixed stage timeline (coding → review →
//! formatting → testing → qa), advancing only on explicit operator
//! actions. Operations against the wrong stage pointer are rejected
//! with a conflict error.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};

use ens_domain::error::{Error, Result};
use ens_domain::state::{RunStatus, State};
use ens_engines::Context;

use crate::dispatcher::build_coding_pipeline;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeline model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Active,
    Awaiting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineStage {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: StageStatus,
    pub artifacts: Value,
    pub feedback: Option<String>,
}

fn fresh_timeline() -> Vec<TimelineStage> {
    [
        ("coding", "Coding", "Coder agents draft or revise the implementation."),
        ("review", "Human Review", "Inspect the draft, then approve or request changes."),
        ("formatting", "Auto Formatting", "Style normalization before testing."),
        ("testing", "Test Orchestration", "Tests run when you green-light them."),
        ("qa", "QA Review", "A reviewer double-checks the requirements."),
    ]
    .into_iter()
    .map(|(id, title, description)| TimelineStage {
        id: id.to_owned(),
        title: title.to_owned(),
        description: description.to_owned(),
        status: StageStatus::Pending,
        artifacts: json!({}),
        feedback: None,
    })
    .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
    pub stage: Option<String>,
    pub kind: String,
    pub timestamp: String,
}

#[derive(Clone)]
struct PipelineSession {
    id: String,
    task: String,
    base_task: String,
    instructions: Vec<String>,
    state: State,
    stage_pointer: String,
    timeline: Vec<TimelineStage>,
    messages: Vec<SessionMessage>,
}

impl PipelineSession {
    fn new(task: &str) -> Self {
        let task = task.trim().to_owned();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            base_task: task.clone(),
            instructions: Vec::new(),
            state: State::for_task(&task),
            stage_pointer: "coding".into(),
            timeline: fresh_timeline(),
            messages: vec![SessionMessage {
                role: "user".into(),
                content: task.clone(),
                stage: Some("intake".into()),
                kind: "task".into(),
                timestamp: Utc::now().to_rfc3339(),
            }],
            task,
        }
    }

    fn stage_mut(&mut self, id: &str) -> &mut TimelineStage {
        self.timeline
            .iter_mut()
            .find(|s| s.id == id)
            .unwrap_or_else(|| unreachable!("stage ids are fixed: {id}"))
    }

    fn append_message(&mut self, role: &str, content: String, stage: &str, kind: &str) {
        self.messages.push(SessionMessage {
            role: role.to_owned(),
            content,
            stage: Some(stage.to_owned()),
            kind: kind.to_owned(),
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    fn snapshot(&self) -> Value {
        json!({
            "session_id": self.id,
            "task": self.task,
            "stage": self.stage_pointer,
            "timeline": self.timeline,
            "messages": self.messages,
            "state": {
                "status": self.state.status,
                "proposed_code": self.state.proposed_code,
                "tests_passed": self.state.tests_passed,
                "qa_passed": self.state.qa_passed,
                "feedback": self.state.feedback,
            },
            "instructions": self.instructions,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stores sessions and advances their timelines stage by stage.
pub struct SessionController {
    max_iterations: u32,
    sessions: RwLock<HashMap<String, PipelineSession>>,
}

impl SessionController {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn agents(&self) -> ens_engines::CodingPipeline {
        build_coding_pipeline(self.max_iterations)
    }

    fn take(&self, session_id: &str) -> Result<PipelineSession> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::InputInvalid(format!("unknown session: {session_id}")))
    }

    fn store(&self, session: PipelineSession) -> Value {
        let snapshot = session.snapshot();
        self.sessions.write().insert(session.id.clone(), session);
        snapshot
    }

    pub fn get(&self, session_id: &str) -> Result<Value> {
        Ok(self.take(session_id)?.snapshot())
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Create a session and immediately run the coders.
    pub async fn create(&self, ctx: &Context, task: &str) -> Result<Value> {
        if task.trim().is_empty() {
            return Err(Error::InputInvalid("empty task".into()));
        }
        let mut session = PipelineSession::new(task);
        self.run_coders(ctx, &mut session).await?;
        Ok(self.store(session))
    }

    /// Human review decision: `approve` moves on to formatting,
    /// `revise` reruns the coders with accumulated feedback.
    pub async fn apply_feedback(
        &self,
        ctx: &Context,
        session_id: &str,
        action: &str,
        comment: Option<&str>,
    ) -> Result<Value> {
        let mut session = self.take(session_id)?;
        if session.stage_pointer != "review" {
            return Err(Error::Conflict(format!(
                "session is at stage '{}', not awaiting review",
                session.stage_pointer
            )));
        }

        if let Some(comment) = comment.map(str::trim).filter(|c| !c.is_empty()) {
            session.instructions.push(comment.to_owned());
            session.append_message("user", comment.to_owned(), "review", "feedback");
        }

        match action {
            "revise" => {
                let mut task = session.base_task.clone();
                if !session.instructions.is_empty() {
                    task.push_str("\n\nHuman feedback:\n");
                    for item in &session.instructions {
                        task.push_str(&format!("- {item}\n"));
                    }
                }
                session.task = task.clone();
                session.state.task = Some(task);
                self.run_coders(ctx, &mut session).await?;
            }
            "approve" => {
                session.stage_mut("review").status = StageStatus::Completed;
                self.run_formatters(ctx, &mut session).await?;
            }
            other => {
                return Err(Error::InputInvalid(format!(
                    "action must be 'approve' or 'revise', got '{other}'"
                )));
            }
        }
        Ok(self.store(session))
    }

    /// Machine stage advancement: `run_tests` from `testing`,
    /// `send_to_qa` from `qa`.
    pub async fn advance(&self, ctx: &Context, session_id: &str, action: &str) -> Result<Value> {
        let mut session = self.take(session_id)?;
        match action {
            "run_tests" => {
                if session.stage_pointer != "testing" {
                    return Err(Error::Conflict(format!(
                        "session is at stage '{}', cannot run tests",
                        session.stage_pointer
                    )));
                }
                self.run_tests(ctx, &mut session).await?;
            }
            "send_to_qa" => {
                if session.stage_pointer != "qa" {
                    return Err(Error::Conflict(format!(
                        "session is at stage '{}', cannot send to QA",
                        session.stage_pointer
                    )));
                }
                self.run_qa(ctx, &mut session).await?;
            }
            other => {
                return Err(Error::InputInvalid(format!(
                    "action must be 'run_tests' or 'send_to_qa', got '{other}'"
                )));
            }
        }
        Ok(self.store(session))
    }

    // ── Stage runners ────────────────────────────────────────────────

    async fn run_coders(&self, ctx: &Context, session: &mut PipelineSession) -> Result<()> {
        session.stage_mut("coding").status = StageStatus::Active;
        let pipeline = self.agents();
        for coder in &pipeline.coders {
            session.state = coder.run(ctx, session.state.clone()).await?;
        }
        let artifacts = json!({ "proposed_code": session.state.proposed_code });
        let stage = session.stage_mut("coding");
        stage.status = StageStatus::Completed;
        stage.artifacts = artifacts;

        session.append_message(
            "assistant",
            "The coders produced a candidate implementation.".into(),
            "coding",
            "stage-update",
        );
        session.stage_mut("review").status = StageStatus::Awaiting;
        session.stage_pointer = "review".into();
        Ok(())
    }

    async fn run_formatters(&self, ctx: &Context, session: &mut PipelineSession) -> Result<()> {
        session.stage_mut("formatting").status = StageStatus::Active;
        let pipeline = self.agents();
        for formatter in &pipeline.formatters {
            if let Ok(next) = formatter.run(ctx, session.state.clone()).await {
                session.state = next;
            }
        }
        let artifacts = json!({ "formatted_code": session.state.proposed_code });
        let stage = session.stage_mut("formatting");
        stage.status = StageStatus::Completed;
        stage.artifacts = artifacts;

        session.append_message(
            "assistant",
            "Formatting pass finished; the patch is ready for testing.".into(),
            "formatting",
            "stage-update",
        );
        session.stage_mut("testing").status = StageStatus::Awaiting;
        session.stage_pointer = "testing".into();
        Ok(())
    }

    async fn run_tests(&self, ctx: &Context, session: &mut PipelineSession) -> Result<()> {
        session.stage_mut("testing").status = StageStatus::Active;
        let pipeline = self.agents();
        let mut outputs: Vec<String> = Vec::new();
        let mut all_passed = true;
        for tester in &pipeline.testers {
            session.state = tester.run(ctx, session.state.clone()).await?;
            outputs.push(session.state.test_output.clone().unwrap_or_default());
            if !session.state.tests_passed.unwrap_or(false) {
                all_passed = false;
            }
        }
        let combined = outputs.join("\n").trim().to_owned();

        let stage = session.stage_mut("testing");
        stage.artifacts = json!({ "tests_passed": all_passed, "test_output": combined.clone() });
        if all_passed {
            stage.status = StageStatus::Completed;
            session.append_message(
                "assistant",
                "Automated tests passed. Clear to send the patch to QA.".into(),
                "testing",
                "stage-update",
            );
            session.stage_mut("qa").status = StageStatus::Awaiting;
            session.stage_pointer = "qa".into();
        } else {
            stage.status = StageStatus::Failed;
            session.state.feedback = Some(combined);
            session.append_message(
                "assistant",
                "Tests failed. Review the logs and send feedback for another coding pass.".into(),
                "testing",
                "stage-update",
            );
            session.stage_mut("review").status = StageStatus::Awaiting;
            session.stage_pointer = "review".into();
        }
        Ok(())
    }

    async fn run_qa(&self, ctx: &Context, session: &mut PipelineSession) -> Result<()> {
        session.stage_mut("qa").status = StageStatus::Active;
        let pipeline = self.agents();
        let mut all_passed = true;
        for reviewer in &pipeline.reviewers {
            session.state = reviewer.run(ctx, session.state.clone()).await?;
            if !session.state.qa_passed.unwrap_or(false) {
                all_passed = false;
            }
        }

        let artifacts = json!({
            "qa_passed": all_passed,
            "qa_output": session.state.qa_output,
        });
        let stage = session.stage_mut("qa");
        stage.artifacts = artifacts;
        if all_passed {
            stage.status = StageStatus::Completed;
            session.append_message(
                "assistant",
                "QA approved the patch.".into(),
                "qa",
                "stage-update",
            );
            session.stage_pointer = "complete".into();
            session.state.mark_done(RunStatus::Completed);
        } else {
            stage.status = StageStatus::Failed;
            session.state.feedback = session.state.qa_output.clone();
            session.append_message(
                "assistant",
                "QA flagged issues. Provide guidance to rerun the coders.".into(),
                "qa",
                "stage-update",
            );
            session.stage_mut("review").status = StageStatus::Awaiting;
            session.stage_pointer = "review".into();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

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
            "sess-timeline",
            "run-timeline",
        )
        .with_retry(RetryPolicy::none())
    }

    fn session_id(snapshot: &Value) -> String {
        snapshot["session_id"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn create_runs_coders_and_awaits_review() {
        let completer = Arc::new(ScriptedCompleter::new(["fn add(a: i32, b: i32) -> i32 { a + b }"]));
        let controller = SessionController::new(3);
        let ctx = context(completer);

        let snapshot = controller.create(&ctx, "add two numbers").await.unwrap();
        assert_eq!(snapshot["stage"], "review");
        assert_eq!(snapshot["timeline"][0]["status"], "completed");
        assert_eq!(snapshot["timeline"][1]["status"], "awaiting");
        assert!(snapshot["state"]["proposed_code"]
            .as_str()
            .unwrap()
            .contains("fn add"));
    }

    #[tokio::test]
    async fn approve_then_tests_then_qa_completes() {
        let completer = Arc::new(ScriptedCompleter::new([
            "fn add(a: i32, b: i32) -> i32 { a + b }",
            r#"{"passed": true, "output": "1 passed"}"#,
            r#"{"passed": true, "output": "PASS"}"#,
        ]));
        let controller = SessionController::new(3);
        let ctx = context(completer);

        let snapshot = controller.create(&ctx, "add two numbers").await.unwrap();
        let id = session_id(&snapshot);

        let snapshot = controller
            .apply_feedback(&ctx, &id, "approve", None)
            .await
            .unwrap();
        assert_eq!(snapshot["stage"], "testing");

        let snapshot = controller.advance(&ctx, &id, "run_tests").await.unwrap();
        assert_eq!(snapshot["stage"], "qa");

        let snapshot = controller.advance(&ctx, &id, "send_to_qa").await.unwrap();
        assert_eq!(snapshot["stage"], "complete");
        assert_eq!(snapshot["state"]["status"], "completed");
    }

    #[tokio::test]
    async fn revise_accumulates_feedback_into_the_task() {
        let completer = Arc::new(ScriptedCompleter::new([
            "draft one",
            "draft two with docs",
        ]));
        let controller = SessionController::new(3);
        let ctx = context(completer.clone());

        let snapshot = controller.create(&ctx, "write a widget").await.unwrap();
        let id = session_id(&snapshot);

        let snapshot = controller
            .apply_feedback(&ctx, &id, "revise", Some("add documentation"))
            .await
            .unwrap();
        assert_eq!(snapshot["stage"], "review");
        assert_eq!(snapshot["instructions"][0], "add documentation");

        // The revision prompt carried the human feedback.
        let prompts = completer.seen_prompts();
        assert!(prompts[1].1.contains("add documentation"));
    }

    #[tokio::test]
    async fn failed_tests_send_the_session_back_to_review() {
        let completer = Arc::new(ScriptedCompleter::new([
            "buggy code",
            r#"{"passed": false, "output": "AssertionError"}"#,
        ]));
        let controller = SessionController::new(3);
        let ctx = context(completer);

        let snapshot = controller.create(&ctx, "task").await.unwrap();
        let id = session_id(&snapshot);
        controller
            .apply_feedback(&ctx, &id, "approve", None)
            .await
            .unwrap();

        let snapshot = controller.advance(&ctx, &id, "run_tests").await.unwrap();
        assert_eq!(snapshot["stage"], "review");
        assert_eq!(snapshot["timeline"][3]["status"], "failed");
        assert_eq!(snapshot["state"]["feedback"], "AssertionError");
    }

    #[tokio::test]
    async fn mismatched_stage_pointer_is_a_conflict() {
        let completer = Arc::new(ScriptedCompleter::new(["code"]));
        let controller = SessionController::new(3);
        let ctx = context(completer);

        let snapshot = controller.create(&ctx, "task").await.unwrap();
        let id = session_id(&snapshot);

        // Session awaits review; jumping straight to tests must fail.
        let err = controller.advance(&ctx, &id, "run_tests").await.unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let err = controller.advance(&ctx, &id, "send_to_qa").await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn unknown_actions_are_invalid() {
        let completer = Arc::new(ScriptedCompleter::new(["code"]));
        let controller = SessionController::new(3);
        let ctx = context(completer);

        let snapshot = controller.create(&ctx, "task").await.unwrap();
        let id = session_id(&snapshot);

        let err = controller
            .apply_feedback(&ctx, &id, "maybe", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "input_invalid");
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let controller = SessionController::new(3);
        let ctx = context(Arc::new(ScriptedCompleter::new(Vec::<String>::new())));
        let err = controller.get("nope").unwrap_err();
        assert_eq!(err.kind(), "input_invalid");
        let err = controller
            .apply_feedback(&ctx, "nope", "approve", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "input_invalid");
    }
}
