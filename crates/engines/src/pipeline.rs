//! The iterative coding pipeline.
//!
//! Coders draft, formatters polish, testers and reviewers gate. A
//! failing gate copies its output into `feedback` and re-enters the
//! loop so the next coding pass can revise; all-green completes the
//! run. The engine performs no I/O of its own; only agents do.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use ens_domain::error::{Error, Result};
use ens_domain::state::{RunStatus, State};

use crate::agent::Agent;
use crate::context::Context;

pub struct CodingPipeline {
    pub coders: Vec<Arc<dyn Agent>>,
    pub formatters: Vec<Arc<dyn Agent>>,
    pub testers: Vec<Arc<dyn Agent>>,
    pub reviewers: Vec<Arc<dyn Agent>>,
    pub max_iterations: u32,
}

impl CodingPipeline {
    pub fn new(
        coders: Vec<Arc<dyn Agent>>,
        formatters: Vec<Arc<dyn Agent>>,
        testers: Vec<Arc<dyn Agent>>,
        reviewers: Vec<Arc<dyn Agent>>,
        max_iterations: u32,
    ) -> Self {
        Self {
            coders,
            formatters,
            testers,
            reviewers,
            max_iterations,
        }
    }

    /// Run one agent with node-enter/exit journaling. Returns the new
    /// state, or the untouched input state plus the error.
    async fn step(
        &self,
        ctx: &Context,
        agent: &Arc<dyn Agent>,
        state: State,
    ) -> (State, Option<Error>) {
        let started = Instant::now();
        if let Err(e) = ctx.trace_node_enter(agent.name()) {
            return (state, Some(e));
        }
        let result = agent.run(ctx, state.clone()).await;
        let _ = ctx.trace_node_exit(agent.name(), started);
        match result {
            Ok(next) => (next, None),
            Err(e) => (state, Some(e)),
        }
    }

    pub async fn run(&self, ctx: &Context, task: &str) -> Result<State> {
        if task.trim().is_empty() {
            return Err(Error::InputInvalid("empty task".into()));
        }

        let mut state = State::for_task(task);
        state.session_id = Some(ctx.session_id.clone());
        state.status = Some(RunStatus::Running);

        if self.max_iterations == 0 {
            state.mark_done(RunStatus::Failed);
            state.reason = Some("no iterations".into());
            return Ok(state);
        }

        for iteration in 0..self.max_iterations {
            ctx.check_cancelled()?;
            state
                .extra
                .insert("iterations".into(), json!(iteration + 1));

            // ── Coders ───────────────────────────────────────────────
            for coder in &self.coders {
                ctx.check_cancelled()?;
                let (next, error) = self.step(ctx, coder, state).await;
                state = next;
                if let Some(e) = error {
                    if matches!(e, Error::Cancelled) {
                        return Err(e);
                    }
                    tracing::warn!(coder = coder.name(), error = %e, "coder pass failed");
                }
            }
            let no_code = state
                .proposed_code
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty();
            if no_code {
                state.mark_done(RunStatus::Failed);
                state.reason = Some("coder did not return code".into());
                return Ok(state);
            }

            // ── Formatters (best-effort, failures swallowed) ─────────
            for formatter in &self.formatters {
                let (next, error) = self.step(ctx, formatter, state).await;
                state = next;
                if let Some(e) = error {
                    tracing::warn!(formatter = formatter.name(), error = %e, "formatter skipped");
                }
            }

            // ── Testers: stop at the first failure ───────────────────
            let mut tests_ok = true;
            for tester in &self.testers {
                ctx.check_cancelled()?;
                let (next, error) = self.step(ctx, tester, state).await;
                state = next;
                if let Some(e) = error {
                    if matches!(e, Error::Cancelled) {
                        return Err(e);
                    }
                    // A tester that could not run counts as a failed
                    // stage with the error text as the report.
                    state.tests_passed = Some(false);
                    state.test_output = Some(e.to_string());
                }
                if !state.tests_passed.unwrap_or(false) {
                    tests_ok = false;
                    state.feedback = state.test_output.clone();
                    break;
                }
            }
            if !tests_ok {
                continue;
            }

            // ── Reviewers: stop at the first failure ─────────────────
            let mut reviews_ok = true;
            for reviewer in &self.reviewers {
                ctx.check_cancelled()?;
                let (next, error) = self.step(ctx, reviewer, state).await;
                state = next;
                if let Some(e) = error {
                    if matches!(e, Error::Cancelled) {
                        return Err(e);
                    }
                    state.qa_passed = Some(false);
                    state.qa_output = Some(e.to_string());
                }
                if !state.qa_passed.unwrap_or(false) {
                    reviews_ok = false;
                    state.feedback = state.qa_output.clone();
                    break;
                }
            }
            if reviews_ok {
                state.mark_done(RunStatus::Completed);
                return Ok(state);
            }
        }

        // Exhausted the iteration budget; the last feedback stays on
        // the state for the caller to surface.
        if state.status != Some(RunStatus::Completed) {
            state.mark_done(RunStatus::Failed);
            state.reason.get_or_insert_with(|| "max iterations reached".into());
        }
        Ok(state)
    }
}
