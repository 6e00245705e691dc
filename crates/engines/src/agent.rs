//! The agent contract and the concrete coding-pipeline agents.

use serde::Deserialize;

use ens_domain::error::Result;
use ens_domain::state::State;
use ens_providers::CompleteOptions;

use crate::context::Context;
use crate::structured::parse_loose;

/// A unit of work: a name plus `run(state) -> state`.
///
/// Agents communicate outcomes through state flags (`tests_passed`,
/// `qa_passed`, ...) rather than errors; an `Err` from `run` means the
/// agent itself could not execute and is handled at the engine
/// boundary.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: &Context, state: State) -> Result<State>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CODER_SYSTEM: &str =
    "You are a careful software engineer. Return only code, no prose and no fences.";

/// Drafts or revises the proposed implementation.
pub struct CoderAgent {
    name: String,
}

impl CoderAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl Agent for CoderAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &Context, mut state: State) -> Result<State> {
        let task = state.task.clone().unwrap_or_default();
        let feedback = state
            .feedback
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .map(|f| format!("\n\nPrior feedback to address:\n{f}"))
            .unwrap_or_default();

        let existing = state
            .proposed_code
            .as_deref()
            .filter(|c| !c.trim().is_empty());
        let user = match existing {
            // A coder that sees existing code revises it instead of
            // drafting from scratch.
            Some(code) => format!(
                "Improve the following code to better accomplish the task.\n\
                 Task: {task}{feedback}\nCode:\n{code}"
            ),
            None => format!(
                "Write a single function solving the following task. Return only code.\n\
                 {task}{feedback}"
            ),
        };

        let content = ctx
            .complete(&self.name, CODER_SYSTEM, &user, &CompleteOptions::default())
            .await?;
        state.proposed_code = Some(content);
        Ok(state)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Formatter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalizes the proposed code in a scratch workspace.
///
/// Best-effort by contract: the pipeline swallows formatter failures.
pub struct FormatterAgent {
    name: String,
}

impl FormatterAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

fn normalize_source(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut blank_run = 0usize;
    for line in code.replace("\r\n", "\n").lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(trimmed);
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

#[async_trait::async_trait]
impl Agent for FormatterAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &Context, mut state: State) -> Result<State> {
        let Some(code) = state.proposed_code.clone() else {
            return Ok(state);
        };
        if code.trim().is_empty() {
            return Ok(state);
        }

        // Round-trip through a scratch workspace; the directory is
        // removed on every exit path, including errors.
        let workspace = tempfile::tempdir()?;
        let path = workspace.path().join("solution.txt");
        std::fs::write(&path, normalize_source(&code))?;
        state.proposed_code = Some(std::fs::read_to_string(&path)?);
        Ok(state)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tester
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const TESTER_SYSTEM: &str = "You are a rigorous test engineer. Judge whether the \
implementation satisfies the task. Exercise edge cases mentally. Return ONLY JSON: \
{\"passed\": true|false, \"output\": \"short test report\"}";

#[derive(Deserialize)]
struct Verdict {
    #[serde(default)]
    passed: bool,
    #[serde(default)]
    output: String,
}

/// Evaluates the proposed code and records `tests_passed`/`test_output`.
pub struct TesterAgent {
    name: String,
}

impl TesterAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl Agent for TesterAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &Context, mut state: State) -> Result<State> {
        let task = state.task.clone().unwrap_or_default();
        let code = state.proposed_code.clone().unwrap_or_default();
        let user = format!("Task:\n{task}\n\nImplementation:\n{code}");

        let raw = ctx
            .complete(&self.name, TESTER_SYSTEM, &user, &CompleteOptions::json())
            .await?;

        // Malformed verdicts count as a failure with the raw text as
        // the report, so the loop gets actionable feedback either way.
        let verdict = parse_loose::<Verdict>(&raw).unwrap_or(Verdict {
            passed: false,
            output: raw,
        });
        state.tests_passed = Some(verdict.passed);
        state.test_output = Some(verdict.output);
        Ok(state)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reviewer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const REVIEWER_SYSTEM: &str = "You are a QA reviewer. Check the implementation for \
correctness, style, and fit to the task requirements. Return ONLY JSON: \
{\"passed\": true|false, \"output\": \"review summary\"}";

/// Runs the QA review and records `qa_passed`/`qa_output`.
pub struct ReviewerAgent {
    name: String,
}

impl ReviewerAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl Agent for ReviewerAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &Context, mut state: State) -> Result<State> {
        let task = state.task.clone().unwrap_or_default();
        let code = state.proposed_code.clone().unwrap_or_default();
        let tests = state.test_output.clone().unwrap_or_default();
        let user = format!("Task:\n{task}\n\nImplementation:\n{code}\n\nTest report:\n{tests}");

        let raw = ctx
            .complete(&self.name, REVIEWER_SYSTEM, &user, &CompleteOptions::json())
            .await?;

        let verdict = parse_loose::<Verdict>(&raw).unwrap_or(Verdict {
            passed: false,
            output: raw,
        });
        state.qa_passed = Some(verdict.passed);
        state.qa_output = Some(verdict.output);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_whitespace() {
        let normalized = normalize_source("fn x() {}   \n\n\n\n\nlet y = 1;\t\n");
        assert_eq!(normalized, "fn x() {}\n\n\nlet y = 1;\n");
    }

    #[test]
    fn normalize_ends_with_single_newline() {
        assert_eq!(normalize_source("code"), "code\n");
        assert_eq!(normalize_source("code\n\n\n"), "code\n");
    }
}
