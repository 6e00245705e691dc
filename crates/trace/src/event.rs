use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a trace event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    RunStart,
    RunEnd,
    NodeEnter,
    NodeExit,
    ToolRequest,
    ToolResponse,
    LlmPrompt,
    LlmOutput,
    StateTransition,
}

/// A single journal record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts: DateTime<Utc>,
    pub kind: TraceKind,
    pub session_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl TraceEvent {
    pub fn new(kind: TraceKind, session_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            kind,
            session_id: session_id.into(),
            run_id: run_id.into(),
            node: None,
            tool: None,
            prompt: None,
            output: None,
            duration_ms: None,
            metadata: Value::Null,
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_duration_ms(mut self, millis: u64) -> Self {
        self.duration_ms = Some(millis);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Correlation id for tool request/response pairing, when present.
    pub fn call_id(&self) -> Option<&str> {
        self.metadata.get("call_id").and_then(Value::as_str)
    }

    /// Canonical argument hash for tool request/response, when present.
    pub fn args_hash(&self) -> Option<&str> {
        self.metadata.get("args_hash").and_then(Value::as_str)
    }
}
