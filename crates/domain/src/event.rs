use serde::Serialize;
use serde_json::{json, Value};

use crate::error::Error;

/// Events emitted by an engine run, consumed by the transport.
///
/// This is a closed union: consumers pattern-match, and adding a kind
/// is a breaking change. Exactly one `Done` is emitted per invocation;
/// it is always the final event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineEvent {
    /// Human-readable progress line.
    Log { text: String },
    /// Assistant output delta (or a whole assistant message).
    Token { text: String },
    /// Final synthesized answer text.
    Answer { text: String },
    /// JSON-encoded evidence list backing the answer.
    Sources { json: String },
    /// Structured final payload for pipelines that produce one.
    Report { payload: Value },
    /// Terminal summary. Carries at minimum `{"status": ...}`.
    Done { payload: Value },
}

impl EngineEvent {
    pub fn log(text: impl Into<String>) -> Self {
        Self::Log { text: text.into() }
    }

    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { text: text.into() }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer { text: text.into() }
    }

    pub fn sources(json: impl Into<String>) -> Self {
        Self::Sources { json: json.into() }
    }

    pub fn report(payload: Value) -> Self {
        Self::Report { payload }
    }

    /// Terminal event for a run that finished on its own terms. The
    /// summary's `status` key wins if present; otherwise `completed`.
    pub fn done_ok(mut summary: Value) -> Self {
        if let Some(obj) = summary.as_object_mut() {
            obj.entry("status").or_insert(json!("completed"));
        } else {
            summary = json!({ "status": "completed" });
        }
        Self::Done { payload: summary }
    }

    pub fn done_failed(error: &Error) -> Self {
        Self::Done {
            payload: json!({
                "status": "failed",
                "error": error.to_string(),
                "error_kind": error.kind(),
            }),
        }
    }

    pub fn done_cancelled() -> Self {
        Self::Done {
            payload: json!({ "status": "cancelled" }),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Wire event name (the SSE `event:` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Token { .. } => "token",
            Self::Answer { .. } => "answer",
            Self::Sources { .. } => "sources",
            Self::Report { .. } => "report",
            Self::Done { .. } => "done",
        }
    }

    /// Wire payload (the SSE `data:` field). JSON where structured.
    pub fn payload(&self) -> String {
        match self {
            Self::Log { text } | Self::Token { text } | Self::Answer { text } => text.clone(),
            Self::Sources { json } => json.clone(),
            Self::Report { payload } | Self::Done { payload } => payload.to_string(),
        }
    }
}
