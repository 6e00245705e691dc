use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a message in a run transcript came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
    System,
    Tool,
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A message in the conversation. Ordered append-only within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub content: String,
    /// Tool calls attached to an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Name of the tool that produced a tool-result message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::User,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Assistant,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::System,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn assistant_with_call(text: impl Into<String>, call: ToolCall) -> Self {
        Self {
            kind: MessageKind::Assistant,
            content: text.into(),
            tool_calls: vec![call],
            tool_name: None,
        }
    }

    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: Some(tool_name.into()),
        }
    }
}

/// Optional metadata carried with a piece of evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A retrieved text chunk with identity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    #[serde(default)]
    pub meta: EvidenceMeta,
}

impl Evidence {
    /// Dedup identity: `(meta.uri if set, else doc_id, chunk_id)`.
    pub fn identity(&self) -> (&str, &str) {
        let doc = self.meta.uri.as_deref().unwrap_or(&self.doc_id);
        (doc, &self.chunk_id)
    }
}

/// Which channels a retrieval sub-goal may draw evidence from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Vector,
    Web,
}

/// One sub-goal in a retrieval plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubGoal {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub sources: Vec<SourceKind>,
    /// What must be proven or retrieved for the sub-goal to count as done.
    #[serde(default)]
    pub done_test: String,
}

/// Actions the reasoning graph's decide step may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Search,
    Fetch,
    KbSearch,
    Calculate,
    WriteFile,
    DraftEmail,
    Finalize,
}

impl NextAction {
    /// Parse a single-token model answer. Tolerates surrounding noise
    /// like quotes or trailing punctuation; anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
            .to_ascii_lowercase();
        match token.as_str() {
            "search" => Some(Self::Search),
            "fetch" => Some(Self::Fetch),
            "kb_search" => Some(Self::KbSearch),
            "calculate" => Some(Self::Calculate),
            "write_file" => Some(Self::WriteFile),
            "draft_email" => Some(Self::DraftEmail),
            "finalize" => Some(Self::Finalize),
            _ => None,
        }
    }

    /// The registry tool this action maps to. `Finalize` maps to none.
    pub fn tool_name(&self) -> Option<&'static str> {
        match self {
            Self::Search => Some("web.search"),
            Self::Fetch => Some("web.fetch"),
            Self::KbSearch => Some("kb.search"),
            Self::Calculate => Some("calculator"),
            Self::WriteFile => Some("file.write"),
            Self::DraftEmail => Some("email.draft"),
            Self::Finalize => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Fetch => "fetch",
            Self::KbSearch => "kb_search",
            Self::Calculate => "calculate",
            Self::WriteFile => "write_file",
            Self::DraftEmail => "draft_email",
            Self::Finalize => "finalize",
        }
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// The shared state record threaded through every agent and node.
///
/// Reserved keys are typed optional fields; anything ad-hoc goes into
/// `extra`. A missing key is `None`, never a typed zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<NextAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Evidence>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl State {
    /// Seed state for a new run: `{task}` plus the session it runs under.
    pub fn for_task(task: impl Into<String>) -> Self {
        Self {
            task: Some(task.into()),
            ..Self::default()
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.kind == MessageKind::Assistant)
    }

    /// Set `done` and a terminal status together.
    ///
    /// `done` implies a terminal status, and is monotonic: once set it
    /// never reverts.
    pub fn mark_done(&mut self, status: RunStatus) {
        debug_assert!(status != RunStatus::Running);
        self.done = true;
        self.status = Some(status);
    }
}
