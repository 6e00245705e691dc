//! Append-only conversation history, keyed by session id.
//!
//! The file-backed store writes one JSON line per message to
//! `<session_id>.jsonl`. Writes within a session are serialized by the
//! store lock; different sessions are independent.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use ens_domain::error::Result;
use ens_domain::state::{Message, MessageKind};

/// History operations the engines consume.
pub trait KvHistory: Send + Sync {
    fn append(&self, session_id: &str, role: &str, content: &str) -> Result<()>;
    /// Last `limit` messages for a session, oldest first.
    fn load(&self, session_id: &str, limit: usize) -> Result<Vec<Message>>;
}

#[derive(Serialize, Deserialize)]
struct HistoryLine {
    timestamp: String,
    role: String,
    content: String,
}

fn role_to_kind(role: &str) -> MessageKind {
    match role {
        "assistant" => MessageKind::Assistant,
        "system" => MessageKind::System,
        "tool" => MessageKind::Tool,
        _ => MessageKind::User,
    }
}

fn line_to_message(line: HistoryLine) -> Message {
    match role_to_kind(&line.role) {
        MessageKind::Assistant => Message::assistant(line.content),
        MessageKind::System => Message::system(line.content),
        MessageKind::Tool => Message::tool_result("", line.content),
        MessageKind::User => Message::user(line.content),
    }
}

// ── JSONL store ──────────────────────────────────────────────────────

/// File-backed history: one JSONL file per session.
pub struct JsonlHistory {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }
}

impl KvHistory for JsonlHistory {
    fn append(&self, session_id: &str, role: &str, content: &str) -> Result<()> {
        let line = HistoryLine {
            timestamp: Utc::now().to_rfc3339(),
            role: role.to_owned(),
            content: content.to_owned(),
        };
        let mut json = serde_json::to_string(&line)?;
        json.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(session_id))?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    fn load(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut messages = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryLine>(line) {
                Ok(parsed) => messages.push(line_to_message(parsed)),
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "skipping malformed history line");
                }
            }
        }
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }
}

// ── In-memory store ──────────────────────────────────────────────────

/// Heap-backed history for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryHistory {
    sessions: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvHistory for MemoryHistory {
    fn append(&self, session_id: &str, role: &str, content: &str) -> Result<()> {
        self.sessions
            .lock()
            .entry(session_id.to_owned())
            .or_default()
            .push((role.to_owned(), content.to_owned()));
        Ok(())
    }

    fn load(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let sessions = self.sessions.lock();
        let Some(lines) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let skip = lines.len().saturating_sub(limit);
        Ok(lines[skip..]
            .iter()
            .map(|(role, content)| {
                line_to_message(HistoryLine {
                    timestamp: String::new(),
                    role: role.clone(),
                    content: content.clone(),
                })
            })
            .collect())
    }
}
