//! Append-only per-session journals.
//!
//! Each session gets a `<session_id>.jsonl` file: one JSON object per
//! line, append-only, with an in-memory mirror so readers never observe
//! a partial record. Timestamps are clamped to be monotonically
//! non-decreasing within a session; equal timestamps keep insertion
//! order.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use ens_domain::config::TraceConfig;
use ens_domain::error::{Error, Result};

use crate::event::TraceEvent;
use crate::redact::redact_event;

#[derive(Default)]
struct SessionLog {
    events: Vec<TraceEvent>,
    last_ts: Option<DateTime<Utc>>,
}

/// Journal of trace events, keyed by session id.
pub struct TraceJournal {
    dir: Option<PathBuf>,
    max_value_chars: usize,
    sessions: RwLock<HashMap<String, SessionLog>>,
}

impl TraceJournal {
    /// Memory-only journal (tests, replay harnesses).
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            max_value_chars: 2000,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Journal persisted under `dir`, one file per session.
    pub fn with_dir(dir: &Path, max_value_chars: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            max_value_chars,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &TraceConfig) -> Result<Self> {
        match &config.dir {
            Some(dir) => Self::with_dir(dir, config.max_value_chars),
            None => Ok(Self {
                max_value_chars: config.max_value_chars,
                ..Self::in_memory()
            }),
        }
    }

    /// Append one event. Redaction and truncation are applied before
    /// anything is stored; the file write is a single `write_all` of
    /// the full line, so a reader never sees a torn record.
    pub fn append(&self, mut event: TraceEvent) -> Result<()> {
        redact_event(&mut event, self.max_value_chars);

        let mut sessions = self.sessions.write();
        let log = sessions.entry(event.session_id.clone()).or_default();
        if let Some(last) = log.last_ts {
            if event.ts < last {
                event.ts = last;
            }
        }
        log.last_ts = Some(event.ts);

        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{}.jsonl", event.session_id));
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(line.as_bytes())?;
        }

        log.events.push(event);
        Ok(())
    }

    /// All events recorded for a session, in order.
    pub fn read(&self, session_id: &str) -> Vec<TraceEvent> {
        if let Some(log) = self.sessions.read().get(session_id) {
            if !log.events.is_empty() {
                return log.events.clone();
            }
        }
        // Cold read: fall back to the on-disk file (e.g. replaying a
        // journal recorded by an earlier process).
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{session_id}.jsonl"));
            if path.exists() {
                return Self::load_file(&path).unwrap_or_default();
            }
        }
        Vec::new()
    }

    /// Parse a journal file. Malformed lines are skipped with a warn,
    /// matching the append-only-reader contract.
    pub fn load_file(path: &Path) -> Result<Vec<TraceEvent>> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut events = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TraceEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed journal line");
                }
            }
        }
        Ok(events)
    }

    /// Session ids with at least one recorded event.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Whether journal files are being persisted.
    pub fn persists(&self) -> bool {
        self.dir.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TraceKind;
    use serde_json::json;

    fn event(kind: TraceKind) -> TraceEvent {
        TraceEvent::new(kind, "s1", "r1")
    }

    #[test]
    fn append_then_read_round_trips() {
        let journal = TraceJournal::in_memory();
        journal
            .append(event(TraceKind::RunStart).with_metadata(json!({ "task": "t" })))
            .unwrap();
        journal
            .append(event(TraceKind::NodeEnter).with_node("plan"))
            .unwrap();

        let events = journal.read("s1");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, TraceKind::RunStart);
        assert_eq!(events[1].node.as_deref(), Some("plan"));
    }

    #[test]
    fn timestamps_never_decrease() {
        let journal = TraceJournal::in_memory();
        let mut early = event(TraceKind::NodeEnter);
        let mut late = event(TraceKind::NodeExit);
        late.ts = Utc::now();
        early.ts = late.ts - chrono::Duration::seconds(5);

        journal.append(late.clone()).unwrap();
        journal.append(early).unwrap();

        let events = journal.read("s1");
        assert!(events[1].ts >= events[0].ts);
    }

    #[test]
    fn secrets_are_redacted_before_write() {
        let journal = TraceJournal::in_memory();
        journal
            .append(
                event(TraceKind::ToolRequest)
                    .with_tool("web.search")
                    .with_metadata(json!({ "args": { "api_key": "sk-secret", "query": "q" } })),
            )
            .unwrap();
        let events = journal.read("s1");
        assert_eq!(events[0].metadata["args"]["api_key"], "[REDACTED]");
        assert_eq!(events[0].metadata["args"]["query"], "q");
    }

    #[test]
    fn long_outputs_are_truncated() {
        let journal = TraceJournal::in_memory();
        journal
            .append(event(TraceKind::LlmOutput).with_output("y".repeat(3000)))
            .unwrap();
        let events = journal.read("s1");
        let output = events[0].output.as_deref().unwrap();
        assert!(output.ends_with("...[TRUNCATED:3000 chars]"));
    }

    #[test]
    fn file_backed_journal_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let journal = TraceJournal::with_dir(dir.path(), 2000).unwrap();
            journal.append(event(TraceKind::RunStart)).unwrap();
            journal.append(event(TraceKind::RunEnd)).unwrap();
        }
        // Fresh journal instance reading the same directory.
        let journal = TraceJournal::with_dir(dir.path(), 2000).unwrap();
        let events = journal.read("s1");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, TraceKind::RunStart);
        assert_eq!(events[1].kind, TraceKind::RunEnd);
    }

    #[test]
    fn sessions_are_isolated() {
        let journal = TraceJournal::in_memory();
        journal.append(event(TraceKind::RunStart)).unwrap();
        journal
            .append(TraceEvent::new(TraceKind::RunStart, "s2", "r2"))
            .unwrap();
        assert_eq!(journal.read("s1").len(), 1);
        assert_eq!(journal.read("s2").len(), 1);
        assert!(journal.read("s3").is_empty());
    }
}
