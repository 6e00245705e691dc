//! Replay identities and journal comparison.
//!
//! A replayed run must visit the same nodes, request the same tools in
//! the same order, and produce the same assistant output as the journal
//! it replays. [`compare`] checks those three sequences and reports the
//! first divergence.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::event::{TraceEvent, TraceKind};

/// Derive a reproducible run id from the seeding inputs, or a random
/// one when no seed is given.
pub fn reproducible_run_id(session_id: &str, user_message: &str, seed: Option<&str>) -> String {
    match seed {
        Some(seed) => {
            let mut hasher = Sha256::new();
            hasher.update(session_id.as_bytes());
            hasher.update(b":");
            hasher.update(user_message.as_bytes());
            hasher.update(b":");
            hasher.update(seed.as_bytes());
            hex::encode(hasher.finalize())[..12].to_string()
        }
        None => uuid::Uuid::new_v4().simple().to_string()[..12].to_string(),
    }
}

/// Content hash of canonicalized tool arguments.
///
/// `serde_json` keeps object keys sorted, so serializing the value is
/// already canonical; the hash is stable across processes.
pub fn canonical_args_hash(args: &Value) -> String {
    let canonical = serde_json::to_string(args).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Result of comparing an original journal against a replay journal.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub nodes_match: bool,
    pub tools_match: bool,
    pub outputs_match: bool,
    pub original_events: usize,
    pub replay_events: usize,
    /// Human-readable divergences, empty when the replay matched.
    pub mismatches: Vec<String>,
}

impl ReplayReport {
    pub fn is_match(&self) -> bool {
        self.nodes_match && self.tools_match && self.outputs_match
    }
}

fn node_enters(events: &[TraceEvent]) -> Vec<&str> {
    events
        .iter()
        .filter(|e| e.kind == TraceKind::NodeEnter)
        .filter_map(|e| e.node.as_deref())
        .collect()
}

fn tool_names(events: &[TraceEvent]) -> Vec<&str> {
    events
        .iter()
        .filter(|e| e.kind == TraceKind::ToolRequest)
        .filter_map(|e| e.tool.as_deref())
        .collect()
}

fn llm_outputs(events: &[TraceEvent]) -> Vec<&str> {
    events
        .iter()
        .filter(|e| e.kind == TraceKind::LlmOutput)
        .filter_map(|e| e.output.as_deref())
        .collect()
}

fn diff_note(label: &str, original: &[&str], replay: &[&str]) -> String {
    let pos = original
        .iter()
        .zip(replay.iter())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| original.len().min(replay.len()));
    format!(
        "{label} diverge at index {pos}: original has {} entries, replay has {}",
        original.len(),
        replay.len(),
    )
}

/// Compare two journals for replay equivalence.
pub fn compare(original: &[TraceEvent], replay: &[TraceEvent]) -> ReplayReport {
    let orig_nodes = node_enters(original);
    let replay_nodes = node_enters(replay);
    let orig_tools = tool_names(original);
    let replay_tools = tool_names(replay);
    let orig_outputs = llm_outputs(original);
    let replay_outputs = llm_outputs(replay);

    let nodes_match = orig_nodes == replay_nodes;
    let tools_match = orig_tools == replay_tools;
    let outputs_match = orig_outputs == replay_outputs;

    let mut mismatches = Vec::new();
    if !nodes_match {
        mismatches.push(diff_note("node_enter sequences", &orig_nodes, &replay_nodes));
    }
    if !tools_match {
        mismatches.push(diff_note("tool_request names", &orig_tools, &replay_tools));
    }
    if !outputs_match {
        mismatches.push(diff_note("llm outputs", &orig_outputs, &replay_outputs));
    }

    ReplayReport {
        nodes_match,
        tools_match,
        outputs_match,
        original_events: original.len(),
        replay_events: replay.len(),
        mismatches,
    }
}
