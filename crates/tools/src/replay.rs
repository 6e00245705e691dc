//! Journal-backed tools for deterministic replay.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use ens_domain::error::Result;
use ens_trace::{canonical_args_hash, TraceEvent, TraceKind};

use crate::registry::{Tool, ToolDefinition, ToolRegistry};

/// A tool that answers from recorded responses, matched by the
/// canonical hash of the incoming arguments.
pub struct ReplayTool {
    name: String,
    responses: HashMap<String, String>,
}

impl ReplayTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: HashMap::new(),
        }
    }

    pub fn record(&mut self, args_hash: impl Into<String>, output: impl Into<String>) {
        self.responses.insert(args_hash.into(), output.into());
    }

    pub fn recorded(&self) -> usize {
        self.responses.len()
    }
}

#[async_trait::async_trait]
impl Tool for ReplayTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: format!("Recorded responses for {} (replay mode).", self.name),
            parameters: json!({ "type": "object", "additionalProperties": true }),
        }
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let hash = canonical_args_hash(args);
        match self.responses.get(&hash) {
            Some(output) => Ok(output.clone()),
            None => {
                tracing::warn!(tool = %self.name, %hash, "no recorded response for replayed call");
                Ok(format!("[REPLAY: no recorded response for {}]", self.name))
            }
        }
    }
}

/// Build a registry of [`ReplayTool`]s from a recorded journal.
///
/// Requests and responses are paired by their `call_id` correlation
/// metadata; the response is then keyed by the request's argument hash
/// so a replayed call with identical arguments finds it.
pub fn replay_registry(events: &[TraceEvent]) -> ToolRegistry {
    let mut pending: HashMap<String, (String, String)> = HashMap::new(); // call_id -> (tool, args_hash)
    let mut tools: HashMap<String, ReplayTool> = HashMap::new();

    for event in events {
        match event.kind {
            TraceKind::ToolRequest => {
                if let (Some(tool), Some(call_id), Some(hash)) =
                    (event.tool.as_deref(), event.call_id(), event.args_hash())
                {
                    pending.insert(call_id.to_owned(), (tool.to_owned(), hash.to_owned()));
                }
            }
            TraceKind::ToolResponse => {
                let Some(call_id) = event.call_id() else {
                    continue;
                };
                let Some((tool_name, args_hash)) = pending.remove(call_id) else {
                    continue;
                };
                let output = event.output.clone().unwrap_or_default();
                tools
                    .entry(tool_name.clone())
                    .or_insert_with(|| ReplayTool::new(tool_name))
                    .record(args_hash, output);
            }
            _ => {}
        }
    }

    let registry = ToolRegistry::new();
    for (_, tool) in tools {
        registry.register(Arc::new(tool));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded_pair(tool: &str, call_id: &str, args: Value, output: &str) -> [TraceEvent; 2] {
        let hash = canonical_args_hash(&args);
        [
            TraceEvent::new(TraceKind::ToolRequest, "s", "r")
                .with_tool(tool)
                .with_metadata(json!({ "call_id": call_id, "args_hash": hash, "args": args })),
            TraceEvent::new(TraceKind::ToolResponse, "s", "r")
                .with_tool(tool)
                .with_output(output)
                .with_metadata(json!({ "call_id": call_id, "args_hash": hash })),
        ]
    }

    #[tokio::test]
    async fn replayed_call_returns_recorded_output() {
        let events: Vec<TraceEvent> = recorded_pair(
            "calculator",
            "call-1",
            json!({ "expression": "12*7" }),
            "84",
        )
        .into();
        let registry = replay_registry(&events);
        let tool = registry.get("calculator").unwrap();
        let out = tool.invoke(&json!({ "expression": "12*7" })).await.unwrap();
        assert_eq!(out, "84");
    }

    #[tokio::test]
    async fn unmatched_arguments_return_sentinel() {
        let events: Vec<TraceEvent> = recorded_pair(
            "calculator",
            "call-1",
            json!({ "expression": "12*7" }),
            "84",
        )
        .into();
        let registry = replay_registry(&events);
        let tool = registry.get("calculator").unwrap();
        let out = tool.invoke(&json!({ "expression": "9*9" })).await.unwrap();
        assert!(out.starts_with("[REPLAY: no recorded response"));
    }

    #[test]
    fn responses_without_matching_request_are_ignored() {
        let orphan = TraceEvent::new(TraceKind::ToolResponse, "s", "r")
            .with_tool("calculator")
            .with_output("84")
            .with_metadata(json!({ "call_id": "ghost" }));
        let registry = replay_registry(&[orphan]);
        assert!(registry.names().is_empty());
    }
}
