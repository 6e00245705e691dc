use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ens_domain::cancel::CancelToken;
use ens_domain::error::{Error, Result};
use ens_domain::state::ToolCall;
use ens_trace::{canonical_args_hash, TraceEvent, TraceJournal, TraceKind};

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
}

/// A named, side-effecting operation invoked with structured arguments.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn invoke(&self, args: &Value) -> Result<String>;
}

/// Named tool set with uniform, journaled invocation.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Registering an existing name replaces the
    /// binding.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.write().insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.read().values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute one tool call.
    ///
    /// Journals the request/response pair (correlated by the call id
    /// plus a canonical argument hash), enforces `timeout`, and checks
    /// `cancel` before invoking. Tool failures come back as
    /// `(error_text, true)` so engines can feed them to the model;
    /// only cancellation surfaces as `Err`, in which case no
    /// `tool_request` is journaled at all.
    pub async fn dispatch(
        &self,
        journal: &TraceJournal,
        session_id: &str,
        run_id: &str,
        call: &ToolCall,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(String, bool)> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let args_hash = canonical_args_hash(&call.arguments);
        journal.append(
            TraceEvent::new(TraceKind::ToolRequest, session_id, run_id)
                .with_tool(&call.name)
                .with_metadata(json!({
                    "call_id": call.id,
                    "args_hash": args_hash,
                    "args": call.arguments,
                })),
        )?;

        let started = Instant::now();
        let (content, is_error) = match self.get(&call.name) {
            None => (format!("unknown tool: '{}'", call.name), true),
            Some(tool) => match tokio::time::timeout(timeout, tool.invoke(&call.arguments)).await {
                Err(_) => (
                    format!("tool '{}' timed out after {}s", call.name, timeout.as_secs()),
                    true,
                ),
                Ok(Ok(output)) => (output, false),
                Ok(Err(e)) => (format!("tool '{}' failed: {e}", call.name), true),
            },
        };

        journal.append(
            TraceEvent::new(TraceKind::ToolResponse, session_id, run_id)
                .with_tool(&call.name)
                .with_output(&content)
                .with_duration_ms(started.elapsed().as_millis() as u64)
                .with_metadata(json!({
                    "call_id": call.id,
                    "args_hash": args_hash,
                    "is_error": is_error,
                })),
        )?;

        Ok((content, is_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echo the input back.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }
        }

        async fn invoke(&self, args: &Value) -> Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_owned())
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".into(),
                description: "Sleeps.".into(),
                parameters: json!({ "type": "object" }),
            }
        }

        async fn invoke(&self, _args: &Value) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("done".into())
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "call-1".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn dispatch_journals_request_and_response() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let journal = TraceJournal::in_memory();

        let (content, is_error) = registry
            .dispatch(
                &journal,
                "s1",
                "r1",
                &call("echo", json!({ "text": "hi" })),
                Duration::from_secs(5),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(content, "hi");
        assert!(!is_error);

        let events = journal.read("s1");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, TraceKind::ToolRequest);
        assert_eq!(events[1].kind, TraceKind::ToolResponse);
        assert_eq!(events[0].call_id(), Some("call-1"));
        assert_eq!(events[0].args_hash(), events[1].args_hash());
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let registry = ToolRegistry::new();
        let journal = TraceJournal::in_memory();
        let (content, is_error) = registry
            .dispatch(
                &journal,
                "s1",
                "r1",
                &call("nope", json!({})),
                Duration::from_secs(5),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert!(is_error);
        assert!(content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn cancelled_dispatch_journals_nothing() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let journal = TraceJournal::in_memory();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = registry
            .dispatch(
                &journal,
                "s1",
                "r1",
                &call("echo", json!({ "text": "hi" })),
                Duration::from_secs(5),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
        assert!(journal.read("s1").is_empty());
    }

    #[tokio::test]
    async fn timeout_produces_error_response() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        let journal = TraceJournal::in_memory();

        let (content, is_error) = registry
            .dispatch(
                &journal,
                "s1",
                "r1",
                &call("slow", json!({})),
                Duration::from_millis(20),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert!(is_error);
        assert!(content.contains("timed out"));
        // The response is still journaled for the pairing invariant.
        assert_eq!(journal.read("s1").len(), 2);
    }

    #[test]
    fn register_replaces_existing_binding() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }
}
