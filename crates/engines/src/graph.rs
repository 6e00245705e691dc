//! The reasoning graph: a plan → decide → act → tool → reflect →
//! finalize state machine over the shared [`State`].
//!
//! Termination is enforced two ways: the `done` flag is monotonic (once
//! set, routing can only reach `finalize`), and a node-visit budget
//! caps runaway loops. Every appended assistant message is emitted to
//! the consumer as a `token` event the moment it lands in state.

use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;

use ens_domain::error::{Error, Result};
use ens_domain::event::EngineEvent;
use ens_domain::state::{Message, NextAction, RunStatus, State, ToolCall};
use ens_providers::CompleteOptions;

use crate::context::Context;
use crate::structured::parse_loose;

const GRAPH_SYSTEM: &str = "You are a diligent research assistant.\n\
- Think in steps and keep internal notes concise.\n\
- Prefer trustworthy sources and keep a running list of citation URLs.\n\
- When enough evidence is gathered, synthesize a compact briefing with bullets and explicit citations.\n\
- NEVER fabricate URLs or facts.";

const REFLECT_SYSTEM: &str = "If enough information exists, write BRIEFING with bullet \
points and include citations as URLs at the end. Otherwise propose NEXT:<action>.";

/// The literal prefix that marks a reflect output as terminal.
const BRIEFING_PREFIX: &str = "BRIEFING";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Plan,
    Decide,
    Act,
    Tool,
    Reflect,
    Finalize,
}

impl Node {
    fn name(&self) -> &'static str {
        match self {
            Node::Plan => "plan",
            Node::Decide => "decide",
            Node::Act => "act",
            Node::Tool => "tool",
            Node::Reflect => "reflect",
            Node::Finalize => "finalize",
        }
    }
}

pub struct ReasoningGraph;

impl ReasoningGraph {
    /// Run the graph for one user message, emitting `token` events as
    /// assistant messages appear. The terminal `done` event is the
    /// dispatcher's responsibility.
    pub async fn run(
        ctx: &Context,
        user_msg: &str,
        events: &mpsc::Sender<EngineEvent>,
    ) -> Result<State> {
        if user_msg.trim().is_empty() {
            return Err(Error::InputInvalid("empty message".into()));
        }

        ctx.history.append(&ctx.session_id, "user", user_msg)?;

        let mut state = State::default();
        state.session_id = Some(ctx.session_id.clone());
        state.push_message(Message::user(user_msg));

        let mut node = Node::Plan;
        let mut visits: u32 = 0;
        let mut call_seq: u32 = 0;
        ctx.trace_transition("start", node.name())?;

        loop {
            ctx.check_cancelled()?;
            visits += 1;
            if visits > ctx.limits.graph_step_budget {
                tracing::warn!(
                    budget = ctx.limits.graph_step_budget,
                    "node-visit budget exhausted, forcing termination"
                );
                state.mark_done(RunStatus::Failed);
                state.reason = Some("step budget exhausted".into());
                break;
            }

            let started = Instant::now();
            ctx.trace_node_enter(node.name())?;
            let step = match node {
                Node::Plan => Self::plan(ctx, &mut state, events).await,
                Node::Decide => Self::decide(ctx, &mut state).await,
                Node::Act => Self::act(ctx, &mut state, events, &mut call_seq).await,
                Node::Tool => Self::tool(ctx, &mut state).await,
                Node::Reflect => Self::reflect(ctx, &mut state, events).await,
                Node::Finalize => {
                    if state.status != Some(RunStatus::Failed) {
                        state.mark_done(RunStatus::Completed);
                    }
                    Ok(())
                }
            };
            ctx.trace_node_exit(node.name(), started)?;
            step?;

            if node == Node::Finalize {
                break;
            }

            let next = match node {
                Node::Plan => Node::Decide,
                Node::Decide => match state.next_action {
                    Some(NextAction::Finalize) => Node::Finalize,
                    Some(_) => Node::Act,
                    None => Node::Reflect,
                },
                Node::Act => Node::Tool,
                Node::Tool => Node::Reflect,
                Node::Reflect => {
                    if state.done {
                        Node::Finalize
                    } else {
                        Node::Decide
                    }
                }
                Node::Finalize => unreachable!("finalize breaks the loop"),
            };
            ctx.trace_transition(node.name(), next.name())?;
            node = next;
        }

        if let Some(message) = state.last_assistant() {
            ctx.history
                .append(&ctx.session_id, "assistant", &message.content)?;
        }
        Ok(state)
    }

    async fn emit(events: &mpsc::Sender<EngineEvent>, event: EngineEvent) -> Result<()> {
        // A closed channel means the consumer is gone; stop producing.
        events.send(event).await.map_err(|_| Error::Cancelled)
    }

    // ── plan ─────────────────────────────────────────────────────────

    async fn plan(
        ctx: &Context,
        state: &mut State,
        events: &mpsc::Sender<EngineEvent>,
    ) -> Result<()> {
        let user_text = state
            .messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        // KB context is best-effort; an empty or failing index just
        // yields an uninformed plan.
        let kb_hits = ctx.index.search(&user_text, 5).unwrap_or_default();
        let kb_context = if kb_hits.is_empty() {
            "None".to_owned()
        } else {
            kb_hits
                .iter()
                .map(|h| format!("- {}", h.text.chars().take(500).collect::<String>()))
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let user = format!(
            "Internal knowledge that may be relevant:\n{kb_context}\n\n\
             User request:\n{user_text}\n\n\
             Produce a 3-6 step action plan. Identify tools to use. Do not execute."
        );
        let plan = ctx
            .complete("plan", GRAPH_SYSTEM, &user, &CompleteOptions::default())
            .await?;

        let message = format!("Plan:\n{plan}");
        state.push_message(Message::assistant(&message));
        Self::emit(events, EngineEvent::token(message)).await?;
        state.plan = Some(plan);
        Ok(())
    }

    // ── decide ───────────────────────────────────────────────────────

    async fn decide(ctx: &Context, state: &mut State) -> Result<()> {
        let recent = state
            .messages
            .iter()
            .rev()
            .take(6)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");

        let user = format!(
            "Plan:\n{}\n\nRecent:\n{recent}\n\n\
             Choose ONE token from: search, fetch, kb_search, calculate, write_file, draft_email, finalize.\n\
             Answer with the single token only.",
            state.plan.as_deref().unwrap_or(""),
        );
        let raw = ctx
            .complete(
                "decide",
                "Decide the immediate next action based on the plan and recent messages.",
                &user,
                &CompleteOptions::default(),
            )
            .await?;

        state.next_action = NextAction::parse(&raw);
        if state.next_action.is_none() {
            tracing::debug!(raw = %raw.trim(), "decide produced no routable action");
        }
        Ok(())
    }

    // ── act ──────────────────────────────────────────────────────────

    async fn act(
        ctx: &Context,
        state: &mut State,
        events: &mpsc::Sender<EngineEvent>,
        call_seq: &mut u32,
    ) -> Result<()> {
        let Some(tool_name) = state.next_action.and_then(|a| a.tool_name()) else {
            // Unknown or terminal action: note it and let routing fall
            // through the tool node into reflect.
            let message = "Reflecting on gathered info...".to_owned();
            state.push_message(Message::assistant(&message));
            Self::emit(events, EngineEvent::token(message)).await?;
            return Ok(());
        };

        let schema = ctx
            .tools
            .get(tool_name)
            .map(|t| t.definition().parameters)
            .unwrap_or_else(|| Value::Object(Default::default()));
        let user_text = state
            .messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let user = format!(
            "Tool: {tool_name}\nArguments schema:\n{schema}\n\nPlan:\n{}\n\n\
             User request:\n{user_text}",
            state.plan.as_deref().unwrap_or(""),
        );
        let raw = ctx
            .complete(
                "act",
                "You MUST prepare exactly one tool call matching the requested action. \
                 Return ONLY a JSON object of arguments for the tool.",
                &user,
                &CompleteOptions::json(),
            )
            .await?;

        let arguments = parse_loose::<Value>(&raw)
            .filter(Value::is_object)
            .unwrap_or_else(|| {
                tracing::warn!(tool = tool_name, "tool arguments were not a JSON object, defaulting to empty");
                Value::Object(Default::default())
            });

        *call_seq += 1;
        let call = ToolCall {
            id: format!("call-{call_seq}"),
            name: tool_name.to_owned(),
            arguments,
        };
        let message = format!("Calling {tool_name}");
        state.push_message(Message::assistant_with_call(&message, call));
        Self::emit(events, EngineEvent::token(message)).await?;
        Ok(())
    }

    // ── tool ─────────────────────────────────────────────────────────

    async fn tool(ctx: &Context, state: &mut State) -> Result<()> {
        let Some(call) = state
            .last_assistant()
            .and_then(|m| m.tool_calls.first())
            .cloned()
        else {
            return Ok(());
        };

        let (content, is_error) = ctx.dispatch_tool(&call).await?;
        if is_error {
            tracing::warn!(tool = %call.name, "tool returned an error result");
        }
        state.push_message(Message::tool_result(call.name, content));
        Ok(())
    }

    // ── reflect ──────────────────────────────────────────────────────

    async fn reflect(
        ctx: &Context,
        state: &mut State,
        events: &mpsc::Sender<EngineEvent>,
    ) -> Result<()> {
        let notes: String = state
            .messages
            .iter()
            .filter(|m| m.kind == ens_domain::state::MessageKind::Assistant || m.kind == ens_domain::state::MessageKind::Tool)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .chars()
            .take(6000)
            .collect();

        let raw = ctx
            .complete(
                "reflect",
                REFLECT_SYSTEM,
                &format!("Notes so far:\n{notes}"),
                &CompleteOptions::default(),
            )
            .await?;
        let text = raw.trim().to_owned();

        if text.starts_with(BRIEFING_PREFIX) {
            state.push_message(Message::assistant(&text));
            Self::emit(events, EngineEvent::token(text)).await?;
            state.done = true;
        } else {
            // `NEXT:<action>`: everything after the first colon.
            let action_token = text.split_once(':').map(|(_, rest)| rest).unwrap_or(&text);
            state.next_action = NextAction::parse(action_token);
        }
        Ok(())
    }
}
