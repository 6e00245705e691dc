//! The retrieval + synthesis loop.
//!
//! Strictly serial for determinism: intent → plan → per-sub-goal
//! retrieval → dedup → writer → critic → one follow-up round → PII
//! guardrails. Dedup is stable (first occurrence wins) and the final
//! evidence list never contains two entries with the same identity.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::json;

use ens_domain::error::{Error, Result};
use ens_domain::state::{Evidence, EvidenceMeta, SubGoal};
use ens_providers::CompleteOptions;

use crate::context::Context;
use crate::guardrails::redact_pii;
use crate::structured::parse_loose;

// ── Prompts ──────────────────────────────────────────────────────────

const INTENT_SYSTEM: &str = r#"You classify the user's request.
Return ONLY valid minified JSON with keys:
{"intents":["answer|summarize|troubleshoot|plan|code|search_only|tool_only"],
 "safety":[],
 "urgency":"low|medium|high",
 "notes":"short note"}"#;

const PLAN_SYSTEM: &str = r#"Decompose the task into ordered sub-goals.
Reply ONLY valid minified JSON list. Each item must be:
{"id":"s1","goal":"...","sources":["vector","web"],
 "done_test":"what must be proven or retrieved"}"#;

const RETRIEVAL_PLAN_SYSTEM: &str = r#"Given a sub-goal, write 3-8 diverse search queries.
Return ONLY JSON: {"queries":["..."], "k": 8}"#;

const WRITER_SYSTEM: &str = r#"You are a grounded writer.
Only use the provided evidence array.
If evidence is insufficient, say so and list what's missing.
Cite like [#1], [#2] where #N maps to the evidence index in the provided array.
NEVER invent URLs or facts.

Return ONLY JSON:
{"status":"ok"|"needs_more",
 "draft":"final answer or partial",
 "missing":["missing items if any"]}"#;

const CRITIC_SYSTEM: &str = r#"Critique the draft vs provided evidence.
Find unsupported claims, contradictions, or missing coverage.
Return ONLY JSON:
{"ok": true|false,
 "issues": ["..."],
 "followup_queries": ["short, targeted queries to fill gaps"]}"#;

// ── Structured outputs ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IntentReport {
    #[serde(default)]
    intents: Vec<String>,
    #[serde(default)]
    urgency: String,
    #[serde(default)]
    #[allow(dead_code)]
    safety: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    notes: String,
}

impl Default for IntentReport {
    fn default() -> Self {
        Self {
            intents: vec!["answer".into()],
            urgency: "low".into(),
            safety: Vec::new(),
            notes: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RetrievalPlan {
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    k: i64,
}

#[derive(Debug, Deserialize)]
struct WriterDraft {
    #[serde(default)]
    status: String,
    #[serde(default)]
    draft: String,
    #[serde(default)]
    missing: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CriticReport {
    #[serde(default = "default_true")]
    ok: bool,
    #[serde(default)]
    #[allow(dead_code)]
    issues: Vec<String>,
    #[serde(default)]
    followup_queries: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Final output of a retrieval run.
#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer: String,
    pub citations: Vec<Evidence>,
}

// ── Dedup ────────────────────────────────────────────────────────────

/// Stable dedup by evidence identity, capped at `max_len`. First
/// occurrence wins.
fn dedupe_evidence(evidence: Vec<Evidence>, max_len: usize) -> Vec<Evidence> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::new();
    for item in evidence {
        let (doc, chunk) = item.identity();
        let key = (doc.to_owned(), chunk.to_owned());
        if seen.insert(key) {
            out.push(item);
            if out.len() >= max_len {
                break;
            }
        }
    }
    out
}

// ── Orchestrator ─────────────────────────────────────────────────────

pub struct RetrievalOrchestrator;

impl RetrievalOrchestrator {
    pub async fn answer(ctx: &Context, user_msg: &str) -> Result<RagAnswer> {
        if user_msg.trim().is_empty() {
            return Err(Error::InputInvalid("empty query".into()));
        }

        ctx.history.append(&ctx.session_id, "user", user_msg)?;

        // 1. Intent.
        let intent = Self::classify_intent(ctx, user_msg).await?;
        // 2. Plan.
        let plan = Self::plan_subgoals(ctx, user_msg, &intent).await?;

        // 3. Per-sub-goal retrieval. A vector-index failure aborts its
        //    sub-goal only; the others proceed.
        let mut all_evidence: Vec<Evidence> = Vec::new();
        for subgoal in &plan {
            ctx.check_cancelled()?;
            match Self::retrieve_subgoal(ctx, subgoal).await {
                Ok(local) => all_evidence.extend(local),
                Err(e) => {
                    tracing::warn!(subgoal = %subgoal.id, error = %e, "sub-goal retrieval aborted");
                }
            }
        }

        // 4. Global dedup.
        let mut evidence = dedupe_evidence(all_evidence, 50);

        // 5. Writer.
        let mut draft = Self::write(ctx, user_msg, &evidence).await?;

        // 6. One follow-up round: the writer's own missing list wins,
        //    otherwise a critic pass proposes queries.
        let followups: Vec<String> = if draft.status != "ok" && !draft.missing.is_empty() {
            draft.missing.iter().take(4).cloned().collect()
        } else if draft.status == "ok" {
            let critic = Self::critique(ctx, &draft.draft, &evidence).await?;
            if critic.ok {
                Vec::new()
            } else {
                critic.followup_queries.into_iter().take(4).collect()
            }
        } else {
            Vec::new()
        };

        if !followups.is_empty() {
            for query in &followups {
                ctx.check_cancelled()?;
                match ctx.index.search(query, 4) {
                    Ok(hits) => evidence.extend(hits),
                    Err(e) => {
                        tracing::warn!(query = %query, error = %e, "follow-up vector search failed");
                    }
                }
                evidence.extend(Self::retrieve_web(ctx, query, 4).await);
            }
            evidence = dedupe_evidence(evidence, 60);
            draft = Self::write(ctx, user_msg, &evidence).await?;
        }

        // 7. Guardrails.
        let answer = redact_pii(&draft.draft);
        ctx.history.append(&ctx.session_id, "assistant", &answer)?;

        Ok(RagAnswer {
            answer,
            citations: evidence,
        })
    }

    // ── Stages ───────────────────────────────────────────────────────

    async fn classify_intent(ctx: &Context, user_msg: &str) -> Result<IntentReport> {
        let raw = ctx
            .complete(
                "intent",
                INTENT_SYSTEM,
                user_msg,
                &CompleteOptions::json().with_temperature(0.1).with_max_tokens(256),
            )
            .await?;
        Ok(parse_loose::<IntentReport>(&raw).unwrap_or_else(|| {
            tracing::debug!("intent output unparseable, using default");
            IntentReport::default()
        }))
    }

    async fn plan_subgoals(
        ctx: &Context,
        user_msg: &str,
        intent: &IntentReport,
    ) -> Result<Vec<SubGoal>> {
        let user = format!(
            "User: {user_msg}\nIntent: {}",
            json!({ "intents": intent.intents, "urgency": intent.urgency }),
        );
        let raw = ctx
            .complete(
                "plan",
                PLAN_SYSTEM,
                &user,
                &CompleteOptions::json().with_max_tokens(512),
            )
            .await?;

        let fallback = || {
            vec![SubGoal {
                id: "s1".into(),
                goal: user_msg.to_owned(),
                sources: vec![
                    ens_domain::state::SourceKind::Vector,
                    ens_domain::state::SourceKind::Web,
                ],
                done_test: "enough evidence to answer".into(),
            }]
        };
        let plan = parse_loose::<Vec<SubGoal>>(&raw).unwrap_or_else(fallback);
        Ok(if plan.is_empty() { fallback() } else { plan })
    }

    async fn plan_retrieval(ctx: &Context, subgoal: &SubGoal) -> Result<(Vec<String>, usize)> {
        let raw = ctx
            .complete(
                "retrieval_plan",
                RETRIEVAL_PLAN_SYSTEM,
                &subgoal.goal,
                &CompleteOptions::json().with_max_tokens(256),
            )
            .await?;

        let parsed = parse_loose::<RetrievalPlan>(&raw).unwrap_or(RetrievalPlan {
            queries: Vec::new(),
            k: 6,
        });
        let mut queries: Vec<String> = parsed
            .queries
            .into_iter()
            .filter(|q| !q.trim().is_empty())
            .take(8)
            .collect();
        if queries.is_empty() {
            queries.push(subgoal.goal.clone());
        }
        let k = parsed.k.clamp(4, 12) as usize;
        Ok((queries, k))
    }

    async fn retrieve_subgoal(ctx: &Context, subgoal: &SubGoal) -> Result<Vec<Evidence>> {
        let (queries, k) = Self::plan_retrieval(ctx, subgoal).await?;

        let mut local: Vec<Evidence> = Vec::new();
        for query in &queries {
            ctx.check_cancelled()?;

            // Vector channel: errors are fatal for the sub-goal.
            let vector_k = (k / 2).max(2);
            local.extend(ctx.index.search(query, vector_k)?);

            // Web channel, when configured.
            if ctx.searcher.is_some() {
                let web_k = k.saturating_sub(vector_k).max(2);
                local.extend(Self::retrieve_web(ctx, query, web_k).await);
            }
        }

        Ok(dedupe_evidence(local, 20))
    }

    /// Web retrieval for one query: search, fetch each hit, fall back
    /// to the snippet when the fetch fails, truncate to the evidence
    /// cap. Errors here never abort the run.
    async fn retrieve_web(ctx: &Context, query: &str, k: usize) -> Vec<Evidence> {
        let Some(searcher) = &ctx.searcher else {
            return Vec::new();
        };
        let hits = match searcher.search(query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(query, error = %e, "web search failed");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for hit in hits {
            let text = match &ctx.fetcher {
                Some(fetcher) => match fetcher.fetch(&hit.url).await {
                    Ok(text) => text,
                    Err(_) => hit.snippet.clone(),
                },
                None => hit.snippet.clone(),
            };
            out.push(Evidence {
                doc_id: hit.url.clone(),
                chunk_id: "0".into(),
                text: text.chars().take(2000).collect(),
                meta: EvidenceMeta {
                    uri: Some(hit.url),
                    title: (!hit.title.is_empty()).then_some(hit.title),
                    tags: Vec::new(),
                },
            });
        }
        out
    }

    async fn write(ctx: &Context, question: &str, evidence: &[Evidence]) -> Result<WriterDraft> {
        let rendered: Vec<serde_json::Value> = evidence
            .iter()
            .enumerate()
            .map(|(i, e)| {
                json!({
                    "id": i + 1,
                    "title": e.meta.title.clone()
                        .or_else(|| e.meta.uri.clone())
                        .unwrap_or_else(|| "local".into()),
                    "uri": e.meta.uri.clone().unwrap_or_else(|| "local".into()),
                    "text": e.text.chars().take(1500).collect::<String>(),
                })
            })
            .collect();
        let user = format!(
            "Question: {question}\nEvidence:\n{}",
            serde_json::to_string(&rendered)?,
        );
        let raw = ctx
            .complete(
                "writer",
                WRITER_SYSTEM,
                &user,
                &CompleteOptions::json().with_max_tokens(1200),
            )
            .await?;

        // A writer that failed to produce JSON still wrote *something*;
        // treat the raw text as a complete draft.
        Ok(parse_loose::<WriterDraft>(&raw).unwrap_or_else(|| WriterDraft {
            status: "ok".into(),
            draft: if raw.trim().is_empty() {
                "No answer.".into()
            } else {
                raw.trim().to_owned()
            },
            missing: Vec::new(),
        }))
    }

    async fn critique(ctx: &Context, draft: &str, evidence: &[Evidence]) -> Result<CriticReport> {
        let rendered: Vec<serde_json::Value> = evidence
            .iter()
            .take(18)
            .map(|e| {
                json!({
                    "uri": e.meta.uri.clone().unwrap_or_else(|| "local".into()),
                    "text": e.text.chars().take(1000).collect::<String>(),
                })
            })
            .collect();
        let user = format!(
            "Draft:\n{draft}\n\nEvidence:\n{}",
            serde_json::to_string(&rendered)?,
        );
        let raw = ctx
            .complete(
                "critic",
                CRITIC_SYSTEM,
                &user,
                &CompleteOptions::json().with_temperature(0.1).with_max_tokens(512),
            )
            .await?;

        Ok(parse_loose::<CriticReport>(&raw).unwrap_or(CriticReport {
            ok: true,
            issues: Vec::new(),
            followup_queries: Vec::new(),
        }))
    }
}
