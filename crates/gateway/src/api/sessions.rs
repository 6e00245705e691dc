//! Session-controller endpoints: create, inspect, review decisions,
//! stage advancement, and run cancellation.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use ens_domain::cancel::CancelToken;
use ens_trace::reproducible_run_id;

use crate::state::AppState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub task: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub action: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceBody {
    pub action: String,
}

fn session_context(state: &AppState, session_id: &str, step: &str) -> ens_engines::Context {
    let run_id = reproducible_run_id(session_id, step, None);
    state.context(session_id, &run_id, CancelToken::new())
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> impl IntoResponse {
    // The session id is minted by the controller; seed the context
    // with a placeholder until it exists.
    let staging = uuid::Uuid::new_v4().to_string();
    let ctx = session_context(&state, &staging, "create");
    match state.sessions.create(&ctx, &body.task).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn show(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.get(&id) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FeedbackBody>,
) -> impl IntoResponse {
    let ctx = session_context(&state, &id, "feedback");
    match state
        .sessions
        .apply_feedback(&ctx, &id, &body.action, body.comment.as_deref())
        .await
    {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn advance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AdvanceBody>,
) -> impl IntoResponse {
    let ctx = session_context(&state, &id, "advance");
    match state.sessions.advance(&ctx, &id, &body.action).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Cancel the running dispatch for a session, if any.
pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let stopped = state.cancel_map.cancel(&id);
    Json(serde_json::json!({ "stopped": stopped }))
}
