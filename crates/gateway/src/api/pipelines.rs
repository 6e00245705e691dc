//! Pipeline dispatch endpoints.
//!
//! - `POST /v1/pipeline/:name`      streams SSE events
//! - `POST /v1/pipeline/:name/wait` drains and returns one JSON object

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_core::Stream;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::dispatcher::{self, DispatchRequest};
use crate::state::AppState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct PipelineBody {
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub seed: Option<String>,
    /// Pipeline-specific extras (`github`, `jira`, ...).
    #[serde(flatten)]
    pub inputs: Map<String, Value>,
}

fn to_request(name: String, body: PipelineBody) -> DispatchRequest {
    DispatchRequest {
        pipeline: name,
        task: body.task,
        session_id: body.session_id,
        seed: body.seed,
        inputs: body.inputs,
    }
}

/// Streaming dispatch. Each engine event maps onto one SSE frame:
/// `event: <kind>` / `data: <payload>`.
pub async fn run_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<PipelineBody>,
) -> impl IntoResponse {
    if state.pipelines.get(&name).is_none() {
        return (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "pipeline not registered" })),
        )
            .into_response();
    }

    let (run_id, mut rx) = match dispatcher::dispatch(&state, to_request(name, body)) {
        Ok(launched) => launched,
        Err(e) => return error_response(e).into_response(),
    };

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, std::convert::Infallible>> + Send>> =
        Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                let done = event.is_done();
                yield Ok(Event::default().event(event.kind()).data(event.payload()));
                if done {
                    break;
                }
            }
        });

    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    if let Ok(value) = axum::http::HeaderValue::from_str(&run_id) {
        response.headers_mut().insert("x-run-id", value);
    }
    response
}

/// Non-streaming dispatch: collect every event and answer once.
pub async fn run_wait(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<PipelineBody>,
) -> impl IntoResponse {
    if state.pipelines.get(&name).is_none() {
        return (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "pipeline not registered" })),
        )
            .into_response();
    }

    let (run_id, rx) = match dispatcher::dispatch(&state, to_request(name, body)) {
        Ok(launched) => launched,
        Err(e) => return error_response(e).into_response(),
    };

    let mut collected = dispatcher::collect(rx).await;
    if let Some(obj) = collected.as_object_mut() {
        obj.insert("run_id".into(), serde_json::json!(run_id));
    }
    Json(collected).into_response()
}
