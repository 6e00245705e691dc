//! HTTP surface: pipeline dispatch (streaming and non-streaming),
//! session control, KB ingestion, and health.

pub mod ingest;
pub mod pipelines;
pub mod sessions;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use ens_domain::error::Error;

use crate::state::AppState;

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/pipeline/:name", post(pipelines::run_stream))
        .route("/v1/pipeline/:name/wait", post(pipelines::run_wait))
        .route("/v1/sessions", post(sessions::create))
        .route("/v1/sessions/:id", get(sessions::show))
        .route("/v1/sessions/:id/feedback", post(sessions::feedback))
        .route("/v1/sessions/:id/advance", post(sessions::advance))
        .route("/v1/sessions/:id/stop", post(sessions::stop))
        .route("/v1/ingest", post(ingest::ingest_text))
        .route("/v1/ingest_url", post(ingest::ingest_url))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "ok": true,
        "pipelines": state.pipelines.names(),
        "indexed_chunks": state.index.len(),
        "journal_persisted": state.journal.persists(),
    }))
}

/// Map an [`Error`] to an HTTP response.
pub(crate) fn error_response(error: Error) -> (axum::http::StatusCode, axum::Json<serde_json::Value>) {
    use axum::http::StatusCode;
    let status = match &error {
        Error::InputInvalid(_) => StatusCode::BAD_REQUEST,
        Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        axum::Json(serde_json::json!({
            "error": error.to_string(),
            "error_kind": error.kind(),
        })),
    )
}
