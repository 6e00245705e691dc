//! Knowledge-base ingestion endpoints.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use ens_domain::error::Error;
use ens_domain::state::{Evidence, EvidenceMeta};
use ens_memory::vector::chunk_text;

use crate::state::AppState;

use super::error_response;

const CHUNK_SIZE: usize = 1200;
const CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IngestUrlBody {
    pub url: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Chunk a document and add it to the shared index. Returns the number
/// of chunks indexed.
pub(crate) fn index_document(
    state: &AppState,
    doc_id: &str,
    text: &str,
    uri: Option<String>,
    title: Option<String>,
    tags: Vec<String>,
) -> Result<usize, Error> {
    let chunks: Vec<Evidence> = chunk_text(text, CHUNK_SIZE, CHUNK_OVERLAP)
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Evidence {
            doc_id: doc_id.to_owned(),
            chunk_id: i.to_string(),
            text: chunk,
            meta: EvidenceMeta {
                uri: uri.clone(),
                title: title.clone(),
                tags: tags.clone(),
            },
        })
        .collect();
    let count = chunks.len();
    state.index.add(chunks)?;
    Ok(count)
}

pub async fn ingest_text(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> impl IntoResponse {
    if body.text.trim().is_empty() {
        return error_response(Error::InputInvalid("text required".into())).into_response();
    }
    let doc_id = body
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match index_document(&state, &doc_id, &body.text, None, body.title, body.tags) {
        Ok(chunks) => Json(serde_json::json!({ "ok": true, "id": doc_id, "chunks": chunks }))
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn ingest_url(
    State(state): State<AppState>,
    Json(body): Json<IngestUrlBody>,
) -> impl IntoResponse {
    let url = body.url.trim();
    if url.is_empty() {
        return error_response(Error::InputInvalid("url required".into())).into_response();
    }
    let Some(fetcher) = &state.fetcher else {
        return error_response(Error::DependencyUnavailable(
            "no fetcher configured".into(),
        ))
        .into_response();
    };

    let text = match fetcher.fetch(url).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            return error_response(Error::InputInvalid("no text extracted".into()))
                .into_response()
        }
        Err(e) => return error_response(e).into_response(),
    };

    let doc_id = body.id.unwrap_or_else(|| url.to_owned());
    match index_document(
        &state,
        &doc_id,
        &text,
        Some(url.to_owned()),
        body.title,
        body.tags,
    ) {
        Ok(chunks) => Json(serde_json::json!({ "ok": true, "id": doc_id, "chunks": chunks }))
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}
