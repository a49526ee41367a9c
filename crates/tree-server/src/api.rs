//! HTTP surface of the tree server.
//!
//! - `GET /` and any unknown path: the rendered page
//! - `GET /style.css`: the stylesheet
//! - `GET /state`, `POST /state`: the annotation document
//! - `GET /tree`: a fresh scan of the project root

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use tree_core::error::SyncError;
use tree_core::SyncService;

use crate::page::BUNDLED_CSS;

/// Largest accepted `POST /state` body. Notes are free text and can grow large.
pub const STATE_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub service: Arc<SyncService>,
    /// Page rendered once at startup
    pub page: String,
    /// Served at `/style.css` instead of the bundled stylesheet
    pub stylesheet: Option<PathBuf>,
}

/// Errors returned to HTTP callers as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to load state")]
    LoadState(#[source] SyncError),

    #[error("invalid JSON")]
    InvalidJson(String),

    /// The body could not be read, e.g. it exceeds [`STATE_BODY_LIMIT`]
    #[error("{message}")]
    Body { status: StatusCode, message: String },

    #[error("failed to save state")]
    SaveState(#[source] SyncError),

    #[error("failed to build tree")]
    BuildTree(#[source] SyncError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::Body { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::InvalidJson(detail) => warn!("Rejected state body: {}", detail),
            ApiError::Body { message, .. } => warn!("Unreadable state body: {}", message),
            ApiError::LoadState(e) | ApiError::SaveState(e) | ApiError::BuildTree(e) => {
                error!("{}: {}", self, e)
            }
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(page))
        .route("/style.css", get(stylesheet))
        .route("/state", get(get_state).post(post_state))
        .route("/tree", get(get_tree))
        .fallback(page)
        .layer(DefaultBodyLimit::max(STATE_BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn page(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.page.clone())
}

async fn stylesheet(State(state): State<Arc<AppState>>) -> Response {
    let css = match &state.stylesheet {
        None => BUNDLED_CSS.to_string(),
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(css) => css,
            Err(e) => {
                warn!("Stylesheet {:?} unavailable: {}", path, e);
                return (StatusCode::NOT_FOUND, "not found").into_response();
            }
        },
    };
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], css).into_response()
}

async fn get_state(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let doc = state.service.get_state().await.map_err(ApiError::LoadState)?;
    Ok(Json(doc).into_response())
}

async fn post_state(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body.map_err(|rejection| ApiError::Body {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;
    state.service.put_state(&body).await.map_err(|e| match e {
        SyncError::MalformedInput(detail) => ApiError::InvalidJson(detail),
        other => ApiError::SaveState(other),
    })?;
    Ok(Json(json!({ "ok": true })).into_response())
}

async fn get_tree(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let tree = state.service.get_tree().await.map_err(ApiError::BuildTree)?;
    Ok(Json(tree).into_response())
}
