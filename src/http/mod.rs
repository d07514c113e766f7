//! HTTP surface — REST routes plus the SSE stream.
//!
//! All routes except `GET /health` require project context, resolved from
//! the `X-Project-Id` header and falling back to the configured default.
//! Errors map through the crate taxonomy: validation → 400, not-found →
//! 404, storage/unexpected → 500, all as `{error, message}` bodies.

pub mod claims;
pub mod memories;
pub mod sse;

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::claims::ClaimService;
use crate::error::Error;
use crate::events::EventBus;
use crate::memory::MemoryService;
use crate::retrieval::RetrievalService;
use crate::store::Store;

/// Shared application state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub memories: Arc<MemoryService>,
    pub claims: Arc<ClaimService>,
    pub retrieval: Arc<RetrievalService>,
    pub store: Store,
    pub bus: EventBus,
    pub default_project: Option<String>,
    pub default_limit: usize,
}

/// Error wrapper that renders the crate taxonomy as HTTP.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation { .. } | Error::AlreadyExists(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Storage(_) | Error::Json(_) | Error::Task(_) => {
                tracing::error!("request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Resolve the project id: `X-Project-Id` header → configured default.
pub fn resolve_project(headers: &HeaderMap, state: &AppState) -> ApiResult<String> {
    if let Some(value) = headers.get("x-project-id") {
        if let Ok(project) = value.to_str() {
            if !project.trim().is_empty() {
                return Ok(project.to_string());
            }
        }
    }
    if let Some(ref default) = state.default_project {
        return Ok(default.clone());
    }
    Err(Error::validation(
        "project_id_required",
        "send an X-Project-Id header or configure a default project",
    )
    .into())
}

/// Decode a JSON body, surfacing parse failures as `invalid_json_body`.
pub fn decode_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            Err(Error::validation("invalid_json_body", rejection.body_text()).into())
        }
    }
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/events/memories", get(sse::subscribe_handler))
        .route(
            "/api/v1/memories",
            get(memories::list_handler).post(memories::create_handler),
        )
        .route("/api/v1/memories/search", get(memories::search_handler))
        .route("/api/v1/memories/extract", post(memories::extract_handler))
        .route("/api/v1/memories/superseded", get(memories::superseded_handler))
        .route("/api/v1/memories/recalls", get(memories::recalls_handler))
        .route(
            "/api/v1/memories/{id}",
            get(memories::get_handler)
                .patch(memories::patch_handler)
                .delete(memories::delete_handler),
        )
        .route("/api/v1/memories/{id}/claims", get(memories::memory_claims_handler))
        .route("/api/v1/memories/{id}/restore", post(memories::restore_handler))
        .route("/api/v1/claims", post(claims::create_handler))
        .route("/api/v1/claims/{id}", get(claims::get_handler))
        .route("/api/v1/claims/{id}/retract", post(claims::retract_handler))
        .route(
            "/api/v1/claims/subject/{subject_id}/truth",
            get(claims::truth_handler),
        )
        .route(
            "/api/v1/claims/subject/{subject_id}/slot/{slot}",
            get(claims::slot_handler),
        )
        .route(
            "/api/v1/claims/subject/{subject_id}/slots",
            get(claims::slots_handler),
        )
        .route(
            "/api/v1/claims/subject/{subject_id}/graph",
            get(claims::graph_handler),
        )
        .route(
            "/api/v1/claims/subject/{subject_id}/history",
            get(claims::history_handler),
        )
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let bind_addr = format!("{host}:{port}");
    let app = router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "engram listening at http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
