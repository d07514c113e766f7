//! Memory route handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{decode_body, resolve_project, ApiResult, AppState};
use crate::error::Error;
use crate::memory::{CreateMemoryRequest, CreateOutcome, PatchMemoryRequest};
use crate::retrieval::SearchRequest;
use crate::store::memories::ListParams;
use crate::store::run_blocking;
use crate::store::types::{MemoryKind, Visibility};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    subject_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    #[serde(default)]
    include_deleted: bool,
    #[serde(default)]
    include_superseded: bool,
}

fn require_subject(subject_id: Option<String>) -> ApiResult<String> {
    subject_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::validation("subject_id_required", "subject_id is required").into())
}

pub async fn list_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let subject = require_subject(query.subject_id)?;

    let store = state.store.clone();
    let params = ListParams {
        limit: query.limit,
        offset: query.offset,
        include_deleted: query.include_deleted,
        include_superseded: query.include_superseded,
    };
    let memories =
        run_blocking(move || store.list_memories(&project, &subject, &params)).await?;

    let count = memories.len();
    Ok(Json(serde_json::json!({
        "memories": memories,
        "count": count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SupersededQuery {
    subject_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn superseded_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SupersededQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let subject = require_subject(query.subject_id)?;

    let store = state.store.clone();
    let memories = run_blocking(move || {
        store.list_superseded(&project, &subject, query.limit, query.offset)
    })
    .await?;

    let count = memories.len();
    Ok(Json(serde_json::json!({
        "memories": memories,
        "count": count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    subject_id: Option<String>,
    text: Option<String>,
    kind: Option<MemoryKind>,
    visibility: Option<Visibility>,
    importance: Option<i64>,
    confidence: Option<f64>,
    is_temporal: Option<bool>,
    tags: Option<Vec<String>>,
    metadata: Option<serde_json::Value>,
    source_type: Option<String>,
    id: Option<String>,
    extract_claims: Option<bool>,
    no_supersede: Option<bool>,
}

pub async fn create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let body = decode_body(body)?;

    let request = CreateMemoryRequest {
        project_id: project,
        subject_id: body.subject_id.unwrap_or_default(),
        text: body.text.unwrap_or_default(),
        kind: body.kind,
        visibility: body.visibility,
        importance: body.importance,
        confidence: body.confidence,
        is_temporal: body.is_temporal,
        tags: body.tags,
        metadata: body.metadata,
        source_type: body.source_type,
        id: body.id,
        extract_claims: body.extract_claims.unwrap_or(true),
        no_supersede: body.no_supersede.unwrap_or(false),
    };

    match state.memories.create(request).await? {
        CreateOutcome::Created {
            memory,
            superseded_ids,
        } => Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": memory.id,
                "subject_id": memory.subject_id,
                "text": memory.text,
                "kind": memory.kind,
                "created": true,
                "superseded_count": superseded_ids.len(),
                "superseded_ids": superseded_ids,
            })),
        )),
        CreateOutcome::Skipped { reason } => Ok((
            StatusCode::OK,
            Json(serde_json::json!({
                "id": null,
                "created": false,
                "skipped": true,
                "reason": reason,
            })),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    subject_id: Option<String>,
    q: Option<String>,
    limit: Option<usize>,
    min_score: Option<f64>,
    /// Cosine distance alias for min_score: `min_score = (1 − distance) × 100`.
    distance: Option<f64>,
    /// JSON-encoded array of recent conversation turns.
    context: Option<String>,
    chat_id: Option<String>,
    message_index: Option<i64>,
}

pub async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let subject = require_subject(query.subject_id)?;
    let q = query
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| Error::validation("q_required", "q is required"))?;

    let min_score = query
        .min_score
        .or_else(|| query.distance.map(|d| (1.0 - d) * 100.0))
        .unwrap_or(60.0);

    let conversation_context = query
        .context
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Vec<serde_json::Value>>(raw).ok())
        .unwrap_or_default();

    let response = state
        .retrieval
        .search(SearchRequest {
            project_id: project,
            subject_id: subject,
            q,
            limit: query.limit.unwrap_or(state.default_limit),
            min_score,
            conversation_context,
            chat_id: query.chat_id,
            message_index: query.message_index.unwrap_or(0),
        })
        .await?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ExtractBody {
    subject_id: Option<String>,
    text: Option<String>,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    learn: bool,
    #[serde(default)]
    conversation_context: Vec<serde_json::Value>,
}

pub async fn extract_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ExtractBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let body = decode_body(body)?;

    let outcome = state
        .memories
        .extract(
            &project,
            body.subject_id.as_deref().unwrap_or(""),
            body.text.as_deref().unwrap_or(""),
            &body.conversation_context,
            body.force,
            body.learn,
        )
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RecallsQuery {
    chat_id: Option<String>,
    memory_id: Option<String>,
    #[serde(default)]
    stats: bool,
    limit: Option<i64>,
}

pub async fn recalls_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecallsQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let store = state.store.clone();

    if query.stats {
        let stats = run_blocking(move || store.recall_stats(&project)).await?;
        return Ok(Json(serde_json::json!({ "stats": stats })));
    }
    if let Some(chat_id) = query.chat_id {
        let recalls = run_blocking(move || store.recalls_by_chat(&project, &chat_id)).await?;
        let count = recalls.len();
        return Ok(Json(serde_json::json!({
            "recalls": recalls,
            "count": count,
        })));
    }
    if let Some(memory_id) = query.memory_id {
        let limit = query.limit.unwrap_or(100);
        let recalls =
            run_blocking(move || store.recalls_by_memory(&project, &memory_id, limit)).await?;
        let count = recalls.len();
        return Ok(Json(serde_json::json!({
            "recalls": recalls,
            "count": count,
        })));
    }
    Err(Error::validation(
        "missing_parameter",
        "one of chat_id, memory_id, or stats=true is required",
    )
    .into())
}

pub async fn get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let memory = state.memories.get(&project, &id).await?;
    Ok(Json(memory))
}

#[derive(Debug, Deserialize)]
pub struct PatchBody {
    text: Option<String>,
    kind: Option<MemoryKind>,
    visibility: Option<Visibility>,
    importance: Option<i64>,
    confidence: Option<f64>,
    is_temporal: Option<bool>,
    tags: Option<Vec<String>>,
    metadata: Option<serde_json::Value>,
    source_type: Option<String>,
}

pub async fn patch_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<PatchBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let body = decode_body(body)?;

    let memory = state
        .memories
        .patch(
            &project,
            &id,
            PatchMemoryRequest {
                text: body.text,
                kind: body.kind,
                visibility: body.visibility,
                importance: body.importance,
                confidence: body.confidence,
                is_temporal: body.is_temporal,
                tags: body.tags,
                metadata: body.metadata,
                source_type: body.source_type,
            },
        )
        .await?;
    Ok(Json(memory))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let deleted = state.memories.delete(&project, &id).await?;
    Ok(Json(serde_json::json!({ "id": id, "deleted": deleted })))
}

pub async fn restore_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let outcome = state.memories.restore(&project, &id).await?;
    Ok(Json(outcome))
}

/// Assertion-centric view: claims sourced from a memory plus every
/// assertion row referencing it.
pub async fn memory_claims_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    // 404 before an empty-but-successful response for unknown ids
    state.memories.get(&project, &id).await?;

    let store = state.store.clone();
    let id_owned = id.clone();
    let (claims, assertions) =
        run_blocking(move || store.claims_for_memory(&project, &id_owned)).await?;

    Ok(Json(serde_json::json!({
        "memory_id": id,
        "claims": claims,
        "assertions": assertions,
    })))
}
