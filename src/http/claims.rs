//! Claim route handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{decode_body, resolve_project, ApiResult, AppState};
use crate::claims::ClaimRequest;
use crate::error::Error;
use crate::store::run_blocking;
use crate::store::types::{Claim, SlotStatus};

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    subject_id: Option<String>,
    predicate: Option<String>,
    object_value: Option<String>,
    slot: Option<String>,
    claim_type: Option<String>,
    confidence: Option<f64>,
    importance: Option<f64>,
    tags: Option<Vec<String>>,
    source_memory_id: Option<String>,
    subject_entity: Option<String>,
    valid_from: Option<String>,
    valid_until: Option<String>,
    id: Option<String>,
}

pub async fn create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let body = decode_body(body)?;

    let (claim, displaced) = state
        .claims
        .create(ClaimRequest {
            claim_id: body.id,
            project_id: project,
            subject_id: body.subject_id.unwrap_or_default(),
            predicate: body.predicate.unwrap_or_default(),
            object_value: body.object_value.unwrap_or_default(),
            slot: body.slot,
            claim_type: body.claim_type,
            confidence: body.confidence,
            importance: body.importance,
            tags: body.tags,
            source_memory_id: body.source_memory_id,
            subject_entity: body.subject_entity,
            valid_from: body.valid_from,
            valid_until: body.valid_until,
            embedding: None,
        })
        .await?;

    let claim_id = claim.claim_id.clone();
    let slot = claim.slot.clone();
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "claim": claim,
            "claim_id": claim_id,
            "slot": slot,
            "displaced_claim_id": displaced,
        })),
    ))
}

#[derive(Debug, Deserialize, Default)]
pub struct RetractBody {
    reason: Option<String>,
}

pub async fn retract_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<RetractBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    // the body is optional; a missing one just means no reason
    let reason = body.ok().and_then(|Json(b)| b.reason);

    let outcome = state.claims.retract(&project, &id, reason).await?;
    Ok(Json(outcome))
}

/// Claim detail: the claim plus assertions, edges, and its supersession chain.
pub async fn get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let store = state.store.clone();
    let id_owned = id.clone();

    let detail = run_blocking(move || {
        let Some(claim) = store.get_claim(&project, &id_owned)? else {
            return Err(Error::not_found(
                "claim_not_found",
                format!("claim not found: {id_owned}"),
            ));
        };
        let assertions = store.get_claim_assertions(&project, &id_owned)?;
        let edges = store.get_claim_edges(&project, &id_owned)?;
        let chain = store.get_supersession_chain(&project, &id_owned)?;
        Ok((claim, assertions, edges, chain))
    })
    .await?;

    let (claim, assertions, edges, chain) = detail;
    Ok(Json(serde_json::json!({
        "claim": claim,
        "assertions": assertions,
        "edges": edges,
        "supersession_chain": chain,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TruthQuery {
    #[serde(default)]
    include_source: bool,
}

/// Active slots snapshot for a subject.
pub async fn truth_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
    Query(query): Query<TruthQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let store = state.store.clone();
    let subject = subject_id.clone();

    let slots = run_blocking(move || {
        let truth = store.get_current_truth(&project, &subject)?;
        let mut out = Vec::with_capacity(truth.len());
        for (slot, claim) in truth {
            let source_memory = if query.include_source {
                claim
                    .source_memory_id
                    .as_deref()
                    .and_then(|mid| store.get_memory(&project, mid).transpose())
                    .transpose()?
            } else {
                None
            };
            out.push(serde_json::json!({
                "slot": slot,
                "claim": claim,
                "source_memory": source_memory,
            }));
        }
        Ok(out)
    })
    .await?;

    Ok(Json(serde_json::json!({
        "subject_id": subject_id,
        "slots": slots,
    })))
}

/// Single-slot lookup. 404 when the slot has no active winner.
pub async fn slot_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((subject_id, slot)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let store = state.store.clone();
    let (subject, slot_owned) = (subject_id.clone(), slot.clone());

    let claim: Option<Claim> =
        run_blocking(move || store.get_current_slot(&project, &subject, &slot_owned)).await?;
    let claim = claim.ok_or_else(|| {
        Error::not_found("slot_not_found", format!("no active claim in slot: {slot}"))
    })?;

    Ok(Json(serde_json::json!({
        "subject_id": subject_id,
        "slot": slot,
        "claim": claim,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<i64>,
}

/// Slot states grouped by status (active / superseded / other).
pub async fn slots_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let store = state.store.clone();
    let subject = subject_id.clone();
    let limit = query.limit.unwrap_or(100);

    let slots = run_blocking(move || store.get_slots(&project, &subject, limit)).await?;

    let mut active = Vec::new();
    let mut superseded = Vec::new();
    let mut other = Vec::new();
    for slot in slots {
        match slot.status {
            SlotStatus::Active => active.push(slot),
            SlotStatus::Superseded => superseded.push(slot),
            SlotStatus::Retracted => other.push(slot),
        }
    }

    Ok(Json(serde_json::json!({
        "subject_id": subject_id,
        "active": active,
        "superseded": superseded,
        "other": other,
    })))
}

/// Claims + edges + edge-type histogram.
pub async fn graph_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let store = state.store.clone();
    let subject = subject_id.clone();
    let limit = query.limit.unwrap_or(100);

    let graph = run_blocking(move || store.get_claim_graph(&project, &subject, limit)).await?;

    Ok(Json(serde_json::json!({
        "subject_id": subject_id,
        "claims": graph.claims,
        "edges": graph.edges,
        "edge_counts": graph.edge_counts,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    slot: Option<String>,
    limit: Option<i64>,
}

/// Claim history grouped by slot plus the supersedes edges among them.
pub async fn history_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    let store = state.store.clone();
    let subject = subject_id.clone();
    let limit = query.limit.unwrap_or(100);
    let slot = query.slot.clone();

    let (claims, edges) = run_blocking(move || {
        store.get_claim_history(&project, &subject, slot.as_deref(), limit)
    })
    .await?;

    let mut by_slot: BTreeMap<String, Vec<Claim>> = BTreeMap::new();
    for claim in claims {
        by_slot.entry(claim.slot.clone()).or_default().push(claim);
    }

    Ok(Json(serde_json::json!({
        "subject_id": subject_id,
        "slots": by_slot,
        "supersedes_edges": edges,
    })))
}
