//! Memory orchestrator — ties create/patch/delete/restore to duplicate and
//! conflict checks, embedding, event emission, and async claim extraction.
//!
//! The create pipeline: validate → embed (best-effort) → duplicate skip →
//! conflict collection → insert → supersede → emit events → detach claim
//! extraction. Duplicate skips emit nothing; supersession events fire only
//! for rows that actually transitioned.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::claims::{ClaimRequest, ClaimService};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::extract::{dedupe_claims, ExtractedClaim, Extraction, Extractor};
use crate::store::memories::{CreateMemoryInput, UpdateMemoryInput};
use crate::store::types::{Memory, MemoryKind, MemoryStatus, Visibility};
use crate::store::{run_blocking, Store};

/// Maximum memory text length.
pub const MAX_TEXT_LEN: usize = 10_000;

/// Cap on conflict candidates collected for supersession.
const CONFLICT_LIMIT: usize = 50;

/// Cap on claims attached per extraction.
const MAX_EXTRACTED_CLAIMS: usize = 20;

/// Bound on concurrent detached extraction tasks per process.
const EXTRACTION_CONCURRENCY: usize = 4;

/// POST /memories request after JSON decoding.
#[derive(Debug, Clone, Default)]
pub struct CreateMemoryRequest {
    pub project_id: String,
    pub subject_id: String,
    pub text: String,
    pub kind: Option<MemoryKind>,
    pub visibility: Option<Visibility>,
    pub importance: Option<i64>,
    pub confidence: Option<f64>,
    pub is_temporal: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub source_type: Option<String>,
    pub id: Option<String>,
    pub extract_claims: bool,
    pub no_supersede: bool,
}

impl CreateMemoryRequest {
    pub fn new(project_id: &str, subject_id: &str, text: &str) -> Self {
        Self {
            project_id: project_id.into(),
            subject_id: subject_id.into(),
            text: text.into(),
            extract_claims: true,
            ..Default::default()
        }
    }
}

/// Outcome of a create: a new row, or a duplicate skip.
#[derive(Debug)]
pub enum CreateOutcome {
    Created {
        memory: Memory,
        superseded_ids: Vec<String>,
    },
    Skipped {
        reason: &'static str,
    },
}

/// PATCH /memories/:id request.
#[derive(Debug, Clone, Default)]
pub struct PatchMemoryRequest {
    pub text: Option<String>,
    pub kind: Option<MemoryKind>,
    pub visibility: Option<Visibility>,
    pub importance: Option<i64>,
    pub confidence: Option<f64>,
    pub is_temporal: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub source_type: Option<String>,
}

/// Outcome of a restore.
#[derive(Debug, Serialize)]
pub struct RestoreOutcome {
    pub restored: bool,
    #[serde(flatten)]
    pub memory: Memory,
}

/// Outcome of a learn-extraction run.
#[derive(Debug, Serialize)]
pub struct LearnOutcome {
    pub learned: bool,
    pub extracted_count: usize,
    pub memories: Vec<crate::extract::ExtractedMemory>,
    pub created_ids: Vec<String>,
}

/// Orchestrates the memory lifecycle over the storage facade.
pub struct MemoryService {
    store: Store,
    embedder: Arc<Embedder>,
    extractor: Arc<Extractor>,
    claims: Arc<ClaimService>,
    bus: EventBus,
    duplicate_threshold: f64,
    conflict_min: f64,
    conflict_max: f64,
    extraction_slots: Arc<Semaphore>,
}

impl MemoryService {
    pub fn new(
        store: Store,
        embedder: Arc<Embedder>,
        extractor: Arc<Extractor>,
        claims: Arc<ClaimService>,
        bus: EventBus,
        duplicate_threshold: f64,
        conflict_min: f64,
        conflict_max: f64,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            claims,
            bus,
            duplicate_threshold,
            conflict_min,
            conflict_max,
            extraction_slots: Arc::new(Semaphore::new(EXTRACTION_CONCURRENCY)),
        }
    }

    /// POST-memory end to end. See the module docs for the pipeline.
    pub async fn create(&self, request: CreateMemoryRequest) -> Result<CreateOutcome> {
        if request.subject_id.trim().is_empty() {
            return Err(Error::validation("subject_id_required", "subject_id is required"));
        }
        if request.text.trim().is_empty() {
            return Err(Error::validation("text_required", "text is required"));
        }
        if request.text.chars().count() > MAX_TEXT_LEN {
            return Err(Error::validation(
                "text_too_long",
                format!("text exceeds {MAX_TEXT_LEN} characters"),
            ));
        }

        let embedding = self.embedder.embed(&request.text).await;
        let embedding = (!embedding.is_empty()).then_some(embedding);

        let mut conflict_ids: Vec<String> = Vec::new();
        if let Some(ref emb) = embedding {
            if !request.no_supersede {
                let store = self.store.clone();
                let (project, subject, threshold) = (
                    request.project_id.clone(),
                    request.subject_id.clone(),
                    self.duplicate_threshold,
                );
                let probe = emb.clone();
                let duplicate = run_blocking(move || {
                    store.find_duplicate(&project, &subject, &probe, threshold)
                })
                .await?;
                if let Some((existing, similarity)) = duplicate {
                    tracing::info!(
                        existing = %existing.id,
                        similarity,
                        "duplicate memory — skipping create"
                    );
                    return Ok(CreateOutcome::Skipped {
                        reason: "duplicate",
                    });
                }

                let store = self.store.clone();
                let (project, subject) =
                    (request.project_id.clone(), request.subject_id.clone());
                let (min, max) = (self.conflict_min, self.conflict_max);
                let probe = emb.clone();
                let conflicts = run_blocking(move || {
                    store.find_conflicting(&project, &subject, &probe, min, max, CONFLICT_LIMIT)
                })
                .await?;
                conflict_ids = conflicts.into_iter().map(|(m, _)| m.id).collect();
            }
        }

        let id = request
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("mem_{}", uuid::Uuid::now_v7()));

        let store = self.store.clone();
        let input = CreateMemoryInput {
            id,
            project_id: request.project_id.clone(),
            subject_id: request.subject_id.clone(),
            text: request.text.clone(),
            kind: request.kind,
            visibility: request.visibility,
            importance: request.importance,
            confidence: request.confidence,
            is_temporal: request.is_temporal,
            tags: request.tags.clone(),
            metadata: request.metadata.clone(),
            source_type: request.source_type.clone(),
            embedding,
        };
        let memory = run_blocking(move || store.create_memory(input)).await?;

        let superseded_ids = if conflict_ids.is_empty() {
            Vec::new()
        } else {
            let store = self.store.clone();
            let (project, new_id) = (request.project_id.clone(), memory.id.clone());
            run_blocking(move || store.supersede_memories(&project, &conflict_ids, &new_id))
                .await?
        };

        self.bus.emit(
            &memory.project_id,
            Some(&memory.subject_id),
            "memory.created",
            serde_json::json!({
                "id": memory.id,
                "subject_id": memory.subject_id,
                "text": memory.text,
                "kind": memory.kind,
                "visibility": memory.visibility,
                "importance": memory.importance,
                "tags": memory.tags,
                "created_at": memory.created_at,
            }),
        );
        for superseded in &superseded_ids {
            self.bus.emit(
                &memory.project_id,
                Some(&memory.subject_id),
                "memory.superseded",
                serde_json::json!({ "id": superseded, "superseded_by": memory.id }),
            );
        }
        tracing::info!(
            id = %memory.id,
            subject = %memory.subject_id,
            superseded = superseded_ids.len(),
            "memory created"
        );

        if request.extract_claims && !request.no_supersede {
            self.spawn_claim_extraction(memory.clone());
        }

        Ok(CreateOutcome::Created {
            memory,
            superseded_ids,
        })
    }

    /// Detach claim extraction from the request; effects surface only via
    /// the event bus or subsequent reads.
    fn spawn_claim_extraction(&self, memory: Memory) {
        let extractor = Arc::clone(&self.extractor);
        let claims = Arc::clone(&self.claims);
        let embedder = Arc::clone(&self.embedder);
        let slots = Arc::clone(&self.extraction_slots);
        tokio::spawn(async move {
            let _permit = match slots.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let extraction = extractor.extract(&memory.text, &[], true).await;
            let extracted: Vec<ExtractedClaim> = extraction
                .memories
                .into_iter()
                .flat_map(|m| m.claims)
                .collect();
            if let Err(e) = attach_claims(
                &claims,
                &embedder,
                &memory.project_id,
                &memory.subject_id,
                &memory.id,
                extracted,
            )
            .await
            {
                tracing::warn!(memory = %memory.id, "claim extraction failed: {e}");
            }
        });
    }

    /// GET /memories/:id.
    pub async fn get(&self, project_id: &str, id: &str) -> Result<Memory> {
        let store = self.store.clone();
        let (project, id_owned) = (project_id.to_string(), id.to_string());
        run_blocking(move || store.get_memory(&project, &id_owned))
            .await?
            .ok_or_else(|| Error::not_found("memory_not_found", format!("memory not found: {id}")))
    }

    /// PATCH /memories/:id. Missing or deleted rows are 404; a text change
    /// recomputes the embedding when an embedder is configured.
    pub async fn patch(
        &self,
        project_id: &str,
        id: &str,
        request: PatchMemoryRequest,
    ) -> Result<Memory> {
        let existing = self.get(project_id, id).await?;
        if existing.is_deleted {
            return Err(Error::not_found(
                "memory_deleted",
                format!("memory is deleted: {id}"),
            ));
        }
        if let Some(ref text) = request.text {
            if text.chars().count() > MAX_TEXT_LEN {
                return Err(Error::validation(
                    "text_too_long",
                    format!("text exceeds {MAX_TEXT_LEN} characters"),
                ));
            }
        }

        let text_changed = request
            .text
            .as_ref()
            .is_some_and(|t| t != &existing.text);
        let new_embedding = if text_changed && self.embedder.is_enabled() {
            let vector = self
                .embedder
                .embed(request.text.as_deref().unwrap_or_default())
                .await;
            Some((!vector.is_empty()).then_some(vector))
        } else {
            None
        };

        let store = self.store.clone();
        let (project, id_owned) = (project_id.to_string(), id.to_string());
        let patch = UpdateMemoryInput {
            text: request.text,
            kind: request.kind,
            visibility: request.visibility,
            importance: request.importance,
            confidence: request.confidence,
            is_temporal: request.is_temporal,
            tags: request.tags,
            metadata: request.metadata,
            source_type: request.source_type,
            new_embedding,
        };
        let updated = run_blocking(move || store.update_memory(&project, &id_owned, patch))
            .await?
            .ok_or_else(|| {
                Error::not_found("memory_not_found", format!("memory not found: {id}"))
            })?;

        self.bus.emit(
            project_id,
            Some(&updated.subject_id),
            "memory.updated",
            serde_json::json!({
                "id": updated.id,
                "subject_id": updated.subject_id,
                "status": updated.status,
                "updated_at": updated.updated_at,
            }),
        );
        Ok(updated)
    }

    /// DELETE /memories/:id (soft). The event fires only on an actual
    /// transition.
    pub async fn delete(&self, project_id: &str, id: &str) -> Result<bool> {
        let existing = self.get(project_id, id).await?;

        let store = self.store.clone();
        let (project, id_owned) = (project_id.to_string(), id.to_string());
        let deleted = run_blocking(move || store.delete_memory(&project, &id_owned)).await?;

        if deleted {
            self.bus.emit(
                project_id,
                Some(&existing.subject_id),
                "memory.deleted",
                serde_json::json!({ "id": existing.id, "subject_id": existing.subject_id }),
            );
        }
        Ok(deleted)
    }

    /// POST /memories/:id/restore.
    pub async fn restore(&self, project_id: &str, id: &str) -> Result<RestoreOutcome> {
        let existing = self.get(project_id, id).await?;
        if existing.is_deleted {
            return Err(Error::validation(
                "memory_deleted",
                format!("cannot restore a deleted memory: {id}"),
            ));
        }
        if existing.status == MemoryStatus::Active {
            return Ok(RestoreOutcome {
                restored: false,
                memory: existing,
            });
        }

        let store = self.store.clone();
        let (project, id_owned) = (project_id.to_string(), id.to_string());
        let restored = run_blocking(move || store.restore_memory(&project, &id_owned))
            .await?
            .ok_or_else(|| {
                Error::not_found("memory_not_found", format!("memory not found: {id}"))
            })?;

        self.bus.emit(
            project_id,
            Some(&restored.subject_id),
            "memory.updated",
            serde_json::json!({
                "id": restored.id,
                "subject_id": restored.subject_id,
                "status": restored.status,
                "updated_at": restored.updated_at,
            }),
        );
        Ok(RestoreOutcome {
            restored: true,
            memory: restored,
        })
    }

    /// POST /memories/extract: run extraction, optionally learning the
    /// results into storage.
    pub async fn extract(
        &self,
        project_id: &str,
        subject_id: &str,
        text: &str,
        conversation_context: &[serde_json::Value],
        force: bool,
        learn: bool,
    ) -> Result<LearnOutcome> {
        if subject_id.trim().is_empty() {
            return Err(Error::validation("subject_id_required", "subject_id is required"));
        }
        if text.trim().is_empty() {
            return Err(Error::validation("text_required", "text is required"));
        }

        let extraction = self.extractor.extract(text, conversation_context, force).await;
        let extracted_count = extraction.memories.len();

        let created_ids = if learn {
            self.learn(project_id, subject_id, &extraction).await?
        } else {
            Vec::new()
        };

        Ok(LearnOutcome {
            learned: learn,
            extracted_count,
            memories: extraction.memories,
            created_ids,
        })
    }

    /// Persist an extraction: one create per extracted memory (duplicates
    /// skip as usual), then attach that memory's claims directly.
    async fn learn(
        &self,
        project_id: &str,
        subject_id: &str,
        extraction: &Extraction,
    ) -> Result<Vec<String>> {
        let mut created_ids = Vec::new();
        for extracted in &extraction.memories {
            let outcome = self
                .create(CreateMemoryRequest {
                    project_id: project_id.to_string(),
                    subject_id: subject_id.to_string(),
                    text: extracted.text.clone(),
                    kind: Some(extracted.kind),
                    visibility: Some(extracted.visibility),
                    importance: Some(extracted.importance),
                    confidence: Some(extracted.confidence),
                    is_temporal: Some(extracted.is_temporal),
                    tags: Some(extracted.tags.clone()),
                    source_type: Some("extracted".into()),
                    // claims come straight from this extraction
                    extract_claims: false,
                    ..Default::default()
                })
                .await?;

            if let CreateOutcome::Created { memory, .. } = outcome {
                attach_claims(
                    &self.claims,
                    &self.embedder,
                    project_id,
                    subject_id,
                    &memory.id,
                    extracted.claims.clone(),
                )
                .await?;
                created_ids.push(memory.id);
            }
        }
        Ok(created_ids)
    }

    /// Test hook: run the detached extraction pipeline inline.
    #[doc(hidden)]
    pub async fn run_claim_extraction_now(&self, memory: &Memory) -> Result<()> {
        let extraction = self.extractor.extract(&memory.text, &[], true).await;
        let extracted: Vec<ExtractedClaim> = extraction
            .memories
            .into_iter()
            .flat_map(|m| m.claims)
            .collect();
        attach_claims(
            &self.claims,
            &self.embedder,
            &memory.project_id,
            &memory.subject_id,
            &memory.id,
            extracted,
        )
        .await
    }
}

/// Create claims for a memory: dedupe by (predicate, lowercased value), cap
/// at 20, claim embedding from `"predicate: value"` (best-effort).
async fn attach_claims(
    claims: &ClaimService,
    embedder: &Embedder,
    project_id: &str,
    subject_id: &str,
    memory_id: &str,
    extracted: Vec<ExtractedClaim>,
) -> Result<()> {
    let mut deduped = dedupe_claims(extracted);
    deduped.truncate(MAX_EXTRACTED_CLAIMS);

    for claim in deduped {
        let vector = embedder
            .embed(&format!("{}: {}", claim.predicate, claim.object_value))
            .await;
        let result = claims
            .create(ClaimRequest {
                project_id: project_id.to_string(),
                subject_id: subject_id.to_string(),
                predicate: claim.predicate.clone(),
                object_value: claim.object_value,
                claim_type: Some(claim.claim_type),
                confidence: Some(claim.confidence),
                source_memory_id: Some(memory_id.to_string()),
                embedding: (!vector.is_empty()).then_some(vector),
                ..Default::default()
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(predicate = %claim.predicate, "extracted claim rejected: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;
    use std::collections::HashMap;

    fn fixture_embedder(entries: &[(&str, Vec<f32>)]) -> Arc<Embedder> {
        let map: HashMap<String, Vec<f32>> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Arc::new(Embedder::fixture(map))
    }

    fn service_with(embedder: Arc<Embedder>) -> (MemoryService, Store, EventBus) {
        let store = Store::in_memory().unwrap();
        let bus = EventBus::new();
        let llm = Arc::new(LlmClient::disabled());
        let service = MemoryService::new(
            store.clone(),
            embedder,
            Arc::new(Extractor::new(Arc::clone(&llm))),
            Arc::new(ClaimService::new(store.clone())),
            bus.clone(),
            85.0,
            60.0,
            85.0,
        );
        (service, store, bus)
    }

    fn unit(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 1536];
        v[dim] = 1.0;
        v
    }

    fn at_cosine(cos: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; 1536];
        v[0] = cos;
        v[1] = (1.0 - cos * cos).sqrt();
        v
    }

    #[tokio::test]
    async fn validation_rejects_bad_input() {
        let (service, _, _) = service_with(Arc::new(Embedder::disabled()));
        let err = service
            .create(CreateMemoryRequest::new("proj", "", "text"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "subject_id_required");

        let err = service
            .create(CreateMemoryRequest::new("proj", "subj", ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "text_required");

        let long = "x".repeat(MAX_TEXT_LEN + 1);
        let err = service
            .create(CreateMemoryRequest::new("proj", "subj", &long))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "text_too_long");
    }

    #[tokio::test]
    async fn duplicate_post_skips_and_emits_nothing() {
        let embedder = fixture_embedder(&[("My favorite color is yellow", unit(0))]);
        let (service, _, bus) = service_with(embedder);
        let mut sub = bus.subscribe("proj", Some("subj"));

        let first = service
            .create(CreateMemoryRequest::new("proj", "subj", "My favorite color is yellow"))
            .await
            .unwrap();
        assert!(matches!(first, CreateOutcome::Created { .. }));
        assert_eq!(sub.events.recv().await.unwrap().event_type, "memory.created");

        let second = service
            .create(CreateMemoryRequest::new("proj", "subj", "My favorite color is yellow"))
            .await
            .unwrap();
        assert!(matches!(second, CreateOutcome::Skipped { reason } if reason == "duplicate"));
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_supersede_bypasses_duplicate_check() {
        let embedder = fixture_embedder(&[("same text", unit(0))]);
        let (service, _, _) = service_with(embedder);

        service
            .create(CreateMemoryRequest::new("proj", "subj", "same text"))
            .await
            .unwrap();
        let outcome = service
            .create(CreateMemoryRequest {
                no_supersede: true,
                ..CreateMemoryRequest::new("proj", "subj", "same text")
            })
            .await
            .unwrap();
        assert!(matches!(outcome, CreateOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn conflicting_memory_is_superseded_with_events() {
        let embedder = fixture_embedder(&[
            ("My favorite color is yellow", unit(0)),
            ("Actually my favorite color is red now", at_cosine(0.7)),
        ]);
        let (service, store, bus) = service_with(embedder);
        let mut sub = bus.subscribe("proj", Some("subj"));

        let first = service
            .create(CreateMemoryRequest::new("proj", "subj", "My favorite color is yellow"))
            .await
            .unwrap();
        let CreateOutcome::Created { memory: first, .. } = first else {
            panic!("expected create");
        };

        let second = service
            .create(CreateMemoryRequest::new(
                "proj",
                "subj",
                "Actually my favorite color is red now",
            ))
            .await
            .unwrap();
        let CreateOutcome::Created {
            memory: second,
            superseded_ids,
        } = second
        else {
            panic!("expected create");
        };
        assert_eq!(superseded_ids, vec![first.id.clone()]);

        let old = store.get_memory("proj", &first.id).unwrap().unwrap();
        assert_eq!(old.status, MemoryStatus::Superseded);
        assert_eq!(old.superseded_by.as_deref(), Some(second.id.as_str()));

        // created, created, superseded — in emit order for this subscriber
        assert_eq!(sub.events.recv().await.unwrap().event_type, "memory.created");
        assert_eq!(sub.events.recv().await.unwrap().event_type, "memory.created");
        let superseded = sub.events.recv().await.unwrap();
        assert_eq!(superseded.event_type, "memory.superseded");
        assert_eq!(superseded.data["id"], first.id.as_str());
        assert_eq!(superseded.data["superseded_by"], second.id.as_str());
    }

    #[tokio::test]
    async fn patch_missing_and_deleted_are_not_found() {
        let (service, _, _) = service_with(Arc::new(Embedder::disabled()));
        let err = service
            .patch("proj", "mem_ghost", PatchMemoryRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "memory_not_found");

        let CreateOutcome::Created { memory, .. } = service
            .create(CreateMemoryRequest::new("proj", "subj", "to be deleted"))
            .await
            .unwrap()
        else {
            panic!()
        };
        service.delete("proj", &memory.id).await.unwrap();
        let err = service
            .patch("proj", &memory.id, PatchMemoryRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "memory_deleted");
    }

    #[tokio::test]
    async fn noop_patch_preserves_fields() {
        let (service, _, _) = service_with(Arc::new(Embedder::disabled()));
        let CreateOutcome::Created { memory, .. } = service
            .create(CreateMemoryRequest::new("proj", "subj", "stable text"))
            .await
            .unwrap()
        else {
            panic!()
        };

        let updated = service
            .patch("proj", &memory.id, PatchMemoryRequest::default())
            .await
            .unwrap();
        assert_eq!(updated.text, memory.text);
        assert_eq!(updated.kind, memory.kind);
        assert_eq!(updated.importance, memory.importance);
        assert!(updated.updated_at >= memory.updated_at);
    }

    #[tokio::test]
    async fn delete_emits_once() {
        let (service, _, bus) = service_with(Arc::new(Embedder::disabled()));
        let mut sub = bus.subscribe("proj", Some("subj"));
        let CreateOutcome::Created { memory, .. } = service
            .create(CreateMemoryRequest::new("proj", "subj", "short lived"))
            .await
            .unwrap()
        else {
            panic!()
        };
        sub.events.recv().await.unwrap(); // created

        assert!(service.delete("proj", &memory.id).await.unwrap());
        assert_eq!(sub.events.recv().await.unwrap().event_type, "memory.deleted");

        // second delete transitions nothing and emits nothing
        assert!(!service.delete("proj", &memory.id).await.unwrap());
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn restore_state_machine() {
        let (service, store, _) = service_with(Arc::new(Embedder::disabled()));
        let CreateOutcome::Created { memory, .. } = service
            .create(CreateMemoryRequest::new("proj", "subj", "restorable"))
            .await
            .unwrap()
        else {
            panic!()
        };

        // already active → restored: false
        let outcome = service.restore("proj", &memory.id).await.unwrap();
        assert!(!outcome.restored);

        // superseded → restored: true, supersession cleared
        store
            .supersede_memories("proj", &[memory.id.clone()], "mem_other")
            .unwrap();
        let outcome = service.restore("proj", &memory.id).await.unwrap();
        assert!(outcome.restored);
        assert_eq!(outcome.memory.status, MemoryStatus::Active);
        assert!(outcome.memory.superseded_by.is_none());

        // deleted → 400
        service.delete("proj", &memory.id).await.unwrap();
        let err = service.restore("proj", &memory.id).await.unwrap_err();
        assert!(matches!(err, Error::Validation { code, .. } if code == "memory_deleted"));

        // missing → 404
        let err = service.restore("proj", "mem_ghost").await.unwrap_err();
        assert_eq!(err.code(), "memory_not_found");
    }

    #[tokio::test]
    async fn extraction_attaches_claims_to_memory() {
        let (service, store, _) = service_with(Arc::new(Embedder::disabled()));
        let CreateOutcome::Created { memory, .. } = service
            .create(CreateMemoryRequest {
                extract_claims: false,
                ..CreateMemoryRequest::new("proj", "subj", "I work at Acme and I live in Lisbon")
            })
            .await
            .unwrap()
        else {
            panic!()
        };

        service.run_claim_extraction_now(&memory).await.unwrap();

        let (claims, _) = store.claims_for_memory("proj", &memory.id).unwrap();
        let predicates: Vec<&str> = claims.iter().map(|c| c.predicate.as_str()).collect();
        assert!(predicates.contains(&"works_at"));
        assert!(predicates.contains(&"lives_in"));

        let truth = store.get_current_truth("proj", "subj").unwrap();
        assert_eq!(truth.len(), 2);
    }

    #[tokio::test]
    async fn extract_without_learn_stores_nothing() {
        let (service, store, _) = service_with(Arc::new(Embedder::disabled()));
        let outcome = service
            .extract("proj", "subj", "I work at Acme", &[], false, false)
            .await
            .unwrap();
        assert!(!outcome.learned);
        assert!(outcome.extracted_count >= 1);
        assert!(outcome.created_ids.is_empty());

        let rows = store
            .list_memories("proj", "subj", &Default::default())
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn extract_with_learn_creates_rows_and_claims() {
        let (service, store, _) = service_with(Arc::new(Embedder::disabled()));
        let outcome = service
            .extract("proj", "subj", "My name is Ada", &[], false, true)
            .await
            .unwrap();
        assert!(outcome.learned);
        assert_eq!(outcome.created_ids.len(), 1);

        let rows = store
            .list_memories("proj", "subj", &Default::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_type, "extracted");

        let winner = store.get_current_slot("proj", "subj", "name").unwrap().unwrap();
        assert_eq!(winner.object_value, "Ada");
    }
}
