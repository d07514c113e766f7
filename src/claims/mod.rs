//! Claim orchestrator — id generation, slot defaulting, claim-type
//! inference, and the storage transactions behind create and retract.
//!
//! All slot_state mutation funnels through here (and the storage
//! transactions it drives); nothing else writes truth state.

use crate::error::{Error, Result};
use crate::store::claims::{CreateClaimInput, RetractOutcome};
use crate::store::types::Claim;
use crate::store::{run_blocking, Store};

/// A claim create request, from HTTP or from extraction.
#[derive(Debug, Clone, Default)]
pub struct ClaimRequest {
    pub claim_id: Option<String>,
    pub project_id: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_value: String,
    pub slot: Option<String>,
    pub claim_type: Option<String>,
    pub confidence: Option<f64>,
    pub importance: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub source_memory_id: Option<String>,
    pub subject_entity: Option<String>,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Orchestrates claim writes over the storage facade.
pub struct ClaimService {
    store: Store,
}

impl ClaimService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create a claim and promote it to its slot's winner.
    ///
    /// Returns the claim and the displaced incumbent's id, if any.
    pub async fn create(&self, request: ClaimRequest) -> Result<(Claim, Option<String>)> {
        if request.subject_id.trim().is_empty() {
            return Err(Error::validation("subject_id_required", "subject_id is required"));
        }
        if request.predicate.trim().is_empty() {
            return Err(Error::validation("predicate_required", "predicate is required"));
        }
        if request.object_value.trim().is_empty() {
            return Err(Error::validation(
                "object_value_required",
                "object_value is required",
            ));
        }

        let claim_id = request
            .claim_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("clm_{}", uuid::Uuid::now_v7()));
        let slot = request
            .slot
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| request.predicate.clone());
        let claim_type = request
            .claim_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| infer_claim_type(&request.predicate).to_string());

        let input = CreateClaimInput {
            claim_id,
            project_id: request.project_id,
            subject_id: request.subject_id,
            predicate: request.predicate,
            object_value: request.object_value,
            slot,
            claim_type,
            confidence: request.confidence,
            importance: request.importance,
            tags: request.tags,
            source_memory_id: request.source_memory_id,
            subject_entity: request.subject_entity,
            valid_from: request.valid_from,
            valid_until: request.valid_until,
            embedding: request.embedding,
        };

        let store = self.store.clone();
        let (claim, displaced) = run_blocking(move || store.create_claim(input)).await?;
        tracing::info!(
            claim_id = %claim.claim_id,
            slot = %claim.slot,
            displaced = displaced.as_deref().unwrap_or("-"),
            "claim created"
        );
        Ok((claim, displaced))
    }

    /// Retract a claim, restoring the previous slot winner when one exists.
    pub async fn retract(
        &self,
        project_id: &str,
        claim_id: &str,
        reason: Option<String>,
    ) -> Result<RetractOutcome> {
        let store = self.store.clone();
        let (project, claim) = (project_id.to_string(), claim_id.to_string());
        let outcome =
            run_blocking(move || store.retract_claim(&project, &claim, reason.as_deref())).await?;
        tracing::info!(
            claim_id = %claim_id,
            success = outcome.success,
            restored_previous = outcome.restored_previous,
            "claim retraction"
        );
        Ok(outcome)
    }
}

/// Infer a claim type from predicate shape when the caller provided none.
pub fn infer_claim_type(predicate: &str) -> &'static str {
    let p = predicate.to_lowercase();
    if p.starts_with("favorite_") || p.starts_with("likes_") || p.starts_with("dislikes_") {
        "preference"
    } else if p.contains("goal") || p.starts_with("wants_") {
        "goal"
    } else if p.starts_with("did_") || p.starts_with("event_") {
        "event"
    } else {
        "fact"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (ClaimService, Store) {
        let store = Store::in_memory().unwrap();
        (ClaimService::new(store.clone()), store)
    }

    fn request(predicate: &str, value: &str) -> ClaimRequest {
        ClaimRequest {
            project_id: "proj".into(),
            subject_id: "subj".into(),
            predicate: predicate.into(),
            object_value: value.into(),
            ..Default::default()
        }
    }

    #[test]
    fn claim_type_inference() {
        assert_eq!(infer_claim_type("favorite_color"), "preference");
        assert_eq!(infer_claim_type("likes_music"), "preference");
        assert_eq!(infer_claim_type("dislikes_cilantro"), "preference");
        assert_eq!(infer_claim_type("career_goal"), "goal");
        assert_eq!(infer_claim_type("wants_to_travel"), "goal");
        assert_eq!(infer_claim_type("did_marathon"), "event");
        assert_eq!(infer_claim_type("event_birthday"), "event");
        assert_eq!(infer_claim_type("name"), "fact");
        assert_eq!(infer_claim_type("likes"), "fact"); // no underscore suffix
    }

    #[tokio::test]
    async fn create_fills_id_slot_and_type() {
        let (service, _store) = service();
        let (claim, displaced) = service.create(request("favorite_color", "yellow")).await.unwrap();
        assert!(claim.claim_id.starts_with("clm_"));
        assert_eq!(claim.slot, "favorite_color");
        assert_eq!(claim.claim_type, "preference");
        assert!(displaced.is_none());
    }

    #[tokio::test]
    async fn explicit_slot_and_type_win() {
        let (service, _store) = service();
        let (claim, _) = service
            .create(ClaimRequest {
                slot: Some("color_pref".into()),
                claim_type: Some("custom".into()),
                ..request("favorite_color", "yellow")
            })
            .await
            .unwrap();
        assert_eq!(claim.slot, "color_pref");
        assert_eq!(claim.claim_type, "custom");
    }

    #[tokio::test]
    async fn validation_errors_carry_codes() {
        let (service, _store) = service();
        let err = service.create(request("", "x")).await.unwrap_err();
        assert_eq!(err.code(), "predicate_required");
        let err = service.create(request("p", "")).await.unwrap_err();
        assert_eq!(err.code(), "object_value_required");
        let err = service
            .create(ClaimRequest {
                subject_id: " ".into(),
                ..request("p", "v")
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "subject_id_required");
    }

    #[tokio::test]
    async fn retract_round_trip() {
        let (service, store) = service();
        let (a, _) = service.create(request("favorite_color", "yellow")).await.unwrap();
        let (b, displaced) = service.create(request("favorite_color", "blue")).await.unwrap();
        assert_eq!(displaced.as_deref(), Some(a.claim_id.as_str()));

        let outcome = service
            .retract("proj", &b.claim_id, Some("changed mind".into()))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.previous_claim_id.as_deref(), Some(a.claim_id.as_str()));

        let winner = store
            .get_current_slot("proj", "subj", "favorite_color")
            .unwrap()
            .unwrap();
        assert_eq!(winner.object_value, "yellow");
    }
}
