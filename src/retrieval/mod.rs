//! Retrieval pipeline — LLM-classified, multi-query, fusion-ranked search.
//!
//! The expanded path classifies the query (broad / direct / indirect), fans
//! out over a bounded query set, merges candidates by memory id with a rank
//! penalty, boosts claim-backed rows from current truth, and reranks through
//! the LLM when the candidate pool overflows the request. Every LLM touch
//! point degrades: classification failure defaults to indirect, rerank
//! failure keeps fusion order, and without an LLM the whole pipeline
//! collapses to the simple single-query path.

mod rerank;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::llm::{JsonRequest, LlmClient};
use crate::store::memories::ListParams;
use crate::store::recalls::NewRecallEvent;
use crate::store::types::ScoredMemory;
use crate::store::{run_blocking, Store};

/// Deadline for the classification call.
const CLASSIFY_DEADLINE: Duration = Duration::from_secs(2);

/// Hard cap on the fan-out query set.
const QUERY_SET_CAP: usize = 6;

/// Conversation context passed to the classifier is capped to the last turns.
const CONTEXT_CAP: usize = 5;

/// Per-result rank penalty applied when merging fan-out candidates.
const RANK_PENALTY: f64 = 0.03;

/// Score pair given to claim-backed candidates.
const CLAIM_BACKED_SCORE: f64 = 100.0;
const CLAIM_BACKED_EFFECTIVE: f64 = 120.0;

/// Retrieval strategy chosen by the classifier (or forced by degradation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Broad,
    Direct,
    Indirect,
    Simple,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broad => "broad",
            Self::Direct => "direct",
            Self::Indirect => "indirect",
            Self::Simple => "simple",
        }
    }
}

/// Search request handed to the retrieval service.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub project_id: String,
    pub subject_id: String,
    pub q: String,
    pub limit: usize,
    pub min_score: f64,
    pub conversation_context: Vec<serde_json::Value>,
    /// When set, every returned memory is written to the recall audit trail.
    pub chat_id: Option<String>,
    pub message_index: i64,
}

/// Response shape shared by both retrieval variants.
#[derive(Debug, Serialize)]
pub struct RetrievalResponse {
    pub memories: Vec<ScoredMemory>,
    pub mode: RetrievalMode,
    pub used_queries: Vec<String>,
    pub predicates: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Classification {
    mode: String,
    #[serde(default)]
    predicates: Vec<String>,
    #[serde(default)]
    search_hints: Vec<String>,
    #[serde(default)]
    expanded_queries: Vec<String>,
}

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You classify a memory-retrieval query and expand it.

Modes:
- "broad": the caller wants a general profile of the subject (e.g. "what do you know about me").
- "direct": a specific fact lookup (e.g. "where do I work").
- "indirect": advice or generation that benefits from context (e.g. "what should I cook tonight").

Respond with ONLY a JSON object:
{
  "mode": "broad|direct|indirect",
  "predicates": ["up to 3 snake_case predicates the query maps to"],
  "search_hints": ["up to 3 short alternative search phrasings"],
  "expanded_queries": ["up to 3 broader related queries"]
}"#;

/// Retrieval service over the storage facade plus injected capabilities.
pub struct RetrievalService {
    store: Store,
    embedder: Arc<Embedder>,
    llm: Arc<LlmClient>,
    /// Gates the LLM-expanded pipeline; extraction is unaffected.
    expand: bool,
}

impl RetrievalService {
    pub fn new(store: Store, embedder: Arc<Embedder>, llm: Arc<LlmClient>, expand: bool) -> Self {
        Self {
            store,
            embedder,
            llm,
            expand,
        }
    }

    /// Run a search end to end, recording recall audit rows when the request
    /// carries a chat id.
    pub async fn search(&self, request: SearchRequest) -> Result<RetrievalResponse> {
        let limit = request.limit.clamp(1, 200);

        if request.q.trim().is_empty() {
            return Ok(RetrievalResponse {
                memories: vec![],
                mode: RetrievalMode::Indirect,
                used_queries: vec![],
                predicates: vec![],
            });
        }

        let response = if self.expand && self.llm.is_enabled() {
            self.expanded_search(&request, limit).await?
        } else {
            self.simple_search(&request, limit).await?
        };

        if let Some(ref chat_id) = request.chat_id {
            self.record_recalls(&request, chat_id, &response).await?;
        }
        Ok(response)
    }

    /// Degraded path: one embedding attempt, one storage search.
    async fn simple_search(
        &self,
        request: &SearchRequest,
        limit: usize,
    ) -> Result<RetrievalResponse> {
        let embedding = self.embedder.embed(&request.q).await;
        let embedding = (!embedding.is_empty()).then_some(embedding);

        let store = self.store.clone();
        let (project, subject, q) = (
            request.project_id.clone(),
            request.subject_id.clone(),
            request.q.clone(),
        );
        let min_score = request.min_score;
        let memories = run_blocking(move || {
            store.search_memories(&project, &subject, &q, embedding.as_deref(), limit as i64, min_score)
        })
        .await?;

        Ok(RetrievalResponse {
            memories,
            mode: RetrievalMode::Simple,
            used_queries: vec![request.q.clone()],
            predicates: vec![],
        })
    }

    async fn expanded_search(
        &self,
        request: &SearchRequest,
        limit: usize,
    ) -> Result<RetrievalResponse> {
        let (mode, predicates, hints, expansions) = self.classify(request).await;

        match mode {
            RetrievalMode::Broad => self.broad(request, limit).await,
            RetrievalMode::Direct => {
                let queries = build_query_set(&request.q, &[&hints]);
                self.fan_out(request, limit, queries, predicates, RetrievalMode::Direct)
                    .await
            }
            _ => {
                let queries = build_query_set(&request.q, &[&hints, &expansions]);
                self.fan_out(request, limit, queries, predicates, RetrievalMode::Indirect)
                    .await
            }
        }
    }

    /// Classify the query; any failure defaults to indirect with no expansion.
    async fn classify(
        &self,
        request: &SearchRequest,
    ) -> (RetrievalMode, Vec<String>, Vec<String>, Vec<String>) {
        let context: Vec<&serde_json::Value> = request
            .conversation_context
            .iter()
            .rev()
            .take(CONTEXT_CAP)
            .rev()
            .collect();
        let user = serde_json::json!({
            "query": request.q,
            "conversation_context": context,
        })
        .to_string();

        let response = self
            .llm
            .call_json(&JsonRequest {
                system: CLASSIFY_SYSTEM_PROMPT.to_string(),
                user,
                temperature: 0.0,
                deadline: CLASSIFY_DEADLINE,
            })
            .await;

        let Some(value) = response else {
            return (RetrievalMode::Indirect, vec![], vec![], vec![]);
        };
        let Ok(parsed) = serde_json::from_value::<Classification>(value) else {
            return (RetrievalMode::Indirect, vec![], vec![], vec![]);
        };

        let mode = match parsed.mode.as_str() {
            "broad" => RetrievalMode::Broad,
            "direct" => RetrievalMode::Direct,
            "indirect" => RetrievalMode::Indirect,
            _ => {
                tracing::debug!(mode = %parsed.mode, "classifier returned unknown mode");
                RetrievalMode::Indirect
            }
        };
        (
            mode,
            cap3(parsed.predicates),
            cap3(parsed.search_hints),
            cap3(parsed.expanded_queries),
        )
    }

    /// Broad mode: profile listing ranked by importance, no vector work.
    async fn broad(&self, request: &SearchRequest, limit: usize) -> Result<RetrievalResponse> {
        let list_limit = (3 * limit).min(200) as i64;
        let store = self.store.clone();
        let (project, subject) = (request.project_id.clone(), request.subject_id.clone());
        let mut rows = run_blocking(move || {
            store.list_memories(
                &project,
                &subject,
                &ListParams {
                    limit: Some(list_limit),
                    ..Default::default()
                },
            )
        })
        .await?;

        rows.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        rows.truncate(limit.max(20));

        let memories = rows
            .into_iter()
            .map(|memory| {
                let effective_score = memory.importance as f64;
                ScoredMemory {
                    memory,
                    score: 100.0,
                    effective_score,
                }
            })
            .collect();

        Ok(RetrievalResponse {
            memories,
            mode: RetrievalMode::Broad,
            used_queries: vec![request.q.clone()],
            predicates: vec![],
        })
    }

    /// Direct / indirect: fan out over the query set, merge, boost
    /// claim-backed rows, then rerank or truncate.
    async fn fan_out(
        &self,
        request: &SearchRequest,
        limit: usize,
        queries: Vec<String>,
        predicates: Vec<String>,
        mode: RetrievalMode,
    ) -> Result<RetrievalResponse> {
        let per_query_limit = ((2 * limit).min(200)) as i64;
        let mut merged: HashMap<String, ScoredMemory> = HashMap::new();

        for query in &queries {
            let embedding = self.embedder.embed(query).await;
            let embedding = (!embedding.is_empty()).then_some(embedding);

            let store = self.store.clone();
            let (project, subject, q) = (
                request.project_id.clone(),
                request.subject_id.clone(),
                query.clone(),
            );
            let min_score = request.min_score;
            let results = run_blocking(move || {
                store.search_memories(&project, &subject, &q, embedding.as_deref(), per_query_limit, min_score)
            })
            .await?;

            merge_ranked(&mut merged, results);
        }

        let mut has_claim_backed = false;
        if mode == RetrievalMode::Direct && !predicates.is_empty() {
            let claim_backed = self.claim_backed_candidates(request, &predicates).await?;
            has_claim_backed = !claim_backed.is_empty();
            for candidate in claim_backed {
                merge_candidate(&mut merged, candidate);
            }
        }

        let mut candidates: Vec<ScoredMemory> = merged.into_values().collect();
        candidates.sort_by(|a, b| {
            b.effective_score
                .partial_cmp(&a.effective_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let memories = match mode {
            RetrievalMode::Direct => {
                if has_claim_backed {
                    candidates.truncate(limit.min(5));
                    candidates
                } else if candidates.len() > limit {
                    rerank::rerank(&self.llm, &request.q, candidates, limit).await
                } else {
                    candidates.truncate(limit.min(5));
                    candidates
                }
            }
            _ => {
                if candidates.len() > limit {
                    rerank::rerank(&self.llm, &request.q, candidates, limit).await
                } else {
                    candidates.truncate(limit);
                    candidates
                }
            }
        };

        Ok(RetrievalResponse {
            memories,
            mode,
            used_queries: queries,
            predicates,
        })
    }

    /// Synthesize candidates from current truth: rows whose predicate is in
    /// the classifier's set and whose source memory is still live.
    async fn claim_backed_candidates(
        &self,
        request: &SearchRequest,
        predicates: &[String],
    ) -> Result<Vec<ScoredMemory>> {
        let store = self.store.clone();
        let (project, subject) = (request.project_id.clone(), request.subject_id.clone());
        let predicates = predicates.to_vec();

        run_blocking(move || {
            let truth = store.get_current_truth(&project, &subject)?;
            let mut out = Vec::new();
            for (_, claim) in truth {
                if !predicates.contains(&claim.predicate) {
                    continue;
                }
                let Some(ref memory_id) = claim.source_memory_id else {
                    continue;
                };
                let Some(memory) = store.get_memory(&project, memory_id)? else {
                    continue;
                };
                if memory.is_deleted || memory.status != crate::store::types::MemoryStatus::Active {
                    continue;
                }
                out.push(ScoredMemory {
                    memory,
                    score: CLAIM_BACKED_SCORE,
                    effective_score: CLAIM_BACKED_EFFECTIVE,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn record_recalls(
        &self,
        request: &SearchRequest,
        chat_id: &str,
        response: &RetrievalResponse,
    ) -> Result<()> {
        let model_id = self.llm.model_id();
        let events: Vec<NewRecallEvent> = response
            .memories
            .iter()
            .map(|m| NewRecallEvent {
                project_id: request.project_id.clone(),
                memory_id: m.memory.id.clone(),
                subject_id: request.subject_id.clone(),
                chat_id: chat_id.to_string(),
                message_index: request.message_index,
                similarity: m.score,
                request_type: response.mode.as_str().to_string(),
                model_id: model_id.clone(),
            })
            .collect();

        let store = self.store.clone();
        run_blocking(move || {
            for event in &events {
                store.record_recall(event)?;
            }
            Ok(())
        })
        .await
    }
}

fn cap3(mut items: Vec<String>) -> Vec<String> {
    items.truncate(3);
    items
}

/// Original query plus expansion sets, deduped in order, capped at 6.
fn build_query_set(original: &str, extra: &[&Vec<String>]) -> Vec<String> {
    let mut queries = vec![original.to_string()];
    for set in extra {
        for q in set.iter() {
            let q = q.trim();
            if q.is_empty() {
                continue;
            }
            if !queries.iter().any(|existing| existing == q) {
                queries.push(q.to_string());
            }
        }
    }
    queries.truncate(QUERY_SET_CAP);
    queries
}

/// Merge one query's ranked results, applying the per-rank penalty.
fn merge_ranked(merged: &mut HashMap<String, ScoredMemory>, results: Vec<ScoredMemory>) {
    for (rank, mut candidate) in results.into_iter().enumerate() {
        candidate.effective_score *= 1.0 - RANK_PENALTY * rank as f64;
        merge_candidate(merged, candidate);
    }
}

/// Keep the highest-effective-score variant per memory id.
fn merge_candidate(merged: &mut HashMap<String, ScoredMemory>, candidate: ScoredMemory) {
    match merged.entry(candidate.memory.id.clone()) {
        std::collections::hash_map::Entry::Occupied(mut slot) => {
            if candidate.effective_score > slot.get().effective_score {
                slot.insert(candidate);
            }
        }
        std::collections::hash_map::Entry::Vacant(slot) => {
            slot.insert(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memories::CreateMemoryInput;
    use serde_json::json;

    fn seeded_store() -> Store {
        let store = Store::in_memory().unwrap();
        for (id, text, importance) in [
            ("mem_color", "My favorite color is yellow", 80),
            ("mem_food", "I love pistachio ice cream", 60),
            ("mem_city", "I live in Lisbon", 70),
        ] {
            store
                .create_memory(CreateMemoryInput {
                    id: id.into(),
                    project_id: "proj".into(),
                    subject_id: "subj".into(),
                    text: text.into(),
                    importance: Some(importance),
                    ..Default::default()
                })
                .unwrap();
        }
        store
    }

    fn request(q: &str) -> SearchRequest {
        SearchRequest {
            project_id: "proj".into(),
            subject_id: "subj".into(),
            q: q.into(),
            limit: 25,
            min_score: 60.0,
            conversation_context: vec![],
            chat_id: None,
            message_index: 0,
        }
    }

    fn service_with_llm(store: Store, llm: LlmClient) -> RetrievalService {
        RetrievalService::new(store, Arc::new(Embedder::disabled()), Arc::new(llm), true)
    }

    #[tokio::test]
    async fn empty_query_short_circuits() {
        let service = service_with_llm(seeded_store(), LlmClient::disabled());
        let response = service.search(request("  ")).await.unwrap();
        assert!(response.memories.is_empty());
        assert_eq!(response.mode, RetrievalMode::Indirect);
        assert!(response.used_queries.is_empty());
    }

    #[tokio::test]
    async fn no_llm_means_simple_mode() {
        let service = service_with_llm(seeded_store(), LlmClient::disabled());
        let response = service.search(request("favorite color")).await.unwrap();
        assert_eq!(response.mode, RetrievalMode::Simple);
        assert_eq!(response.used_queries, vec!["favorite color"]);
        assert_eq!(response.memories[0].memory.id, "mem_color");
    }

    #[tokio::test]
    async fn expansion_disabled_means_simple_mode() {
        let store = seeded_store();
        let llm = LlmClient::scripted(vec![Some(json!({"mode": "broad"}))]);
        let service =
            RetrievalService::new(store, Arc::new(Embedder::disabled()), Arc::new(llm), false);
        let response = service.search(request("anything about me")).await.unwrap();
        assert_eq!(response.mode, RetrievalMode::Simple);
    }

    #[tokio::test]
    async fn broad_mode_lists_by_importance() {
        let llm = LlmClient::scripted(vec![Some(json!({"mode": "broad"}))]);
        let service = service_with_llm(seeded_store(), llm);
        let response = service.search(request("tell me about me")).await.unwrap();

        assert_eq!(response.mode, RetrievalMode::Broad);
        let ids: Vec<&str> = response.memories.iter().map(|m| m.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["mem_color", "mem_city", "mem_food"]);
        assert_eq!(response.memories[0].score, 100.0);
        assert_eq!(response.memories[0].effective_score, 80.0);
    }

    #[tokio::test]
    async fn classifier_failure_defaults_to_indirect() {
        let llm = LlmClient::scripted(vec![None]);
        let service = service_with_llm(seeded_store(), llm);
        let response = service.search(request("favorite color")).await.unwrap();
        assert_eq!(response.mode, RetrievalMode::Indirect);
        assert_eq!(response.used_queries, vec!["favorite color"]);
    }

    #[tokio::test]
    async fn direct_mode_uses_hints_and_caps_query_set() {
        let llm = LlmClient::scripted(vec![Some(json!({
            "mode": "direct",
            "search_hints": ["color preference", "favorite color", "preferred hue",
                             "hue choice", "color liking", "shade preference", "extra hint"],
        }))]);
        let service = service_with_llm(seeded_store(), llm);
        let response = service.search(request("favorite color")).await.unwrap();

        assert_eq!(response.mode, RetrievalMode::Direct);
        // original + capped hints (classifier arrays are capped at 3)
        assert_eq!(
            response.used_queries,
            vec!["favorite color", "color preference", "preferred hue"]
        );
        assert!(response
            .memories
            .iter()
            .any(|m| m.memory.id == "mem_color"));
    }

    #[tokio::test]
    async fn direct_mode_claim_backed_rows_win() {
        let store = seeded_store();
        store
            .create_claim(crate::store::claims::CreateClaimInput {
                claim_id: "clm_color".into(),
                project_id: "proj".into(),
                subject_id: "subj".into(),
                predicate: "favorite_color".into(),
                object_value: "yellow".into(),
                slot: "favorite_color".into(),
                claim_type: "preference".into(),
                source_memory_id: Some("mem_color".into()),
                ..Default::default()
            })
            .unwrap();

        let llm = LlmClient::scripted(vec![Some(json!({
            "mode": "direct",
            "predicates": ["favorite_color"],
        }))]);
        let service = service_with_llm(store, llm);
        let response = service.search(request("favorite color")).await.unwrap();

        assert_eq!(response.predicates, vec!["favorite_color"]);
        assert_eq!(response.memories[0].memory.id, "mem_color");
        assert_eq!(response.memories[0].score, 100.0);
        assert_eq!(response.memories[0].effective_score, 120.0);
        // claim-backed trigger caps the result set at min(limit, 5)
        assert!(response.memories.len() <= 5);
    }

    #[tokio::test]
    async fn claim_backed_skips_deleted_source_memory() {
        let store = seeded_store();
        store
            .create_claim(crate::store::claims::CreateClaimInput {
                claim_id: "clm_color".into(),
                project_id: "proj".into(),
                subject_id: "subj".into(),
                predicate: "favorite_color".into(),
                object_value: "yellow".into(),
                slot: "favorite_color".into(),
                claim_type: "preference".into(),
                source_memory_id: Some("mem_color".into()),
                ..Default::default()
            })
            .unwrap();
        store.delete_memory("proj", "mem_color").unwrap();

        let llm = LlmClient::scripted(vec![Some(json!({
            "mode": "direct",
            "predicates": ["favorite_color"],
        }))]);
        let service = service_with_llm(store, llm);
        let response = service.search(request("favorite color")).await.unwrap();
        assert!(!response.memories.iter().any(|m| m.effective_score == 120.0));
    }

    #[tokio::test]
    async fn recalls_recorded_when_chat_id_present() {
        let store = seeded_store();
        let service = service_with_llm(store.clone(), LlmClient::disabled());
        let mut req = request("favorite color");
        req.chat_id = Some("chat_1".into());
        req.message_index = 3;

        let response = service.search(req).await.unwrap();
        assert!(!response.memories.is_empty());

        let recalls = store.recalls_by_chat("proj", "chat_1").unwrap();
        assert_eq!(recalls.len(), response.memories.len());
        assert_eq!(recalls[0].message_index, 3);
        assert_eq!(recalls[0].request_type, "simple");
    }

    #[test]
    fn query_set_dedupes_and_caps() {
        let hints = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let expansions = vec!["c".to_string(), "d".to_string(), "e".to_string(), "f".to_string()];
        let set = build_query_set("a", &[&hints, &expansions]);
        assert_eq!(set, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn merge_keeps_best_variant_with_rank_penalty() {
        let store = seeded_store();
        let memory = store.get_memory("proj", "mem_color").unwrap().unwrap();

        let mut merged = HashMap::new();
        merge_ranked(
            &mut merged,
            vec![
                ScoredMemory {
                    memory: memory.clone(),
                    score: 90.0,
                    effective_score: 100.0,
                },
            ],
        );
        // rank 0 → no penalty
        assert_eq!(merged["mem_color"].effective_score, 100.0);

        merge_ranked(
            &mut merged,
            vec![
                ScoredMemory {
                    memory: store.get_memory("proj", "mem_food").unwrap().unwrap(),
                    score: 0.0,
                    effective_score: 50.0,
                },
                ScoredMemory {
                    memory,
                    score: 95.0,
                    effective_score: 200.0,
                },
            ],
        );
        // rank 1 → ×0.97, still beats the previous 100
        assert!((merged["mem_color"].effective_score - 194.0).abs() < 1e-9);
        assert_eq!(merged["mem_food"].effective_score, 50.0);
    }
}
