//! LLM reranking for overflowing candidate pools.

use serde::Deserialize;
use std::time::Duration;

use crate::llm::{JsonRequest, LlmClient};
use crate::store::types::ScoredMemory;

/// Deadline for the rerank call.
const RERANK_DEADLINE: Duration = Duration::from_secs(3);

/// Candidates with text shorter than this are not worth reranking.
const MIN_RERANK_TEXT: usize = 10;

const RERANK_SYSTEM_PROMPT: &str = r#"You rank candidate memories by relevance to a query.

Respond with ONLY a JSON object:
{
  "results": [
    { "index": 0, "relevant": true, "score": 0.0-1.0 }
  ]
}
Include every candidate index exactly once. Mark "relevant": false for candidates that do not help answer the query."#;

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RerankEntry>,
}

#[derive(Debug, Deserialize)]
struct RerankEntry {
    index: i64,
    #[serde(default)]
    relevant: bool,
    #[serde(default)]
    score: f64,
}

/// Rerank `candidates` (already sorted by effective score) down to `top_k`.
///
/// Short-text candidates are filtered first; if few enough remain they pass
/// through untouched. On any LLM failure the first `top_k` of the filtered
/// pool are kept in fusion order. Winners get `score`/`effective_score`
/// raised to at least `rerank_score × 100`.
pub async fn rerank(
    llm: &LlmClient,
    query: &str,
    candidates: Vec<ScoredMemory>,
    top_k: usize,
) -> Vec<ScoredMemory> {
    let mut filtered: Vec<ScoredMemory> = candidates
        .into_iter()
        .filter(|c| c.memory.text.chars().count() >= MIN_RERANK_TEXT)
        .collect();

    if filtered.len() <= top_k {
        return filtered;
    }

    let listing: Vec<serde_json::Value> = filtered
        .iter()
        .enumerate()
        .map(|(index, c)| serde_json::json!({ "index": index, "text": c.memory.text }))
        .collect();
    let user = serde_json::json!({ "query": query, "candidates": listing }).to_string();

    let response = llm
        .call_json(&JsonRequest {
            system: RERANK_SYSTEM_PROMPT.to_string(),
            user,
            temperature: 0.0,
            deadline: RERANK_DEADLINE,
        })
        .await;

    let parsed = response.and_then(|v| serde_json::from_value::<RerankResponse>(v).ok());
    let Some(parsed) = parsed else {
        tracing::debug!("rerank unavailable — keeping fusion order");
        filtered.truncate(top_k);
        return filtered;
    };

    let mut ranked: Vec<RerankEntry> = parsed
        .results
        .into_iter()
        .filter(|e| e.relevant)
        .map(|mut e| {
            e.index = e.index.clamp(0, filtered.len() as i64 - 1);
            e
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);

    let mut winners = Vec::with_capacity(ranked.len());
    let mut taken = vec![false; filtered.len()];
    for entry in ranked {
        let index = entry.index as usize;
        if taken[index] {
            continue;
        }
        taken[index] = true;
        let mut winner = filtered[index].clone();
        let boosted = entry.score * 100.0;
        winner.score = winner.score.max(boosted);
        winner.effective_score = winner.effective_score.max(boosted);
        winners.push(winner);
    }
    winners
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memories::CreateMemoryInput;
    use crate::store::Store;
    use serde_json::json;

    fn candidates(count: usize) -> Vec<ScoredMemory> {
        let store = Store::in_memory().unwrap();
        (0..count)
            .map(|i| {
                let memory = store
                    .create_memory(CreateMemoryInput {
                        id: format!("mem_{i}"),
                        project_id: "proj".into(),
                        subject_id: "subj".into(),
                        text: format!("candidate memory number {i} with enough text"),
                        ..Default::default()
                    })
                    .unwrap();
                ScoredMemory {
                    memory,
                    score: 50.0,
                    effective_score: 100.0 - i as f64,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn small_pool_passes_through() {
        let llm = LlmClient::disabled();
        let result = rerank(&llm, "q", candidates(3), 5).await;
        assert_eq!(result.len(), 3);
    }

    #[tokio::test]
    async fn failure_keeps_fusion_order() {
        let llm = LlmClient::scripted(vec![None]);
        let result = rerank(&llm, "q", candidates(6), 3).await;
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].memory.id, "mem_0");
    }

    #[tokio::test]
    async fn relevant_entries_win_by_rerank_score() {
        let llm = LlmClient::scripted(vec![Some(json!({
            "results": [
                { "index": 4, "relevant": true, "score": 0.9 },
                { "index": 0, "relevant": true, "score": 0.4 },
                { "index": 1, "relevant": false, "score": 0.99 },
                { "index": 2, "relevant": true, "score": 0.7 },
            ]
        }))]);
        let result = rerank(&llm, "q", candidates(6), 2).await;

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].memory.id, "mem_4");
        assert_eq!(result[1].memory.id, "mem_2");
        // score boosted to rerank_score × 100; effective already above it
        assert_eq!(result[0].score, 90.0);
        assert_eq!(result[0].effective_score, 96.0);
    }

    #[tokio::test]
    async fn out_of_range_index_is_clamped() {
        let llm = LlmClient::scripted(vec![Some(json!({
            "results": [
                { "index": 99, "relevant": true, "score": 0.8 },
            ]
        }))]);
        let result = rerank(&llm, "q", candidates(6), 3).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].memory.id, "mem_5");
    }

    #[tokio::test]
    async fn short_text_filtered_before_rerank() {
        let store = Store::in_memory().unwrap();
        let short = store
            .create_memory(CreateMemoryInput {
                id: "mem_short".into(),
                project_id: "proj".into(),
                subject_id: "subj".into(),
                text: "tiny".into(),
                ..Default::default()
            })
            .unwrap();
        let mut pool = candidates(2);
        pool.push(ScoredMemory {
            memory: short,
            score: 99.0,
            effective_score: 999.0,
        });

        let llm = LlmClient::disabled();
        let result = rerank(&llm, "q", pool, 5).await;
        assert!(!result.iter().any(|c| c.memory.id == "mem_short"));
    }
}
