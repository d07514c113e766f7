//! Extraction service — text → normalized memories and claims.
//!
//! Two variants share one output shape: a structured-JSON LLM call with a
//! hard 4-second deadline, and the deterministic pattern fallback in
//! [`heuristic`]. Any LLM failure (timeout, transport, bad JSON, empty or
//! invalid schema) falls through to the heuristic — extraction never errors.

pub mod heuristic;

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{JsonRequest, LlmClient};
use crate::store::types::{MemoryKind, Visibility};

/// Deadline for the extraction LLM call.
const EXTRACT_DEADLINE: Duration = Duration::from_secs(4);

/// Conversation context is capped to the most recent items.
const CONTEXT_CAP: usize = 5;

/// A claim derived from extracted text.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ExtractedClaim {
    pub predicate: String,
    pub object_value: String,
    #[serde(default = "default_claim_type")]
    pub claim_type: String,
    #[serde(default = "default_claim_confidence")]
    pub confidence: f64,
}

fn default_claim_type() -> String {
    "fact".into()
}

fn default_claim_confidence() -> f64 {
    0.8
}

/// One normalized memory produced by extraction.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ExtractedMemory {
    pub text: String,
    #[serde(default = "default_kind")]
    pub kind: MemoryKind,
    #[serde(default = "default_importance")]
    pub importance: i64,
    #[serde(default = "default_memory_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub is_temporal: bool,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub claims: Vec<ExtractedClaim>,
}

fn default_kind() -> MemoryKind {
    MemoryKind::Note
}

fn default_importance() -> i64 {
    50
}

fn default_memory_confidence() -> f64 {
    0.9
}

fn default_visibility() -> Visibility {
    Visibility::Private
}

/// Normalized extraction output.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct Extraction {
    #[serde(default)]
    pub memories: Vec<ExtractedMemory>,
}

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract durable memories and structured claims from user text.

Prefer durable information: stable facts, preferences, goals, traits, and recurring context. Skip small talk and transient chatter unless the force flag is set, in which case always produce at least one memory.

Respond with ONLY a JSON object in this exact shape:
{
  "memories": [
    {
      "text": "concise restatement of the durable information",
      "kind": "fact|preference|context|note|event|trait",
      "importance": 0-100,
      "confidence": 0.0-1.0,
      "is_temporal": false,
      "visibility": "private",
      "tags": ["optional", "tags"],
      "claims": [
        {
          "predicate": "snake_case_predicate",
          "object_value": "the value",
          "claim_type": "fact|preference|goal|event",
          "confidence": 0.0-1.0
        }
      ]
    }
  ]
}"#;

/// LLM-first extractor with the heuristic fallback baked in.
pub struct Extractor {
    llm: Arc<LlmClient>,
}

impl Extractor {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Extract memories and claims from text.
    ///
    /// `conversation_context` is truncated to the last 5 items and passed to
    /// the LLM for disambiguation only; the heuristic ignores it.
    pub async fn extract(
        &self,
        text: &str,
        conversation_context: &[serde_json::Value],
        force: bool,
    ) -> Extraction {
        if self.llm.is_enabled() {
            if let Some(extraction) = self.extract_with_llm(text, conversation_context, force).await
            {
                return extraction;
            }
            tracing::debug!("LLM extraction fell through to heuristic");
        }
        heuristic::extract(text, force)
    }

    async fn extract_with_llm(
        &self,
        text: &str,
        conversation_context: &[serde_json::Value],
        force: bool,
    ) -> Option<Extraction> {
        let context: Vec<&serde_json::Value> = conversation_context
            .iter()
            .rev()
            .take(CONTEXT_CAP)
            .rev()
            .collect();

        let user = serde_json::json!({
            "text": text,
            "force": force,
            "conversation_context": context,
        })
        .to_string();

        let response = self
            .llm
            .call_json(&JsonRequest {
                system: EXTRACTION_SYSTEM_PROMPT.to_string(),
                user,
                temperature: 0.1,
                deadline: EXTRACT_DEADLINE,
            })
            .await?;

        let extraction: Extraction = serde_json::from_value(response).ok()?;
        if extraction.memories.is_empty() {
            return None;
        }
        if extraction.memories.iter().any(|m| m.text.trim().is_empty()) {
            tracing::warn!("LLM extraction produced empty memory text — discarding");
            return None;
        }
        Some(extraction)
    }
}

/// Dedupe claims by (normalized predicate, lowercased value), preserving order.
pub fn dedupe_claims(claims: Vec<ExtractedClaim>) -> Vec<ExtractedClaim> {
    let mut seen: Vec<(String, String)> = Vec::new();
    let mut out = Vec::new();
    for mut claim in claims {
        claim.predicate = heuristic::normalize_predicate(&claim.predicate);
        if claim.predicate.is_empty() {
            continue;
        }
        let key = (claim.predicate.clone(), claim.object_value.to_lowercase());
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(claim);
    }
    out
}
