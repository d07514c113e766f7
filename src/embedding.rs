//! Text-to-vector embedding capability.
//!
//! The embedder is an opaque injected dependency: `embed(text)` returns a
//! vector or an empty `Vec` — never an error. Provider variants are tagged
//! values, not a trait hierarchy; a missing API key yields the `Disabled`
//! variant and every write path degrades gracefully to lexical-only search.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::store::l2_normalize;

/// Number of dimensions in the embedding vectors.
pub const EMBEDDING_DIM: usize = 1536;

/// Outbound request timeout for the embeddings endpoint.
const EMBED_TIMEOUT: Duration = Duration::from_secs(10);

enum Provider {
    /// OpenAI-compatible `/embeddings` endpoint.
    Remote {
        client: reqwest::Client,
        api_url: String,
        api_key: String,
        model: String,
    },
    /// No API key configured: every call returns empty.
    Disabled,
    /// Deterministic text → vector table for tests.
    Fixture(HashMap<String, Vec<f32>>),
}

/// Shared embedding capability.
pub struct Embedder {
    provider: Provider,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl Embedder {
    /// Build from config. The API key is read from the configured env var;
    /// when unset the embedder is disabled rather than failing startup.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        match std::env::var(&config.api_key_env) {
            Ok(api_key) if !api_key.is_empty() => {
                let client = reqwest::Client::builder()
                    .timeout(EMBED_TIMEOUT)
                    .build()
                    .expect("reqwest client");
                tracing::info!(model = %config.model, "embedder ready");
                Self {
                    provider: Provider::Remote {
                        client,
                        api_url: config.api_url.trim_end_matches('/').to_string(),
                        api_key,
                        model: config.model.clone(),
                    },
                    model: config.model.clone(),
                }
            }
            _ => {
                tracing::info!(
                    env = %config.api_key_env,
                    "no embedding API key — embedder disabled, retrieval degrades to lexical"
                );
                Self {
                    provider: Provider::Disabled,
                    model: "disabled".into(),
                }
            }
        }
    }

    /// A disabled embedder (always returns empty).
    pub fn disabled() -> Self {
        Self {
            provider: Provider::Disabled,
            model: "disabled".into(),
        }
    }

    /// A fixture embedder mapping exact texts to vectors. Unknown texts
    /// return empty. Vectors are normalized on the way out.
    pub fn fixture(entries: HashMap<String, Vec<f32>>) -> Self {
        Self {
            provider: Provider::Fixture(entries),
            model: "fixture".into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.provider, Provider::Disabled)
    }

    /// Display string for observability only.
    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed text. Returns an L2-normalized vector, or empty on any failure —
    /// callers treat empty as "no embedding" and proceed.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        match &self.provider {
            Provider::Disabled => Vec::new(),
            Provider::Fixture(entries) => {
                let mut v = entries.get(text).cloned().unwrap_or_default();
                l2_normalize(&mut v);
                v
            }
            Provider::Remote {
                client,
                api_url,
                api_key,
                model,
            } => {
                let body = serde_json::json!({ "model": model, "input": text });
                let url = format!("{api_url}/embeddings");
                let response = match client
                    .post(&url)
                    .header("Authorization", format!("Bearer {api_key}"))
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("embedding request failed: {e}");
                        return Vec::new();
                    }
                };
                if !response.status().is_success() {
                    warn!(status = %response.status(), "embedding endpoint returned error");
                    return Vec::new();
                }
                let parsed: EmbeddingsResponse = match response.json().await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("embedding response unparseable: {e}");
                        return Vec::new();
                    }
                };
                let Some(row) = parsed.data.into_iter().next() else {
                    warn!("embedding response had no rows");
                    return Vec::new();
                };
                if row.embedding.len() != EMBEDDING_DIM {
                    warn!(
                        got = row.embedding.len(),
                        expected = EMBEDDING_DIM,
                        "embedding dimensionality mismatch — dropping vector"
                    );
                    return Vec::new();
                }
                let mut v = row.embedding;
                l2_normalize(&mut v);
                debug!(len = v.len(), "embedded text");
                v
            }
        }
    }
}
