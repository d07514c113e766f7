//! Test utilities — deterministic fixtures shared by unit and integration
//! tests. Nothing here touches the network.

use std::collections::HashMap;
use std::sync::Arc;

use crate::claims::ClaimService;
use crate::embedding::{Embedder, EMBEDDING_DIM};
use crate::events::EventBus;
use crate::extract::Extractor;
use crate::http::AppState;
use crate::llm::LlmClient;
use crate::memory::MemoryService;
use crate::retrieval::RetrievalService;
use crate::store::Store;

/// Unit vector with a spike at `dim`. Distinct dims are orthogonal.
pub fn unit_embedding(dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[dim % EMBEDDING_DIM] = 1.0;
    v
}

/// Unit vector with the given cosine similarity to `unit_embedding(0)`.
pub fn embedding_at_cosine(cos: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[0] = cos;
    v[1] = (1.0 - cos * cos).sqrt();
    v
}

/// Build a fixture embedder from (text, vector) pairs.
pub fn fixture_embedder(entries: &[(&str, Vec<f32>)]) -> Arc<Embedder> {
    let map: HashMap<String, Vec<f32>> = entries
        .iter()
        .map(|(text, vector)| (text.to_string(), vector.clone()))
        .collect();
    Arc::new(Embedder::fixture(map))
}

/// Fully wired application state over an in-memory database.
///
/// `llm` responses are popped in call order (see [`LlmClient::scripted`]);
/// pass an empty vec for a client whose every call fails over to fallbacks.
pub fn test_state(embedder: Arc<Embedder>, llm: LlmClient, expand: bool) -> AppState {
    let store = Store::in_memory().expect("in-memory store");
    let bus = EventBus::new();
    let llm = Arc::new(llm);
    let claims = Arc::new(ClaimService::new(store.clone()));
    let extractor = Arc::new(Extractor::new(Arc::clone(&llm)));

    let memories = Arc::new(MemoryService::new(
        store.clone(),
        Arc::clone(&embedder),
        Arc::clone(&extractor),
        Arc::clone(&claims),
        bus.clone(),
        85.0,
        60.0,
        85.0,
    ));
    let retrieval = Arc::new(RetrievalService::new(
        store.clone(),
        embedder,
        Arc::clone(&llm),
        expand,
    ));

    AppState {
        memories,
        claims,
        retrieval,
        store,
        bus,
        default_project: Some("proj_test".into()),
        default_limit: 25,
    }
}
