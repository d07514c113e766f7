#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use engram::embedding::Embedder;
use engram::http::{router, AppState};
use engram::llm::LlmClient;
use engram::testing;

pub use engram::testing::{embedding_at_cosine, fixture_embedder, unit_embedding};

/// App state over an in-memory database with a disabled embedder and LLM.
pub fn plain_state() -> AppState {
    testing::test_state(Arc::new(Embedder::disabled()), LlmClient::disabled(), false)
}

/// App state with a fixture embedder (disabled LLM, no expansion).
pub fn embedded_state(entries: &[(&str, Vec<f32>)]) -> AppState {
    testing::test_state(fixture_embedder(entries), LlmClient::disabled(), false)
}

/// Send one request through the router and decode the JSON body.
pub async fn send(
    state: &AppState,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    send_with_project(state, method, uri, body, Some("proj_http")).await
}

/// Like [`send`] but with control over the `X-Project-Id` header.
pub async fn send_with_project(
    state: &AppState,
    method: Method,
    uri: &str,
    body: Option<Value>,
    project: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(project) = project {
        builder = builder.header("x-project-id", project);
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request build");

    let response = router(state.clone())
        .oneshot(request)
        .await
        .expect("router response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collect")
        .to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, json)
}

/// POST a minimal memory body; returns the decoded response.
pub async fn post_memory(state: &AppState, subject: &str, text: &str) -> (StatusCode, Value) {
    send(
        state,
        Method::POST,
        "/api/v1/memories",
        Some(serde_json::json!({
            "subject_id": subject,
            "text": text,
        })),
    )
    .await
}

/// POST a claim; returns the decoded response.
pub async fn post_claim(
    state: &AppState,
    subject: &str,
    predicate: &str,
    object_value: &str,
) -> (StatusCode, Value) {
    send(
        state,
        Method::POST,
        "/api/v1/claims",
        Some(serde_json::json!({
            "subject_id": subject,
            "predicate": predicate,
            "object_value": object_value,
        })),
    )
    .await
}
