mod helpers;

use axum::http::{Method, StatusCode};
use helpers::{embedded_state, embedding_at_cosine, post_memory, send, unit_embedding};
use serde_json::json;

#[tokio::test]
async fn duplicate_post_skips_second_create() {
    let state = embedded_state(&[("My favorite color is yellow", unit_embedding(0))]);

    let (status, first) = post_memory(&state, "u", "My favorite color is yellow").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["created"], true);

    let (status, second) = post_memory(&state, "u", "My favorite color is yellow").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["created"], false);
    assert_eq!(second["skipped"], true);
    assert_eq!(second["reason"], "duplicate");
    assert!(second["id"].is_null());

    let (_, listed) = send(&state, Method::GET, "/api/v1/memories?subject_id=u", None).await;
    assert_eq!(listed["count"], 1);
}

#[tokio::test]
async fn no_supersede_flag_skips_duplicate_gate() {
    let state = embedded_state(&[("same words", unit_embedding(0))]);
    post_memory(&state, "u", "same words").await;

    let (status, body) = send(
        &state,
        Method::POST,
        "/api/v1/memories",
        Some(json!({ "subject_id": "u", "text": "same words", "no_supersede": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);
}

#[tokio::test]
async fn conflicting_create_supersedes_previous() {
    let state = embedded_state(&[
        ("My favorite color is yellow", unit_embedding(0)),
        ("Actually my favorite color is red now", embedding_at_cosine(0.72)),
    ]);

    let (_, first) = post_memory(&state, "u", "My favorite color is yellow").await;
    let first_id = first["id"].as_str().unwrap().to_string();

    let (status, second) =
        post_memory(&state, "u", "Actually my favorite color is red now").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["superseded_count"], 1);
    assert_eq!(second["superseded_ids"][0], first_id.as_str());
    let second_id = second["id"].as_str().unwrap().to_string();

    // default list hides the superseded row, includes the new one
    let (_, listed) = send(&state, Method::GET, "/api/v1/memories?subject_id=u", None).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["memories"][0]["id"], second_id.as_str());

    // the superseded listing shows the old one
    let (_, superseded) = send(
        &state,
        Method::GET,
        "/api/v1/memories/superseded?subject_id=u",
        None,
    )
    .await;
    assert_eq!(superseded["count"], 1);
    assert_eq!(superseded["memories"][0]["id"], first_id.as_str());
    assert_eq!(superseded["memories"][0]["superseded_by"], second_id.as_str());
}

#[tokio::test]
async fn restore_after_supersession() {
    let state = embedded_state(&[
        ("original preference", unit_embedding(0)),
        ("updated preference", embedding_at_cosine(0.75)),
    ]);

    let (_, first) = post_memory(&state, "u", "original preference").await;
    let first_id = first["id"].as_str().unwrap().to_string();
    post_memory(&state, "u", "updated preference").await;

    // restoring an already-active memory is a no-op
    let (_, second_list) = send(&state, Method::GET, "/api/v1/memories?subject_id=u", None).await;
    let active_id = second_list["memories"][0]["id"].as_str().unwrap().to_string();
    let (status, outcome) = send(
        &state,
        Method::POST,
        &format!("/api/v1/memories/{active_id}/restore"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["restored"], false);

    // restoring the superseded one brings it back and clears superseded_by
    let (status, outcome) = send(
        &state,
        Method::POST,
        &format!("/api/v1/memories/{first_id}/restore"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["restored"], true);
    assert_eq!(outcome["status"], "active");
    assert!(outcome["superseded_by"].is_null() || outcome.get("superseded_by").is_none());

    let (_, listed) = send(&state, Method::GET, "/api/v1/memories?subject_id=u", None).await;
    assert_eq!(listed["count"], 2);
}

#[tokio::test]
async fn restore_of_deleted_memory_is_400() {
    let state = embedded_state(&[]);
    let (_, created) = post_memory(&state, "u", "short lived").await;
    let id = created["id"].as_str().unwrap().to_string();
    send(&state, Method::DELETE, &format!("/api/v1/memories/{id}"), None).await;

    let (status, body) = send(
        &state,
        Method::POST,
        &format!("/api/v1/memories/{id}/restore"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "memory_deleted");
}

#[tokio::test]
async fn deleted_rows_hidden_from_list_and_search_but_not_get() {
    let state = embedded_state(&[]);
    let (_, created) = post_memory(&state, "u", "the yellow preference").await;
    let id = created["id"].as_str().unwrap().to_string();
    send(&state, Method::DELETE, &format!("/api/v1/memories/{id}"), None).await;

    let (_, listed) = send(&state, Method::GET, "/api/v1/memories?subject_id=u", None).await;
    assert_eq!(listed["count"], 0);

    let (_, searched) = send(
        &state,
        Method::GET,
        "/api/v1/memories/search?subject_id=u&q=yellow",
        None,
    )
    .await;
    assert_eq!(searched["memories"].as_array().unwrap().len(), 0);

    let (status, fetched) = send(&state, Method::GET, &format!("/api/v1/memories/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["is_deleted"], true);

    // include_deleted flips list visibility back on
    let (_, listed) = send(
        &state,
        Method::GET,
        "/api/v1/memories?subject_id=u&include_deleted=true",
        None,
    )
    .await;
    assert_eq!(listed["count"], 1);
}

#[tokio::test]
async fn deleted_memory_never_becomes_claim_source() {
    // The learn path re-runs create, whose duplicate/conflict gates only see
    // live rows; a deleted row with identical text must not block the create.
    let state = embedded_state(&[("I work at Acme", unit_embedding(3))]);
    let (_, created) = post_memory(&state, "u", "I work at Acme").await;
    let id = created["id"].as_str().unwrap().to_string();
    send(&state, Method::DELETE, &format!("/api/v1/memories/{id}"), None).await;

    let (status, body) = post_memory(&state, "u", "I work at Acme").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);
}
