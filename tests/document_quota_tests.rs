// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Free-tier document quota through the HTTP surface.
//!
//! The test app uses a limit of 2 documents.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use docgate::models::{Tier, UserPatch};
use docgate::time_utils::now_rfc3339;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::{create_test_app, create_user, session_for};

async fn open(app: &Router, token: &str, document_id: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/documents/access")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "documentId": document_id, "documentTitle": "Doc" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_json(app: &Router, token: &str, uri: &str) -> Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn free_user_is_stopped_at_the_limit() {
    let (app, state) = create_test_app();
    let user = create_user(&state, "free@example.com", Tier::Free).await;
    let token = session_for(&state, &user);

    let (status, body) = open(&app, &token, "doc-a").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isNewDocument"], true);
    assert_eq!(body["userStatus"]["remainingDocuments"], 1);
    assert_eq!(body["documentAccess"]["document_id"], "doc-a");

    let (status, body) = open(&app, &token, "doc-b").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userStatus"]["remainingDocuments"], 0);

    let (status, body) = open(&app, &token, "doc-c").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "quota_exceeded");
    assert_eq!(body["userStatus"]["tier"], "free");
    assert_eq!(body["userStatus"]["documentCount"], 2);
    assert_eq!(body["userStatus"]["remainingDocuments"], 0);

    // Revisiting an already-opened document is always allowed.
    let (status, body) = open(&app, &token, "doc-a").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isNewDocument"], false);
}

#[tokio::test]
async fn paid_user_has_no_limit() {
    let (app, state) = create_test_app();
    let user = create_user(&state, "paid@example.com", Tier::Paid).await;
    let token = session_for(&state, &user);

    for i in 0..5 {
        let (status, body) = open(&app, &token, &format!("doc-{}", i)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["userStatus"]["remainingDocuments"].is_null());
    }

    let status = get_json(&app, &token, "/documents/status").await;
    assert_eq!(status["tier"], "paid");
    assert_eq!(status["documentCount"], 5);
}

#[tokio::test]
async fn upgrade_applies_without_a_new_session() {
    let (app, state) = create_test_app();
    let user = create_user(&state, "upgrade@example.com", Tier::Free).await;
    // Credential minted while the user was free.
    let token = session_for(&state, &user);

    open(&app, &token, "doc-a").await;
    open(&app, &token, "doc-b").await;
    assert_eq!(open(&app, &token, "doc-c").await.0, StatusCode::FORBIDDEN);

    let upgrade = UserPatch {
        tier: Some(Tier::Paid),
        ..UserPatch::at(&now_rfc3339())
    };
    state.store.patch_user(&user.id, &upgrade).await.unwrap();

    let (status, body) = open(&app, &token, "doc-c").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userStatus"]["tier"], "paid");
}

#[tokio::test]
async fn list_is_most_recent_first() {
    let (app, state) = create_test_app();
    let user = create_user(&state, "list@example.com", Tier::Free).await;
    let token = session_for(&state, &user);

    open(&app, &token, "first").await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    open(&app, &token, "second").await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    open(&app, &token, "first").await;

    let body = get_json(&app, &token, "/documents/list").await;
    let ids: Vec<&str> = body["documents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["document_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["first", "second"]);
    assert_eq!(body["userStatus"]["documentCount"], 2);
}

#[tokio::test]
async fn empty_document_id_is_rejected() {
    let (app, state) = create_test_app();
    let user = create_user(&state, "empty@example.com", Tier::Free).await;
    let token = session_for(&state, &user);

    let (status, body) = open(&app, &token, "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}
