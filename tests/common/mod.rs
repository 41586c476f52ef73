// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::{routing::post, Json, Router};
use docgate::bootstrap::assemble_state;
use docgate::config::Config;
use docgate::db::{FirestoreDb, RecordStore};
use docgate::models::{Tier, User};
use docgate::routes::create_router;
use docgate::services::{
    GoogleOAuthClient, GoogleOidcVerifier, IdentityAdapter, SessionClaims, StripeClient,
};
use docgate::AppState;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use std::sync::Arc;

/// Key shared by the static ID token verifier and [`sign_id_token`].
#[allow(dead_code)]
pub const ID_TOKEN_SECRET: &[u8] = b"test_id_token_secret";
#[allow(dead_code)]
pub const ID_TOKEN_KID: &str = "test-kid";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app over the in-memory store.
///
/// The Google token endpoint points at a closed port; use
/// [`create_test_app_with_token_url`] for flows that reach it.
#[allow(dead_code)]
pub fn create_test_app() -> (Router, Arc<AppState>) {
    create_test_app_with_token_url("http://127.0.0.1:9/token")
}

/// Create a test app whose Google token endpoint is `token_url`.
#[allow(dead_code)]
pub fn create_test_app_with_token_url(token_url: &str) -> (Router, Arc<AppState>) {
    let mut config = Config::test_default();
    config.free_tier_document_limit = 2;

    let oauth = GoogleOAuthClient::with_token_url(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.google_redirect_uri.clone(),
        token_url,
    );
    let verifier = GoogleOidcVerifier::new_with_static_key(
        &config.google_client_id,
        ID_TOKEN_KID,
        Algorithm::HS256,
        DecodingKey::from_secret(ID_TOKEN_SECRET),
    )
    .expect("static verifier");
    let identity = IdentityAdapter::new(oauth, verifier);
    // Nothing in the tests reaches Stripe over the network.
    let billing = StripeClient::with_base_url(
        config.stripe_secret_key.clone(),
        "http://127.0.0.1:9",
    );

    let state = Arc::new(
        assemble_state(config, RecordStore::in_memory(), identity, billing)
            .expect("assemble test state"),
    );

    (create_router(state.clone()), state)
}

/// Store a user with the given tier and return it.
#[allow(dead_code)]
pub async fn create_user(state: &AppState, email: &str, tier: Tier) -> User {
    let now = chrono::Utc::now().to_rfc3339();
    let mut user = User::new(uuid::Uuid::new_v4().to_string(), email, &now);
    user.tier = tier;
    state.store.create_user(&user).await.unwrap()
}

/// Issue a session credential for `user`.
#[allow(dead_code)]
pub fn session_for(state: &AppState, user: &User) -> String {
    state
        .sessions
        .issue(&SessionClaims {
            user_id: user.id.clone(),
            email: user.email.clone(),
            session_id: uuid::Uuid::new_v4().to_string(),
            tier: user.tier,
        })
        .unwrap()
}

/// Sign an ID token the static verifier accepts.
#[allow(dead_code)]
pub fn sign_id_token(sub: &str, email: &str, email_verified: bool) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "iss": "https://accounts.google.com",
        "aud": Config::test_default().google_client_id,
        "sub": sub,
        "email": email,
        "email_verified": email_verified,
        "iat": now,
        "exp": now + 3600,
    });
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(ID_TOKEN_KID.to_string());
    encode(&header, &claims, &EncodingKey::from_secret(ID_TOKEN_SECRET)).unwrap()
}

/// Serve `body` from a local fake token endpoint and return its URL.
#[allow(dead_code)]
pub async fn spawn_fake_token_endpoint(body: serde_json::Value) -> String {
    let app = Router::new().route(
        "/token",
        post(move || {
            let body = body.clone();
            async move { Json(body) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/token", addr)
}
