// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google sign-in routes.

use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{Tier, User, UserPatch};
use crate::services::google_oidc::VerifiedIdentity;
use crate::services::SessionClaims;
use crate::time_utils::{format_utc_rfc3339, now_rfc3339};
use crate::AppState;

/// Routes reachable without a session.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/google/callback", get(google_callback))
}

/// Routes that require a session (auth middleware applied in routes/mod.rs).
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/google/refresh-token", get(refresh_access_token))
        .route("/auth/logout", get(logout))
}

/// Query parameters on the OAuth redirect.
#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "extension/src/generated/")
)]
pub struct SessionUser {
    pub email: String,
    pub sub: String,
    pub tier: Tier,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "extension/src/generated/")
)]
pub struct AuthenticateResponse {
    pub success: bool,
    pub jwt_token: String,
    pub user: SessionUser,
}

/// OAuth callback - exchange code, verify identity, store the refresh
/// credential, and issue a session.
async fn google_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<AuthenticateResponse>> {
    if let Some(error) = params.error {
        return Err(AppError::ExchangeFailed(format!(
            "Google returned error: {}",
            error
        )));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Authorization code is required".to_string()))?;

    tracing::info!("Exchanging authorization code for tokens");
    let tokens = state.identity.exchange(&code).await?;

    let identity = state.identity.verify_identity(&tokens.id_token).await?;
    if !identity.email_verified {
        return Err(AppError::VerificationFailed(
            "email address is not verified".to_string(),
        ));
    }

    let user = upsert_signed_in_user(&state, &identity).await?;
    state
        .credentials
        .store(&user.id, &tokens.refresh_token)
        .await?;

    let jwt_token = state.sessions.issue(&SessionClaims {
        user_id: user.id.clone(),
        email: user.email.clone(),
        session_id: uuid::Uuid::new_v4().to_string(),
        tier: user.tier,
    })?;

    tracing::info!(user_id = %user.id, tier = %user.tier, "Sign-in complete");

    Ok(Json(AuthenticateResponse {
        success: true,
        jwt_token,
        user: SessionUser {
            email: user.email,
            sub: identity.subject_id,
            tier: user.tier,
        },
    }))
}

/// Find the user by email or create one, recording the Google subject.
async fn upsert_signed_in_user(state: &AppState, identity: &VerifiedIdentity) -> Result<User> {
    let now = now_rfc3339();

    let user = match state.store.find_user_by_email(&identity.email).await? {
        Some(user) => user,
        None => {
            let mut fresh = User::new(uuid::Uuid::new_v4().to_string(), &identity.email, &now);
            fresh.external_subject_id = Some(identity.subject_id.clone());
            // Returns the existing record if a concurrent request won.
            state.store.create_user(&fresh).await?
        }
    };

    if user.external_subject_id.as_deref() != Some(identity.subject_id.as_str()) {
        if let Some(previous) = &user.external_subject_id {
            tracing::warn!(
                user_id = %user.id,
                previous = %previous,
                "Google subject changed for existing email"
            );
        }
        let patch = UserPatch {
            external_subject_id: Some(identity.subject_id.clone()),
            ..UserPatch::at(&now)
        };
        return state
            .store
            .patch_user(&user.id, &patch)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user.id)));
    }

    Ok(user)
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "extension/src/generated/")
)]
pub struct RefreshTokenResponse {
    pub success: bool,
    pub access_token: String,
    pub expires_in: i64,
    pub expiry_time: String,
    pub email: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Exchange the stored refresh credential for a fresh Google access token.
async fn refresh_access_token(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<RefreshTokenResponse>> {
    let refresh_token = match state.credentials.retrieve(&user.user_id).await {
        Ok(token) => token,
        Err(AppError::NotFound(_)) => return Err(AppError::NoRefreshCredential),
        Err(e) => return Err(e),
    };

    let refreshed = state.identity.refresh(&refresh_token).await?;

    if let Some(rotated) = &refreshed.rotated_refresh_token {
        state.credentials.store(&user.user_id, rotated).await?;
        tracing::info!(user_id = %user.user_id, "Stored rotated refresh credential");
    }

    let expiry_time = format_utc_rfc3339(Utc::now() + Duration::seconds(refreshed.expires_in));

    Ok(Json(RefreshTokenResponse {
        success: true,
        access_token: refreshed.access_token,
        expires_in: refreshed.expires_in,
        expiry_time,
        email: user.email,
        user_id: user.user_id,
    }))
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Sessions live only in the client; this acknowledges the logout.
async fn logout(Extension(user): Extension<AuthUser>) -> Json<LogoutResponse> {
    tracing::info!(user_id = %user.user_id, session_id = %user.session_id, "Logout");
    Json(LogoutResponse { success: true })
}
