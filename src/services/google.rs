// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google OAuth client and the identity exchange adapter.
//!
//! Handles:
//! - Authorization code exchange (single attempt; codes are single-use)
//! - ID token verification (via [`GoogleOidcVerifier`])
//! - Access token refresh, including refresh credential rotation

use crate::error::AppError;
use crate::services::google_oidc::{GoogleOidcVerifier, OidcError, VerifiedIdentity};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw response from Google's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Result of a successful code exchange.
#[derive(Debug, Clone)]
pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub expires_in: Option<i64>,
}

/// Result of a refresh grant.
#[derive(Debug, Clone)]
pub struct RefreshedAccess {
    pub access_token: String,
    pub expires_in: i64,
    /// Set when Google rotated the refresh credential.
    pub rotated_refresh_token: Option<String>,
}

/// Google OAuth token endpoint client.
#[derive(Clone)]
pub struct GoogleOAuthClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl GoogleOAuthClient {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self::with_token_url(client_id, client_secret, redirect_uri, GOOGLE_TOKEN_URL)
    }

    /// Point the client at a different token endpoint (local fakes in tests).
    pub fn with_token_url(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        token_url: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            token_url: token_url.into(),
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::ExchangeFailed(format!("Token exchange failed: {}", e)))?;

        check_token_response(response).await
    }

    /// Obtain a fresh access token with a stored refresh credential.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::ExchangeFailed(format!("Token refresh request failed: {}", e)))?;

        check_token_response(response).await
    }
}

async fn check_token_response(response: reqwest::Response) -> Result<TokenResponse, AppError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, "Google token endpoint rejected request");
        return Err(AppError::ExchangeFailed(format!(
            "Token endpoint returned status {}",
            status
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::ExchangeFailed(format!("Failed to parse token response: {}", e)))
}

/// Require the pieces a login cannot proceed without.
///
/// Google omits the refresh token on repeat consent; that aborts the login.
pub fn require_login_tokens(response: TokenResponse) -> Result<ExchangedTokens, AppError> {
    let refresh_token = response
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or(AppError::NoRefreshCredential)?;

    let id_token = response
        .id_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::ExchangeFailed("No ID token in exchange response".to_string()))?;

    Ok(ExchangedTokens {
        access_token: response.access_token,
        refresh_token,
        id_token,
        expires_in: response.expires_in,
    })
}

/// Identity exchange adapter: code exchange plus ID token verification.
#[derive(Clone)]
pub struct IdentityAdapter {
    oauth: GoogleOAuthClient,
    verifier: Arc<GoogleOidcVerifier>,
}

impl IdentityAdapter {
    pub fn new(oauth: GoogleOAuthClient, verifier: GoogleOidcVerifier) -> Self {
        Self {
            oauth,
            verifier: Arc::new(verifier),
        }
    }

    /// Exchange an authorization code. Not retried.
    pub async fn exchange(&self, code: &str) -> Result<ExchangedTokens, AppError> {
        let response = self.oauth.exchange_code(code).await?;
        require_login_tokens(response)
    }

    pub async fn verify_identity(&self, id_token: &str) -> Result<VerifiedIdentity, AppError> {
        self.verifier
            .verify_id_token(id_token)
            .await
            .map_err(|e| match e {
                OidcError::Rejected(msg) => AppError::VerificationFailed(msg),
                OidcError::Transient(msg) => {
                    AppError::VerificationFailed(format!("key retrieval failed: {}", msg))
                }
            })
    }

    /// Refresh the Google access token for a user.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedAccess, AppError> {
        let response = self.oauth.refresh_access_token(refresh_token).await?;

        let rotated_refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty() && t != refresh_token);

        Ok(RefreshedAccess {
            access_token: response.access_token,
            expires_in: response.expires_in.unwrap_or(3600),
            rotated_refresh_token,
        })
    }
}
