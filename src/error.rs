// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use crate::models::UserStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    /// Signature, expiry, and nonce failures all collapse into this.
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Identity verification failed: {0}")]
    VerificationFailed(String),

    #[error("Identity provider did not return a refresh credential")]
    NoRefreshCredential,

    #[error("Stored refresh credential failed its integrity check")]
    CredentialCorrupted,

    #[error("Free tier document limit reached")]
    QuotaExceeded(UserStatus),

    #[error("Webhook signature verification failed: {0}")]
    WebhookSignatureInvalid(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Billing API error: {0}")]
    BillingApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True for failures that end the user's session chain and require a
    /// fresh Google sign-in.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            AppError::InvalidToken | AppError::CredentialCorrupted | AppError::NoRefreshCredential
        )
    }
}

/// JSON error response body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_status: Option<UserStatus>,
    /// Tells the client to drop its session and run Google sign-in again.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    reauthenticate: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let reauthenticate = self.requires_reauthentication();
        let mut user_status = None;
        let (status, error, details) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::ExchangeFailed(msg) => {
                tracing::warn!(error = %msg, "Authorization code exchange failed");
                (StatusCode::UNAUTHORIZED, "authentication_failed", None)
            }
            AppError::VerificationFailed(msg) => {
                tracing::warn!(error = %msg, "ID token verification failed");
                (StatusCode::UNAUTHORIZED, "authentication_failed", None)
            }
            AppError::NoRefreshCredential => (
                StatusCode::UNAUTHORIZED,
                "no_refresh_credential",
                Some("Re-consent is required to complete sign-in".to_string()),
            ),
            AppError::CredentialCorrupted => (
                StatusCode::UNAUTHORIZED,
                "reauthentication_required",
                None,
            ),
            AppError::QuotaExceeded(status) => {
                user_status = Some(status);
                (
                    StatusCode::FORBIDDEN,
                    "quota_exceeded",
                    Some("Free tier document limit reached".to_string()),
                )
            }
            AppError::WebhookSignatureInvalid(msg) => {
                tracing::warn!(error = %msg, "Rejected webhook with invalid signature");
                (StatusCode::BAD_REQUEST, "invalid_signature", None)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg)),
            AppError::BillingApi(msg) => {
                tracing::error!(error = %msg, "Billing API error");
                (StatusCode::BAD_GATEWAY, "billing_error", None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
            user_status,
            reauthenticate,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
