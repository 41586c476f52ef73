// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session credential authentication middleware.
//!
//! The credential travels only in `Authorization: Bearer <token>`. When the
//! credential is close to expiry, a replacement is returned in the
//! [`SESSION_TOKEN_HEADER`] response header.

use crate::error::AppError;
use crate::models::Tier;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Response header carrying a renewed session credential.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Authenticated user extracted from the session credential.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub session_id: String,
    /// Tier snapshot from the credential; not used for entitlement checks.
    pub tier: Tier,
}

/// Middleware that requires a valid session credential.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?.to_string();

    let claims = state.sessions.verify(&token)?;

    let renewed = match state.sessions.renew_if_needed(&token) {
        Ok(renewed) => renewed,
        Err(e) => {
            tracing::warn!(user_id = %claims.user_id, error = %e, "Session renewal failed");
            None
        }
    };

    request.extensions_mut().insert(AuthUser {
        user_id: claims.user_id,
        email: claims.email,
        session_id: claims.session_id,
        tier: claims.tier,
    });

    let mut response = next.run(request).await;

    if let Some(renewed) = renewed {
        match HeaderValue::from_str(&renewed) {
            Ok(value) => {
                response.headers_mut().insert(SESSION_TOKEN_HEADER, value);
            }
            Err(e) => tracing::error!(error = %e, "Renewed credential is not a valid header"),
        }
    }

    Ok(response)
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?
        .trim();

    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn extract_bearer_token_ok() {
        assert_eq!(extract_bearer_token(&headers("Bearer abc.def")).unwrap(), "abc.def");
    }

    #[test]
    fn extract_bearer_token_errors() {
        assert!(matches!(
            extract_bearer_token(&HeaderMap::new()),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            extract_bearer_token(&headers("Basic abc")),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            extract_bearer_token(&headers("Bearer ")),
            Err(AppError::Unauthorized)
        ));
    }
}
