// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Document access routes (require authentication).

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{DocumentAccessRecord, UserStatus};
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// Document routes. The auth middleware is applied in routes/mod.rs.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/documents/access", post(access_document))
        .route("/documents/list", get(list_documents))
        .route("/documents/status", get(user_status))
}

/// Request to open a document.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    #[validate(length(min = 1, max = 512))]
    pub document_id: String,
    #[serde(default)]
    #[validate(length(max = 1024))]
    pub document_title: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "extension/src/generated/")
)]
pub struct AccessResponse {
    pub document_access: DocumentAccessRecord,
    pub user_status: UserStatus,
    pub is_new_document: bool,
}

/// Check the quota and record the access.
///
/// Denial is a 403 `quota_exceeded` carrying the current `userStatus`.
async fn access_document(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AccessRequest>,
) -> Result<Json<AccessResponse>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let decision = state
        .access
        .check_access(&user.user_id, &body.document_id, body.document_title)
        .await?;

    let Some(record) = decision.record.filter(|_| decision.granted) else {
        return Err(AppError::QuotaExceeded(decision.status));
    };

    Ok(Json(AccessResponse {
        document_access: record,
        user_status: decision.status,
        is_new_document: decision.is_new_document,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentAccessRecord>,
    pub user_status: UserStatus,
}

/// Caller's documents, most recently opened first.
async fn list_documents(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<DocumentListResponse>> {
    let documents = state.store.list_document_access(&user.user_id).await?;
    let user_status = state.access.user_status(&user.user_id).await?;
    Ok(Json(DocumentListResponse {
        documents,
        user_status,
    }))
}

async fn user_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserStatus>> {
    Ok(Json(state.access.user_status(&user.user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_request_validation() {
        let ok: AccessRequest =
            serde_json::from_str(r#"{"documentId":"1AbC","documentTitle":"Notes"}"#).unwrap();
        assert!(ok.validate().is_ok());

        let empty: AccessRequest = serde_json::from_str(r#"{"documentId":""}"#).unwrap();
        assert!(empty.validate().is_err());

        let long = AccessRequest {
            document_id: "x".repeat(513),
            document_title: None,
        };
        assert!(long.validate().is_err());
    }
}
