// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Document access ledger and quota snapshot models.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use super::Tier;

/// One user's access history for one document.
///
/// Unique per `(user_id, document_id)`; revisits only bump `last_accessed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "extension/src/generated/")
)]
pub struct DocumentAccessRecord {
    pub user_id: String,
    pub document_id: String,
    #[serde(default)]
    pub document_title: Option<String>,
    pub first_accessed_at: String,
    pub last_accessed_at: String,
}

impl DocumentAccessRecord {
    pub fn new(user_id: &str, document_id: &str, title: Option<String>, now: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            document_id: document_id.to_string(),
            document_title: title,
            first_accessed_at: now.to_string(),
            last_accessed_at: now.to_string(),
        }
    }

    /// Firestore document ID. Document IDs may contain `/`, so encode them.
    pub fn doc_id(user_id: &str, document_id: &str) -> String {
        format!("{}_{}", user_id, urlencoding::encode(document_id))
    }
}

/// Entitlement snapshot returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "extension/src/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub tier: Tier,
    pub document_count: u32,
    /// None means unlimited (paid tier)
    pub remaining_documents: Option<u32>,
}

impl UserStatus {
    pub fn new(tier: Tier, document_count: u32, limit: u32) -> Self {
        let remaining_documents = match tier {
            Tier::Paid => None,
            Tier::Free => Some(limit.saturating_sub(document_count)),
        };
        Self {
            tier,
            document_count,
            remaining_documents,
        }
    }
}
