// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Entitlement tier.
///
/// Older records used `premium`/`subscriber` for the paid tier; both still
/// deserialize as [`Tier::Paid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "extension/src/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    #[serde(alias = "premium", alias = "subscriber")]
    Paid,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Paid => "paid",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Tier::Paid)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User record stored in the `users` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Internal identifier (also used as document ID)
    pub id: String,
    /// Email address (unique, stored lowercased)
    pub email: String,
    /// OAuth subject from the identity provider; None for users created
    /// from a billing event before they ever signed in
    #[serde(default)]
    pub external_subject_id: Option<String>,
    #[serde(default)]
    pub tier: Tier,
    /// Stripe customer ID, set on first checkout
    #[serde(default)]
    pub billing_customer_id: Option<String>,
    #[serde(default)]
    pub billing_subscription_id: Option<String>,
    /// Most recently observed Stripe subscription status
    #[serde(default)]
    pub billing_status: Option<String>,
    /// Serialized `{iv, ciphertext, authTag}` triple
    #[serde(default)]
    pub encrypted_refresh_credential: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Build a brand-new free-tier user.
    pub fn new(id: String, email: &str, now: &str) -> Self {
        Self {
            id,
            email: normalize_email(email),
            external_subject_id: None,
            tier: Tier::Free,
            billing_customer_id: None,
            billing_subscription_id: None,
            billing_status: None,
            encrypted_refresh_credential: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }
}

/// Field-scoped change to a [`User`].
///
/// Only the fields that are set get written, so a credential write and a
/// billing write landing on the same user at the same time both survive.
/// Serializes to exactly the fields named by [`UserPatch::field_paths`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_refresh_credential: Option<String>,
    pub updated_at: String,
}

impl UserPatch {
    /// Empty patch stamped with `now`.
    pub fn at(now: &str) -> Self {
        Self {
            external_subject_id: None,
            tier: None,
            billing_customer_id: None,
            billing_subscription_id: None,
            billing_status: None,
            encrypted_refresh_credential: None,
            updated_at: now.to_string(),
        }
    }

    /// Stored field names this patch writes, `updated_at` included.
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::new();
        if self.external_subject_id.is_some() {
            paths.push("external_subject_id");
        }
        if self.tier.is_some() {
            paths.push("tier");
        }
        if self.billing_customer_id.is_some() {
            paths.push("billing_customer_id");
        }
        if self.billing_subscription_id.is_some() {
            paths.push("billing_subscription_id");
        }
        if self.billing_status.is_some() {
            paths.push("billing_status");
        }
        if self.encrypted_refresh_credential.is_some() {
            paths.push("encrypted_refresh_credential");
        }
        paths.push("updated_at");
        paths
    }

    /// True if applying the patch would leave `user` as it is, ignoring
    /// the timestamp.
    pub fn is_noop_for(&self, user: &User) -> bool {
        fn same<T: PartialEq>(patch: &Option<T>, current: &T) -> bool {
            patch.as_ref().is_none_or(|v| v == current)
        }
        fn same_opt<T: PartialEq>(patch: &Option<T>, current: &Option<T>) -> bool {
            patch.is_none() || patch.as_ref() == current.as_ref()
        }

        same_opt(&self.external_subject_id, &user.external_subject_id)
            && same(&self.tier, &user.tier)
            && same_opt(&self.billing_customer_id, &user.billing_customer_id)
            && same_opt(&self.billing_subscription_id, &user.billing_subscription_id)
            && same_opt(&self.billing_status, &user.billing_status)
            && same_opt(
                &self.encrypted_refresh_credential,
                &user.encrypted_refresh_credential,
            )
    }

    pub fn apply_to(&self, user: &mut User) {
        if let Some(v) = &self.external_subject_id {
            user.external_subject_id = Some(v.clone());
        }
        if let Some(tier) = self.tier {
            user.tier = tier;
        }
        if let Some(v) = &self.billing_customer_id {
            user.billing_customer_id = Some(v.clone());
        }
        if let Some(v) = &self.billing_subscription_id {
            user.billing_subscription_id = Some(v.clone());
        }
        if let Some(v) = &self.billing_status {
            user.billing_status = Some(v.clone());
        }
        if let Some(v) = &self.encrypted_refresh_credential {
            user.encrypted_refresh_credential = Some(v.clone());
        }
        user.updated_at = self.updated_at.clone();
    }
}

/// Canonical form used for uniqueness checks.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
