// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Encrypted storage for users' Google refresh credentials.
//!
//! Plaintext credentials never reach the record store. Each ciphertext is
//! bound to its owner through the AAD `user_id:{id}`, so a value copied
//! onto another user's record fails to decrypt.

use crate::db::RecordStore;
use crate::error::AppError;
use crate::models::UserPatch;
use crate::services::encryption::{EncryptedSecret, EncryptionService};
use crate::time_utils::now_rfc3339;

/// Per-user refresh credential store.
#[derive(Clone)]
pub struct CredentialStore {
    store: RecordStore,
    crypto: EncryptionService,
}

impl CredentialStore {
    pub fn new(store: RecordStore, crypto: EncryptionService) -> Self {
        Self { store, crypto }
    }

    /// Encrypt and persist, overwriting any previous credential.
    pub async fn store(&self, user_id: &str, refresh_credential: &str) -> Result<(), AppError> {
        let sealed = self
            .crypto
            .encrypt_str(refresh_credential, &aad_for(user_id))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Credential encryption failed: {}", e)))?;

        let patch = UserPatch {
            encrypted_refresh_credential: Some(sealed.to_field()),
            ..UserPatch::at(&now_rfc3339())
        };
        self.store
            .patch_user(user_id, &patch)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;

        tracing::debug!(user_id, "Stored refresh credential");
        Ok(())
    }

    /// Fetch and decrypt the user's refresh credential.
    ///
    /// A value that fails its integrity check is reported as
    /// [`AppError::CredentialCorrupted`]; it is never returned as-is.
    pub async fn retrieve(&self, user_id: &str) -> Result<String, AppError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;

        let field = user
            .encrypted_refresh_credential
            .ok_or_else(|| AppError::NotFound(format!("Refresh credential for {}", user_id)))?;

        let opened = EncryptedSecret::from_field(&field)
            .and_then(|secret| self.crypto.decrypt_str(&secret, &aad_for(user_id)));

        opened.map_err(|e| {
            tracing::error!(user_id, error = %e, "Stored refresh credential failed integrity check");
            AppError::CredentialCorrupted
        })
    }
}

fn aad_for(user_id: &str) -> Vec<u8> {
    format!("user_id:{}", user_id).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Tier, User};
    use crate::services::entitlement::EntitlementService;
    use crate::services::stripe::BillingEvent;

    async fn setup() -> (RecordStore, CredentialStore) {
        let store = RecordStore::in_memory();
        store
            .create_user(&User::new("u1".into(), "a@example.com", "t0"))
            .await
            .unwrap();
        store
            .create_user(&User::new("u2".into(), "b@example.com", "t0"))
            .await
            .unwrap();
        let crypto = EncryptionService::new(&[3u8; 32]).unwrap();
        (store.clone(), CredentialStore::new(store, crypto))
    }

    /// Overwrite the stored field directly, bypassing encryption.
    async fn set_raw(store: &RecordStore, user_id: &str, field: String) {
        let patch = UserPatch {
            encrypted_refresh_credential: Some(field),
            ..UserPatch::at("t1")
        };
        store.patch_user(user_id, &patch).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn store_then_retrieve() {
        let (store, creds) = setup().await;
        creds.store("u1", "1//refresh-token").await.unwrap();

        let raw = store
            .get_user("u1")
            .await
            .unwrap()
            .unwrap()
            .encrypted_refresh_credential
            .unwrap();
        assert!(!raw.contains("1//refresh-token"));
        assert!(raw.contains("authTag"));

        assert_eq!(creds.retrieve("u1").await.unwrap(), "1//refresh-token");
    }

    #[tokio::test]
    async fn store_overwrites_previous_value() {
        let (_, creds) = setup().await;
        creds.store("u1", "first").await.unwrap();
        creds.store("u1", "second").await.unwrap();
        assert_eq!(creds.retrieve("u1").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn store_for_unknown_user_is_not_found() {
        let (store, creds) = setup().await;
        assert!(matches!(
            creds.store("nobody", "secret").await,
            Err(AppError::NotFound(_))
        ));
        assert!(store.get_user("nobody").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn credential_writes_do_not_clobber_concurrent_tier_change() {
        let (store, creds) = setup().await;
        let entitlements = EntitlementService::new(store.clone(), None);
        let linked = UserPatch {
            billing_customer_id: Some("cus_1".into()),
            ..UserPatch::at("t0")
        };
        store.patch_user("u1", &linked).await.unwrap().unwrap();

        for trial in 0..300 {
            let reset = UserPatch {
                tier: Some(Tier::Free),
                billing_status: Some("canceled".into()),
                ..UserPatch::at("t0")
            };
            store.patch_user("u1", &reset).await.unwrap().unwrap();

            let writer = {
                let creds = creds.clone();
                tokio::spawn(async move {
                    for i in 0..20 {
                        creds.store("u1", &format!("1//refresh-{}", i)).await.unwrap();
                    }
                })
            };
            let webhook = {
                let entitlements = entitlements.clone();
                tokio::spawn(async move {
                    entitlements
                        .apply(&BillingEvent::SubscriptionChanged {
                            customer_id: "cus_1".into(),
                            subscription_id: "sub_1".into(),
                            status: "active".into(),
                        })
                        .await
                        .unwrap();
                })
            };
            writer.await.unwrap();
            webhook.await.unwrap();

            let user = store.get_user("u1").await.unwrap().unwrap();
            assert_eq!(user.tier, Tier::Paid, "tier lost in trial {}", trial);
            assert_eq!(user.billing_status.as_deref(), Some("active"));
            assert_eq!(creds.retrieve("u1").await.unwrap(), "1//refresh-19");
        }
    }

    #[tokio::test]
    async fn missing_credential_is_not_found() {
        let (_, creds) = setup().await;
        assert!(matches!(
            creds.retrieve("u1").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            creds.retrieve("nobody").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn tampered_value_is_corrupted() {
        let (store, creds) = setup().await;
        creds.store("u1", "secret").await.unwrap();

        let user = store.get_user("u1").await.unwrap().unwrap();
        let field = user.encrypted_refresh_credential.unwrap();
        let mut secret = EncryptedSecret::from_field(&field).unwrap();
        let flipped = if secret.ciphertext.starts_with('0') { "1" } else { "0" };
        secret.ciphertext.replace_range(0..1, flipped);
        set_raw(&store, "u1", secret.to_field()).await;

        assert!(matches!(
            creds.retrieve("u1").await,
            Err(AppError::CredentialCorrupted)
        ));
    }

    #[tokio::test]
    async fn plaintext_in_store_is_corrupted_not_returned() {
        let (store, creds) = setup().await;
        set_raw(&store, "u1", "1//legacy-plaintext".into()).await;

        assert!(matches!(
            creds.retrieve("u1").await,
            Err(AppError::CredentialCorrupted)
        ));
    }

    #[tokio::test]
    async fn ciphertext_is_bound_to_owner() {
        let (store, creds) = setup().await;
        creds.store("u1", "secret").await.unwrap();

        let stolen = store
            .get_user("u1")
            .await
            .unwrap()
            .unwrap()
            .encrypted_refresh_credential
            .unwrap();
        set_raw(&store, "u2", stolen).await;

        assert!(matches!(
            creds.retrieve("u2").await,
            Err(AppError::CredentialCorrupted)
        ));
    }
}
