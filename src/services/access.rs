// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access-request gate: free-tier document quota.
//!
//! Revisits are always granted and never count against the quota. The tier
//! is read from the user record on every request, never from the session
//! credential.

use crate::db::{InsertOutcome, RecordStore};
use crate::error::AppError;
use crate::models::{DocumentAccessRecord, UserStatus};
use crate::time_utils::now_rfc3339;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared per-user locks for the count-then-insert sequence.
pub type UserLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecision {
    pub granted: bool,
    pub is_new_document: bool,
    /// The stored record after this access; None when denied.
    pub record: Option<DocumentAccessRecord>,
    pub status: UserStatus,
}

#[derive(Clone)]
pub struct AccessGate {
    store: RecordStore,
    free_tier_limit: u32,
    user_locks: UserLocks,
}

impl AccessGate {
    pub fn new(store: RecordStore, free_tier_limit: u32) -> Self {
        Self {
            store,
            free_tier_limit,
            user_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn free_tier_limit(&self) -> u32 {
        self.free_tier_limit
    }

    /// Decide whether `user_id` may open `document_id`, recording the access
    /// when granted.
    ///
    /// Within one process a per-user lock serializes the quota count and the
    /// insert. Across processes the store's uniqueness on
    /// `(user_id, document_id)` decides: a losing insert is treated as a
    /// revisit.
    pub async fn check_access(
        &self,
        user_id: &str,
        document_id: &str,
        document_title: Option<String>,
    ) -> Result<AccessDecision, AppError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;

        let now = now_rfc3339();

        if let Some(record) = self
            .store
            .touch_document_access(user_id, document_id, &now)
            .await?
        {
            return self.granted(user_id, record, false).await;
        }

        let lock = self
            .user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another request for the same document may have won while we waited.
        if let Some(record) = self
            .store
            .touch_document_access(user_id, document_id, &now)
            .await?
        {
            return self.granted(user_id, record, false).await;
        }

        if !user.tier.is_paid() {
            let count = self.store.count_document_access(user_id).await?;
            if count >= self.free_tier_limit {
                tracing::info!(user_id, count, limit = self.free_tier_limit, "Quota exceeded");
                return Ok(AccessDecision {
                    granted: false,
                    is_new_document: false,
                    record: None,
                    status: UserStatus::new(user.tier, count, self.free_tier_limit),
                });
            }
        }

        let record = DocumentAccessRecord::new(user_id, document_id, document_title, &now);
        match self.store.insert_document_access(&record).await? {
            InsertOutcome::Inserted => {
                tracing::debug!(user_id, document_id, "Recorded first document access");
                self.granted(user_id, record, true).await
            }
            InsertOutcome::AlreadyExists => {
                let record = self
                    .store
                    .touch_document_access(user_id, document_id, &now)
                    .await?
                    .unwrap_or(record);
                self.granted(user_id, record, false).await
            }
        }
    }

    /// Current entitlement snapshot, with the tier re-read from the store.
    pub async fn user_status(&self, user_id: &str) -> Result<UserStatus, AppError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;
        let count = self.store.count_document_access(user_id).await?;
        Ok(UserStatus::new(user.tier, count, self.free_tier_limit))
    }

    async fn granted(
        &self,
        user_id: &str,
        record: DocumentAccessRecord,
        is_new_document: bool,
    ) -> Result<AccessDecision, AppError> {
        Ok(AccessDecision {
            granted: true,
            is_new_document,
            record: Some(record),
            status: self.user_status(user_id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Tier, User, UserPatch};

    async fn setup(tier: Tier, limit: u32) -> (RecordStore, AccessGate) {
        let store = RecordStore::in_memory();
        let mut user = User::new("u1".into(), "reader@example.com", "t0");
        user.tier = tier;
        store.create_user(&user).await.unwrap();
        (store.clone(), AccessGate::new(store, limit))
    }

    #[tokio::test]
    async fn free_tier_quota_with_revisits() {
        let (_, gate) = setup(Tier::Free, 2).await;

        let a = gate.check_access("u1", "doc-a", None).await.unwrap();
        assert!(a.granted);
        assert!(a.is_new_document);
        assert_eq!(a.status.remaining_documents, Some(1));

        let b = gate.check_access("u1", "doc-b", None).await.unwrap();
        assert!(b.granted);
        assert!(b.is_new_document);

        let c = gate.check_access("u1", "doc-c", None).await.unwrap();
        assert!(!c.granted);
        assert!(c.record.is_none());
        assert_eq!(c.status.document_count, 2);
        assert_eq!(c.status.remaining_documents, Some(0));

        let again = gate.check_access("u1", "doc-a", None).await.unwrap();
        assert!(again.granted);
        assert!(!again.is_new_document);
        assert_eq!(again.status.document_count, 2);
    }

    #[tokio::test]
    async fn paid_tier_is_unlimited() {
        let (store, gate) = setup(Tier::Paid, 2).await;
        for i in 0..100 {
            let d = gate
                .check_access("u1", &format!("doc-{}", i), None)
                .await
                .unwrap();
            assert!(d.granted, "document {} denied", i);
            assert_eq!(d.status.remaining_documents, None);
        }
        assert_eq!(store.count_document_access("u1").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn tier_is_read_from_the_store() {
        let (store, gate) = setup(Tier::Free, 1).await;
        gate.check_access("u1", "doc-a", None).await.unwrap();
        assert!(!gate.check_access("u1", "doc-b", None).await.unwrap().granted);

        let set_tier = |tier| UserPatch {
            tier: Some(tier),
            ..UserPatch::at("t1")
        };
        store.patch_user("u1", &set_tier(Tier::Paid)).await.unwrap();
        assert!(gate.check_access("u1", "doc-b", None).await.unwrap().granted);

        store.patch_user("u1", &set_tier(Tier::Free)).await.unwrap();
        assert!(!gate.check_access("u1", "doc-c", None).await.unwrap().granted);
        // Documents opened while paid stay accessible.
        assert!(gate.check_access("u1", "doc-b", None).await.unwrap().granted);
    }

    #[tokio::test]
    async fn revisit_keeps_first_access_and_title() {
        let (store, gate) = setup(Tier::Free, 5).await;
        gate.check_access("u1", "doc-a", Some("Plan".into()))
            .await
            .unwrap();
        let first = store
            .get_document_access("u1", "doc-a")
            .await
            .unwrap()
            .unwrap();

        let again = gate.check_access("u1", "doc-a", None).await.unwrap();
        let record = again.record.unwrap();
        assert_eq!(record.first_accessed_at, first.first_accessed_at);
        assert_eq!(record.document_title.as_deref(), Some("Plan"));
        assert!(record.last_accessed_at >= first.last_accessed_at);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (_, gate) = setup(Tier::Free, 5).await;
        assert!(matches!(
            gate.check_access("ghost", "doc", None).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_creates_one_record() {
        let (store, gate) = setup(Tier::Free, 5).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.check_access("u1", "doc-a", None).await })
            })
            .collect();

        let mut new_count = 0;
        for handle in handles {
            let decision = handle.await.unwrap().unwrap();
            assert!(decision.granted);
            if decision.is_new_document {
                new_count += 1;
            }
        }

        assert_eq!(new_count, 1);
        assert_eq!(store.count_document_access("u1").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_distinct_documents_respect_quota() {
        let (store, gate) = setup(Tier::Free, 3).await;

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.check_access("u1", &format!("doc-{}", i), None).await
                })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().granted {
                granted += 1;
            }
        }

        assert_eq!(granted, 3);
        assert_eq!(store.count_document_access("u1").await.unwrap(), 3);
    }
}
