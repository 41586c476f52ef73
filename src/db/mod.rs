// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Record store for users and the document-access ledger.
//!
//! Two backends share one interface: Firestore in production and an
//! in-process map for local development and tests. Both enforce the two
//! uniqueness rules the rest of the crate relies on: one user per email and
//! one access record per `(user_id, document_id)`.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{DocumentAccessRecord, User, UserPatch};
use std::sync::Arc;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Email → user id index (doc id = normalized email)
    pub const USER_EMAILS: &str = "user_emails";
    pub const DOCUMENT_ACCESS: &str = "document_access";
}

/// Outcome of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

#[derive(Clone)]
enum Backend {
    Firestore(FirestoreDb),
    Memory(Arc<MemoryStore>),
}

/// Handle to the record store. Cheap to clone.
#[derive(Clone)]
pub struct RecordStore {
    backend: Backend,
}

impl RecordStore {
    pub fn firestore(db: FirestoreDb) -> Self {
        Self {
            backend: Backend::Firestore(db),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(MemoryStore::default())),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Firestore(_) => "firestore",
            Backend::Memory(_) => "memory",
        }
    }

    // ─── User Operations ─────────────────────────────────────────

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.get_user(user_id).await,
            Backend::Memory(m) => Ok(m.get_user(user_id)),
        }
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.find_user_by_email(email).await,
            Backend::Memory(m) => Ok(m.find_user_by_email(email)),
        }
    }

    /// Look up the user linked to a Stripe customer. Zero matches is normal
    /// when a billing event races ahead of the linkage.
    pub async fn find_user_by_billing_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.find_user_by_billing_customer(customer_id).await,
            Backend::Memory(m) => Ok(m.find_user_by_billing_customer(customer_id)),
        }
    }

    /// Create a user unless the email is already taken, in which case the
    /// existing record is returned unchanged.
    pub async fn create_user(&self, user: &User) -> Result<User, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.create_user(user).await,
            Backend::Memory(m) => Ok(m.create_user(user)),
        }
    }

    /// Write only the fields named by `patch`. Returns the updated record,
    /// or None if the user does not exist.
    ///
    /// Concurrent patches that touch different fields never overwrite each
    /// other; patches to the same field resolve last-writer-wins.
    pub async fn patch_user(
        &self,
        user_id: &str,
        patch: &UserPatch,
    ) -> Result<Option<User>, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.patch_user(user_id, patch).await,
            Backend::Memory(m) => Ok(m.patch_user(user_id, patch)),
        }
    }

    // ─── Document Access Operations ──────────────────────────────

    pub async fn get_document_access(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentAccessRecord>, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.get_document_access(user_id, document_id).await,
            Backend::Memory(m) => Ok(m.get_document_access(user_id, document_id)),
        }
    }

    /// Insert a first-access record. A duplicate is reported as
    /// [`InsertOutcome::AlreadyExists`], not as an error.
    pub async fn insert_document_access(
        &self,
        record: &DocumentAccessRecord,
    ) -> Result<InsertOutcome, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.insert_document_access(record).await,
            Backend::Memory(m) => Ok(m.insert_document_access(record)),
        }
    }

    /// Bump `last_accessed_at` on an existing record.
    pub async fn touch_document_access(
        &self,
        user_id: &str,
        document_id: &str,
        now: &str,
    ) -> Result<Option<DocumentAccessRecord>, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.touch_document_access(user_id, document_id, now).await,
            Backend::Memory(m) => Ok(m.touch_document_access(user_id, document_id, now)),
        }
    }

    pub async fn count_document_access(&self, user_id: &str) -> Result<u32, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.count_document_access(user_id).await,
            Backend::Memory(m) => Ok(m.count_document_access(user_id)),
        }
    }

    /// All of a user's records, most recently accessed first.
    pub async fn list_document_access(
        &self,
        user_id: &str,
    ) -> Result<Vec<DocumentAccessRecord>, AppError> {
        match &self.backend {
            Backend::Firestore(db) => db.list_document_access(user_id).await,
            Backend::Memory(m) => Ok(m.list_document_access(user_id)),
        }
    }
}
