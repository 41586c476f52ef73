// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process record store for local development and tests.
//!
//! Uniqueness is enforced through `DashMap` entries, which lock the shard
//! holding the key for the duration of the check-and-insert.

use crate::db::InsertOutcome;
use crate::models::{normalize_email, DocumentAccessRecord, User, UserPatch};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    /// normalized email → user id
    emails: DashMap<String, String>,
    /// (user_id, document_id) → record
    access: DashMap<(String, String), DocumentAccessRecord>,
}

impl MemoryStore {
    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).map(|u| u.clone())
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        let user_id = self.emails.get(&normalize_email(email))?.clone();
        self.get_user(&user_id)
    }

    pub fn find_user_by_billing_customer(&self, customer_id: &str) -> Option<User> {
        self.users
            .iter()
            .find(|u| u.billing_customer_id.as_deref() == Some(customer_id))
            .map(|u| u.clone())
    }

    pub fn create_user(&self, user: &User) -> User {
        match self.emails.entry(normalize_email(&user.email)) {
            Entry::Occupied(mut existing) => {
                if let Some(owner) = self.get_user(existing.get()) {
                    return owner;
                }
                // Index entry without its user: reclaim it.
                tracing::warn!(user_id = %user.id, "Repairing dangling email index entry");
                self.users.insert(user.id.clone(), user.clone());
                existing.insert(user.id.clone());
                user.clone()
            }
            Entry::Vacant(slot) => {
                self.users.insert(user.id.clone(), user.clone());
                slot.insert(user.id.clone());
                user.clone()
            }
        }
    }


    /// Apply `patch` in place under the shard lock. None if the user is
    /// missing.
    pub fn patch_user(&self, user_id: &str, patch: &UserPatch) -> Option<User> {
        let mut user = self.users.get_mut(user_id)?;
        patch.apply_to(&mut user);
        Some(user.clone())
    }

    pub fn get_document_access(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Option<DocumentAccessRecord> {
        self.access
            .get(&(user_id.to_string(), document_id.to_string()))
            .map(|r| r.clone())
    }

    pub fn insert_document_access(&self, record: &DocumentAccessRecord) -> InsertOutcome {
        let key = (record.user_id.clone(), record.document_id.clone());
        match self.access.entry(key) {
            Entry::Occupied(_) => InsertOutcome::AlreadyExists,
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                InsertOutcome::Inserted
            }
        }
    }

    pub fn touch_document_access(
        &self,
        user_id: &str,
        document_id: &str,
        now: &str,
    ) -> Option<DocumentAccessRecord> {
        let mut record = self
            .access
            .get_mut(&(user_id.to_string(), document_id.to_string()))?;
        record.last_accessed_at = now.to_string();
        Some(record.clone())
    }

    pub fn count_document_access(&self, user_id: &str) -> u32 {
        self.access.iter().filter(|r| r.user_id == user_id).count() as u32
    }

    pub fn list_document_access(&self, user_id: &str) -> Vec<DocumentAccessRecord> {
        let mut records: Vec<DocumentAccessRecord> = self
            .access
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        records
    }
}
