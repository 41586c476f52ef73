// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running and
//! `FIRESTORE_EMULATOR_HOST` to be set; otherwise they are skipped.
//!
//! The emulator provides a clean state for each test run.

use docgate::db::{InsertOutcome, RecordStore};
use docgate::models::{DocumentAccessRecord, Tier, User, UserPatch};
use docgate::time_utils::now_rfc3339;

mod common;
use common::test_db;

/// Unique suffix for test isolation.
fn unique() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

async fn store() -> RecordStore {
    RecordStore::firestore(test_db().await)
}

// ═══════════════════════════════════════════════════════════════════════════
// USER TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_new_user_creation() {
    require_emulator!();

    let store = store().await;
    let id = unique();
    let email = format!("{}@example.com", id);

    // Initially, user should not exist
    assert!(store.get_user(&id).await.unwrap().is_none());

    let user = User::new(id.clone(), &email, &now_rfc3339());
    let created = store.create_user(&user).await.unwrap();
    assert_eq!(created, user);

    let fetched = store.get_user(&id).await.unwrap().unwrap();
    assert_eq!(fetched.email, email);
    assert_eq!(fetched.tier, Tier::Free);

    let by_email = store
        .find_user_by_email(&email.to_uppercase())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_email.id, id);
}

#[tokio::test]
async fn test_email_is_unique() {
    require_emulator!();

    let store = store().await;
    let email = format!("{}@example.com", unique());

    let first = User::new(unique(), &email, &now_rfc3339());
    let second = User::new(unique(), &email, &now_rfc3339());

    store.create_user(&first).await.unwrap();
    let winner = store.create_user(&second).await.unwrap();
    assert_eq!(winner.id, first.id);
    assert!(store.get_user(&second.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_by_billing_customer() {
    require_emulator!();

    let store = store().await;
    let customer = format!("cus_{}", unique());
    let user = User::new(unique(), &format!("{}@example.com", unique()), &now_rfc3339());
    store.create_user(&user).await.unwrap();

    assert!(store
        .find_user_by_billing_customer(&customer)
        .await
        .unwrap()
        .is_none());

    let patch = UserPatch {
        billing_customer_id: Some(customer.clone()),
        tier: Some(Tier::Paid),
        ..UserPatch::at(&now_rfc3339())
    };
    store.patch_user(&user.id, &patch).await.unwrap().unwrap();

    let found = store
        .find_user_by_billing_customer(&customer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, user.id);
    assert_eq!(found.tier, Tier::Paid);
}

#[tokio::test]
async fn test_patch_keeps_other_fields() {
    require_emulator!();

    let store = store().await;
    let user = User::new(unique(), &format!("{}@example.com", unique()), &now_rfc3339());
    store.create_user(&user).await.unwrap();

    let credential = UserPatch {
        encrypted_refresh_credential: Some("sealed".into()),
        ..UserPatch::at(&now_rfc3339())
    };
    let billing = UserPatch {
        tier: Some(Tier::Paid),
        billing_status: Some("active".into()),
        ..UserPatch::at(&now_rfc3339())
    };
    let (a, b) = tokio::join!(
        store.patch_user(&user.id, &credential),
        store.patch_user(&user.id, &billing)
    );
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    let stored = store.get_user(&user.id).await.unwrap().unwrap();
    assert_eq!(stored.tier, Tier::Paid);
    assert_eq!(stored.billing_status.as_deref(), Some("active"));
    assert_eq!(stored.encrypted_refresh_credential.as_deref(), Some("sealed"));
    assert_eq!(stored.email, user.email);

    // A patch never creates a user.
    assert!(store
        .patch_user(&unique(), &billing)
        .await
        .unwrap()
        .is_none());
}

// ═══════════════════════════════════════════════════════════════════════════
// DOCUMENT ACCESS TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_document_access_ledger() {
    require_emulator!();

    let store = store().await;
    let user_id = unique();

    let first = DocumentAccessRecord::new(&user_id, "doc/with/slashes", None, &now_rfc3339());
    assert_eq!(
        store.insert_document_access(&first).await.unwrap(),
        InsertOutcome::Inserted
    );
    assert_eq!(
        store.insert_document_access(&first).await.unwrap(),
        InsertOutcome::AlreadyExists
    );

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = DocumentAccessRecord::new(&user_id, "doc-2", Some("Two".into()), &now_rfc3339());
    store.insert_document_access(&second).await.unwrap();

    assert_eq!(store.count_document_access(&user_id).await.unwrap(), 2);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let touched = store
        .touch_document_access(&user_id, "doc/with/slashes", &now_rfc3339())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(touched.first_accessed_at, first.first_accessed_at);
    assert!(touched.last_accessed_at > first.last_accessed_at);

    let listed = store.list_document_access(&user_id).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|r| r.document_id.as_str()).collect();
    assert_eq!(ids, vec!["doc/with/slashes", "doc-2"]);

    assert!(store
        .touch_document_access(&user_id, "never-opened", &now_rfc3339())
        .await
        .unwrap()
        .is_none());
}
