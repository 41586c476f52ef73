// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (profile, tier, billing linkage, encrypted refresh credential)
//! - User emails (uniqueness index, doc id = normalized email)
//! - Document access (ledger, doc id = `{user_id}_{document_id}`)
//!
//! Firestore has no secondary unique indexes, so uniqueness is enforced by
//! choosing deterministic document IDs and creating them with `insert`,
//! which fails with a conflict if the document already exists.

use crate::db::{collections, InsertOutcome};
use crate::error::AppError;
use crate::models::{normalize_email, DocumentAccessRecord, User, UserPatch};
use firestore::errors::FirestoreError;
use firestore::FirestoreWritePrecondition;
use serde::{Deserialize, Serialize};

/// Row in the `user_emails` index collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmailIndexEntry {
    user_id: String,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client. All database operations return an error.
    pub fn new_offline() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Get a user by internal ID.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Resolve a user through the email index.
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let entry: Option<EmailIndexEntry> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USER_EMAILS)
            .obj()
            .one(&normalize_email(email))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match entry {
            Some(entry) => self.get_user(&entry.user_id).await,
            None => Ok(None),
        }
    }

    /// Find the user linked to a Stripe customer ID.
    pub async fn find_user_by_billing_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, AppError> {
        let customer_id = customer_id.to_string();
        let users: Vec<User> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(move |q| q.field("billing_customer_id").eq(customer_id.clone()))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(users.into_iter().next())
    }

    /// Create a user and claim its email in the index.
    ///
    /// Both documents are written in one transaction, so the index never
    /// points at a user that was not written. If another user already owns
    /// the email, that user is returned. An index entry whose user is
    /// missing is reclaimed.
    pub async fn create_user(&self, user: &User) -> Result<User, AppError> {
        let email = normalize_email(&user.email);

        match self.write_user_with_index(user, &email, true).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, "Created user");
                Ok(user.clone())
            }
            Err(e) => {
                if let Some(existing) = self.find_user_by_email(&email).await? {
                    tracing::debug!(user_id = %user.id, "Email already claimed, using existing user");
                    return Ok(existing);
                }
                if !self.email_index_exists(&email).await? {
                    return Err(e);
                }

                tracing::warn!(user_id = %user.id, "Repairing dangling email index entry");
                self.write_user_with_index(user, &email, false).await?;
                Ok(user.clone())
            }
        }
    }

    /// Write the user document and its email index entry atomically. With
    /// `claim`, the commit fails if the index entry already exists.
    async fn write_user_with_index(
        &self,
        user: &User,
        email: &str,
        claim: bool,
    ) -> Result<(), AppError> {
        let client = self.get_client()?;
        let entry = EmailIndexEntry {
            user_id: user.id.clone(),
        };

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let index_write = client
            .fluent()
            .update()
            .in_col(collections::USER_EMAILS);
        let index_write = if claim {
            index_write.precondition(FirestoreWritePrecondition::Exists(false))
        } else {
            index_write
        };
        index_write
            .document_id(email)
            .object(&entry)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add email index to transaction: {}", e))
            })?;

        client
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(user)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add user to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
        Ok(())
    }

    async fn email_index_exists(&self, email: &str) -> Result<bool, AppError> {
        let entry: Option<EmailIndexEntry> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USER_EMAILS)
            .obj()
            .one(email)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(entry.is_some())
    }

    /// Write only the fields named by `patch`, leaving the rest of the
    /// document as stored. The write requires the document to exist, so a
    /// patch never creates a partial user.
    pub async fn patch_user(
        &self,
        user_id: &str,
        patch: &UserPatch,
    ) -> Result<Option<User>, AppError> {
        let written: Result<User, FirestoreError> = self
            .get_client()?
            .fluent()
            .update()
            .fields(patch.field_paths())
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(user_id)
            .object(patch)
            .execute()
            .await;

        match written {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                // A failed existence precondition reads as a missing user.
                if self.get_user(user_id).await?.is_none() {
                    return Ok(None);
                }
                Err(AppError::Database(e.to_string()))
            }
        }
    }

    // ─── Document Access Operations ──────────────────────────────

    pub async fn get_document_access(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentAccessRecord>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::DOCUMENT_ACCESS)
            .obj()
            .one(&DocumentAccessRecord::doc_id(user_id, document_id))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create the access record; a conflict means another request won.
    pub async fn insert_document_access(
        &self,
        record: &DocumentAccessRecord,
    ) -> Result<InsertOutcome, AppError> {
        let doc_id = DocumentAccessRecord::doc_id(&record.user_id, &record.document_id);

        let inserted: Result<DocumentAccessRecord, FirestoreError> = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::DOCUMENT_ACCESS)
            .document_id(&doc_id)
            .object(record)
            .execute()
            .await;

        match inserted {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(FirestoreError::DataConflictError(_)) => Ok(InsertOutcome::AlreadyExists),
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    pub async fn touch_document_access(
        &self,
        user_id: &str,
        document_id: &str,
        now: &str,
    ) -> Result<Option<DocumentAccessRecord>, AppError> {
        let Some(mut record) = self.get_document_access(user_id, document_id).await? else {
            return Ok(None);
        };
        record.last_accessed_at = now.to_string();

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::DOCUMENT_ACCESS)
            .document_id(DocumentAccessRecord::doc_id(user_id, document_id))
            .object(&record)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Some(record))
    }

    pub async fn count_document_access(&self, user_id: &str) -> Result<u32, AppError> {
        Ok(self.query_document_access(user_id, false).await?.len() as u32)
    }

    pub async fn list_document_access(
        &self,
        user_id: &str,
    ) -> Result<Vec<DocumentAccessRecord>, AppError> {
        self.query_document_access(user_id, true).await
    }

    async fn query_document_access(
        &self,
        user_id: &str,
        ordered: bool,
    ) -> Result<Vec<DocumentAccessRecord>, AppError> {
        let user_id = user_id.to_string();
        let query = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::DOCUMENT_ACCESS)
            .filter(move |q| q.field("user_id").eq(user_id.clone()));

        let query = if ordered {
            query.order_by([(
                "last_accessed_at",
                firestore::FirestoreQueryDirection::Descending,
            )])
        } else {
            query
        };

        query
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    #[tokio::test]
    async fn dangling_email_index_is_reclaimed() {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_err() {
            eprintln!("Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
        let db = FirestoreDb::new("test-project").await.unwrap();
        let email = format!("{}@example.com", unique());

        // Index entry whose user was never written.
        let _: EmailIndexEntry = db
            .get_client()
            .unwrap()
            .fluent()
            .update()
            .in_col(collections::USER_EMAILS)
            .document_id(&email)
            .object(&EmailIndexEntry { user_id: unique() })
            .execute()
            .await
            .unwrap();

        let user = User::new(unique(), &email, "t0");
        assert_eq!(db.create_user(&user).await.unwrap().id, user.id);
        assert_eq!(
            db.find_user_by_email(&email).await.unwrap().unwrap().id,
            user.id
        );

        let again = User::new(unique(), &email, "t1");
        assert_eq!(db.create_user(&again).await.unwrap().id, user.id);
        assert!(db.get_user(&again.id).await.unwrap().is_none());
    }
}
