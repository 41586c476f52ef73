// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Construction of the shared [`AppState`].
//!
//! [`StateCell`] gives single-flight initialization: callers that arrive
//! while the first initialization is running wait for it instead of
//! building their own clients.

use crate::config::{Config, StoreBackend};
use crate::db::{FirestoreDb, RecordStore};
use crate::services::{
    AccessGate, CredentialStore, EncryptionService, EntitlementService, GoogleOAuthClient,
    GoogleOidcVerifier, IdentityAdapter, SessionTokenService, StripeClient,
};
use crate::AppState;
use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Lazily-initialized, shared application state.
pub struct StateCell {
    cell: OnceCell<Arc<AppState>>,
}

impl StateCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    /// Return the state, running `init` if no initialization has
    /// succeeded yet. A failed initialization leaves the cell empty.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> anyhow::Result<Arc<AppState>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<AppState>>,
    {
        self.cell
            .get_or_try_init(|| async { init().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn get(&self) -> Option<Arc<AppState>> {
        self.cell.get().cloned()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Open the record store selected by the configuration.
pub async fn connect_store(config: &Config) -> anyhow::Result<RecordStore> {
    match config.record_store {
        StoreBackend::Firestore => {
            let db = FirestoreDb::new(&config.gcp_project_id)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            Ok(RecordStore::firestore(db))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory record store; data is lost on restart");
            Ok(RecordStore::in_memory())
        }
    }
}

/// Build the production state: real Google and Stripe endpoints.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let store = connect_store(&config).await?;

    let oauth = GoogleOAuthClient::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.google_redirect_uri.clone(),
    );
    let verifier = GoogleOidcVerifier::new(&config.google_client_id)?;
    let identity = IdentityAdapter::new(oauth, verifier);
    let billing = StripeClient::new(config.stripe_secret_key.clone());

    assemble_state(config, store, identity, billing)
}

/// Wire services over already-constructed collaborators.
pub fn assemble_state(
    config: Config,
    store: RecordStore,
    identity: IdentityAdapter,
    billing: StripeClient,
) -> anyhow::Result<AppState> {
    let sessions = SessionTokenService::new(&config.jwt_secret, &config.nonce_secret)
        .context("invalid session secrets")?;
    let crypto =
        EncryptionService::new(&config.encryption_key).context("invalid ENCRYPTION_KEY")?;
    let credentials = CredentialStore::new(store.clone(), crypto);
    let entitlements = EntitlementService::new(store.clone(), Some(billing.clone()));
    let access = AccessGate::new(store.clone(), config.free_tier_document_limit);

    tracing::info!(
        store = store.backend_name(),
        free_tier_limit = config.free_tier_document_limit,
        "Application state initialized"
    );

    Ok(AppState {
        config,
        store,
        sessions,
        credentials,
        identity,
        billing,
        entitlements,
        access,
    })
}
