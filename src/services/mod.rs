// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod access;
pub mod credentials;
pub mod encryption;
pub mod entitlement;
pub mod google;
pub mod google_oidc;
pub mod session;
pub mod stripe;

pub use access::{AccessDecision, AccessGate};
pub use credentials::CredentialStore;
pub use encryption::{CryptoError, EncryptedSecret, EncryptionService};
pub use entitlement::{EntitlementOutcome, EntitlementService};
pub use google::{GoogleOAuthClient, IdentityAdapter};
pub use google_oidc::{GoogleOidcVerifier, OidcError, VerifiedIdentity};
pub use session::{SessionClaims, SessionTokenService};
pub use stripe::{BillingEvent, StripeClient, StripeEvent};
