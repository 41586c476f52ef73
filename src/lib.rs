// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Docgate: session and entitlement backend for a document browser extension
//!
//! This crate provides Google sign-in, signed session credentials, encrypted
//! storage of Google refresh credentials, Stripe-driven paid-tier
//! entitlements, and the free-tier document quota.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::RecordStore;
use services::{
    AccessGate, CredentialStore, EntitlementService, IdentityAdapter, SessionTokenService,
    StripeClient,
};

/// Shared application state. Built once, then read-only.
pub struct AppState {
    pub config: Config,
    pub store: RecordStore,
    pub sessions: SessionTokenService,
    pub credentials: CredentialStore,
    pub identity: IdentityAdapter,
    pub billing: StripeClient,
    pub entitlements: EntitlementService,
    pub access: AccessGate,
}
