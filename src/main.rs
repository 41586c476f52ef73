// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Docgate API Server
//!
//! Authenticates browser-extension users with Google, issues session
//! credentials, and gates document access on the user's Stripe-managed tier.

use docgate::{
    bootstrap::{build_state, StateCell},
    config::Config,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static STATE: StateCell = StateCell::new();

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Missing or malformed secrets stop the process here.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };
    let port = config.port;
    tracing::info!(port, store = ?config.record_store, "Starting Docgate API");

    let state = STATE.get_or_init(|| build_state(config)).await?;

    // Build router
    let app = docgate::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docgate=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
