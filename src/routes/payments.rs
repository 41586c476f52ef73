// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stripe checkout and webhook routes.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::UserPatch;
use crate::services::StripeEvent;
use crate::time_utils::now_rfc3339;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Webhook route (authenticated by signature, not session).
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new().route("/payments/webhook", post(stripe_webhook))
}

/// Checkout route (auth middleware applied in routes/mod.rs).
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/payments/create-checkout-session",
        post(create_checkout_session),
    )
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub price_id: Option<String>,
    #[validate(url)]
    pub success_url: String,
    #[validate(url)]
    pub cancel_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

/// Start a subscription checkout for the caller.
async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let price_id = body
        .price_id
        .or_else(|| state.config.stripe_price_id.clone())
        .ok_or_else(|| AppError::BadRequest("priceId is required".to_string()))?;

    let profile = state
        .store
        .get_user(&user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {}", user.user_id)))?;

    let customer_id = match &profile.billing_customer_id {
        Some(id) => id.clone(),
        None => {
            let customer = state
                .billing
                .create_customer(&profile.email, &profile.id)
                .await?;
            let patch = UserPatch {
                billing_customer_id: Some(customer.id.clone()),
                ..UserPatch::at(&now_rfc3339())
            };
            state
                .store
                .patch_user(&profile.id, &patch)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("User {}", profile.id)))?;
            tracing::info!(user_id = %profile.id, customer_id = %customer.id, "Created billing customer");
            customer.id
        }
    };

    let session = state
        .billing
        .create_checkout_session(
            &customer_id,
            &profile.id,
            &price_id,
            &body.success_url,
            &body.cancel_url,
        )
        .await?;

    let url = session
        .url
        .ok_or_else(|| AppError::BillingApi("Checkout session has no URL".to_string()))?;

    Ok(Json(CheckoutResponse {
        url,
        session_id: session.id,
    }))
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Stripe webhook.
///
/// The body is taken as raw bytes: the signature covers the exact bytes
/// sent. Only store failures produce a non-2xx after the signature checks
/// out, so that Stripe redelivers.
async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>)> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::WebhookSignatureInvalid("missing signature header".to_string()))?;

    let event = StripeEvent::construct(
        &body,
        signature,
        &state.config.stripe_webhook_secret,
        chrono::Utc::now().timestamp(),
    )?;

    let billing_event = match event.billing_event() {
        Ok(billing_event) => billing_event,
        Err(e) => {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Dropping unreadable billing event"
            );
            return Ok((StatusCode::OK, Json(WebhookAck { received: true })));
        }
    };

    let outcome = state.entitlements.apply(&billing_event).await?;

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        outcome = ?outcome,
        "Processed billing event"
    );

    Ok((StatusCode::OK, Json(WebhookAck { received: true })))
}
