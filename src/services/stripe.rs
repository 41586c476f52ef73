// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stripe API client and webhook event handling.
//!
//! Handles:
//! - Customer creation and lookup
//! - Subscription checkout sessions
//! - Subscription status lookup
//! - Webhook signature verification over the raw request body

use crate::error::AppError;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum age of a signed webhook, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Checkout session metadata key carrying our user ID.
pub const METADATA_USER_ID: &str = "userId";

// ─── API Client ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    pub status: String,
}

/// Stripe REST client (form-encoded requests, bearer auth).
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self::with_base_url(secret_key, STRIPE_API_BASE)
    }

    pub fn with_base_url(secret_key: String, base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into(),
            secret_key,
        }
    }

    pub async fn create_customer(&self, email: &str, user_id: &str) -> Result<Customer, AppError> {
        let params = vec![
            ("email".to_string(), email.to_string()),
            (format_metadata_key(METADATA_USER_ID), user_id.to_string()),
        ];

        self.post_form("customers", &params).await
    }

    /// Create a subscription-mode checkout session for one price.
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        user_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, AppError> {
        let params = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("mode".to_string(), "subscription".to_string()),
            ("line_items[0][price]".to_string(), price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            ("client_reference_id".to_string(), user_id.to_string()),
            (format_metadata_key(METADATA_USER_ID), user_id.to_string()),
        ];

        self.post_form("checkout/sessions", &params).await
    }

    pub async fn retrieve_customer(&self, customer_id: &str) -> Result<Customer, AppError> {
        self.get_json(&format!("customers/{}", urlencoding::encode(customer_id)))
            .await
    }

    pub async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Subscription, AppError> {
        self.get_json(&format!(
            "subscriptions/{}",
            urlencoding::encode(subscription_id)
        ))
        .await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, AppError> {
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::BillingApi(e.to_string()))?;

        check_response_json(response).await
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, AppError> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::BillingApi(e.to_string()))?;

        check_response_json(response).await
    }
}

fn format_metadata_key(key: &str) -> String {
    format!("metadata[{}]", key)
}

async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::BillingApi(format!("HTTP {}: {}", status, body)));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::BillingApi(format!("Failed to parse response: {}", e)))
}

// ─── Webhook Signature ───────────────────────────────────────────────────────

/// Verify a `Stripe-Signature` header against the raw body.
///
/// The header has the form `t=<unix>,v1=<hex>[,v1=<hex>...]`. The expected
/// signature is `HMAC-SHA256(secret, "<t>.<body>")`; any matching `v1`
/// entry is accepted.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), AppError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(sig) = hex::decode(value) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::WebhookSignatureInvalid("missing timestamp".to_string()))?;

    if signatures.is_empty() {
        return Err(AppError::WebhookSignatureInvalid(
            "no v1 signature".to_string(),
        ));
    }

    if (now - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err(AppError::WebhookSignatureInvalid(format!(
            "timestamp outside tolerance (age {}s)",
            now - timestamp
        )));
    }

    let expected = compute_signature(payload, secret, timestamp)?;

    if signatures
        .iter()
        .any(|sig| bool::from(sig.as_slice().ct_eq(expected.as_slice())))
    {
        Ok(())
    } else {
        Err(AppError::WebhookSignatureInvalid(
            "signature mismatch".to_string(),
        ))
    }
}

/// Build a `Stripe-Signature` header value for a payload.
pub fn sign_webhook_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let signature = compute_signature(payload, secret, timestamp)
        .map(hex::encode)
        .unwrap_or_default();
    format!("t={},v1={}", timestamp, signature)
}

fn compute_signature(payload: &[u8], secret: &str, timestamp: i64) -> Result<Vec<u8>, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

// ─── Webhook Events ──────────────────────────────────────────────────────────

/// Stripe event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Billing events that drive entitlement changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted {
        customer_id: Option<String>,
        subscription_id: Option<String>,
        email: Option<String>,
        user_id: Option<String>,
    },
    SubscriptionChanged {
        customer_id: String,
        subscription_id: String,
        status: String,
    },
    SubscriptionDeleted {
        customer_id: String,
        subscription_id: String,
    },
    InvoicePaid {
        customer_id: String,
        subscription_id: Option<String>,
    },
    InvoicePaymentFailed {
        customer_id: String,
        invoice_id: String,
    },
    /// Event types we do not act on.
    Other(String),
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    id: String,
    customer: String,
    #[serde(default)]
    subscription: Option<String>,
}

impl StripeEvent {
    /// Verify the signature, then parse the event.
    pub fn construct(
        payload: &[u8],
        header: &str,
        secret: &str,
        now: i64,
    ) -> Result<Self, AppError> {
        verify_webhook_signature(payload, header, secret, now)?;
        serde_json::from_slice(payload)
            .map_err(|e| AppError::BadRequest(format!("Malformed event: {}", e)))
    }

    /// Interpret the event object according to its type.
    pub fn billing_event(&self) -> Result<BillingEvent, AppError> {
        let event = match self.event_type.as_str() {
            "checkout.session.completed" => {
                let session: CheckoutSessionObject = self.object()?;
                let email = session
                    .customer_details
                    .and_then(|d| d.email)
                    .or(session.customer_email);
                let user_id = session
                    .metadata
                    .get(METADATA_USER_ID)
                    .cloned()
                    .or(session.client_reference_id);
                BillingEvent::CheckoutCompleted {
                    customer_id: session.customer,
                    subscription_id: session.subscription,
                    email,
                    user_id,
                }
            }
            "customer.subscription.created" | "customer.subscription.updated" => {
                let sub: SubscriptionObject = self.object()?;
                BillingEvent::SubscriptionChanged {
                    customer_id: sub.customer,
                    subscription_id: sub.id,
                    status: sub.status,
                }
            }
            "customer.subscription.deleted" => {
                let sub: SubscriptionObject = self.object()?;
                BillingEvent::SubscriptionDeleted {
                    customer_id: sub.customer,
                    subscription_id: sub.id,
                }
            }
            "invoice.payment_succeeded" | "invoice.paid" => {
                let invoice: InvoiceObject = self.object()?;
                BillingEvent::InvoicePaid {
                    customer_id: invoice.customer,
                    subscription_id: invoice.subscription,
                }
            }
            "invoice.payment_failed" => {
                let invoice: InvoiceObject = self.object()?;
                BillingEvent::InvoicePaymentFailed {
                    customer_id: invoice.customer,
                    invoice_id: invoice.id,
                }
            }
            other => BillingEvent::Other(other.to_string()),
        };
        Ok(event)
    }

    fn object<T: for<'de> Deserialize<'de>>(&self) -> Result<T, AppError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            AppError::BadRequest(format!("Malformed {} object: {}", self.event_type, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_unit";
    const NOW: i64 = 1_767_225_600;

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_webhook_payload(body, SECRET, NOW);
        assert!(verify_webhook_signature(body, &header, SECRET, NOW + 10).is_ok());
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let body = br#"{"id":"evt_1"}"#;
        let good = sign_webhook_payload(body, SECRET, NOW);
        let header = format!("t={},v1={},{}", NOW, "00".repeat(32), &good[good.find("v1").unwrap()..]);
        assert!(verify_webhook_signature(body, &header, SECRET, NOW).is_ok());
    }

    #[test]
    fn modified_body_is_rejected() {
        let body = br#"{"id":"evt_1","amount":100}"#;
        let header = sign_webhook_payload(body, SECRET, NOW);
        // Re-serialized JSON with different whitespace no longer matches.
        let reformatted = br#"{"id": "evt_1", "amount": 100}"#;
        assert!(matches!(
            verify_webhook_signature(reformatted, &header, SECRET, NOW),
            Err(AppError::WebhookSignatureInvalid(_))
        ));
    }

    #[test]
    fn wrong_secret_or_stale_timestamp_is_rejected() {
        let body = b"{}";
        let header = sign_webhook_payload(body, "whsec_other", NOW);
        assert!(verify_webhook_signature(body, &header, SECRET, NOW).is_err());

        let header = sign_webhook_payload(body, SECRET, NOW);
        assert!(verify_webhook_signature(body, &header, SECRET, NOW + WEBHOOK_TOLERANCE_SECS + 1)
            .is_err());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let only_timestamp = format!("t={}", NOW);
        for header in ["", "t=abc,v1=00", "v1=00", only_timestamp.as_str(), "garbage"] {
            assert!(
                verify_webhook_signature(b"{}", header, SECRET, NOW).is_err(),
                "accepted {:?}",
                header
            );
        }
    }

    fn event(event_type: &str, object: serde_json::Value) -> StripeEvent {
        StripeEvent {
            id: "evt_test".to_string(),
            event_type: event_type.to_string(),
            created: NOW,
            data: EventData { object },
        }
    }

    #[test]
    fn checkout_prefers_customer_details_email_and_metadata_user() {
        let e = event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "customer_email": "old@example.com",
                "customer_details": {"email": "buyer@example.com"},
                "metadata": {"userId": "u1"}
            }),
        );
        assert_eq!(
            e.billing_event().unwrap(),
            BillingEvent::CheckoutCompleted {
                customer_id: Some("cus_1".into()),
                subscription_id: Some("sub_1".into()),
                email: Some("buyer@example.com".into()),
                user_id: Some("u1".into()),
            }
        );
    }

    #[test]
    fn subscription_and_invoice_events_parse() {
        let e = event(
            "customer.subscription.updated",
            serde_json::json!({"id": "sub_1", "customer": "cus_1", "status": "past_due"}),
        );
        assert_eq!(
            e.billing_event().unwrap(),
            BillingEvent::SubscriptionChanged {
                customer_id: "cus_1".into(),
                subscription_id: "sub_1".into(),
                status: "past_due".into(),
            }
        );

        let e = event(
            "invoice.payment_failed",
            serde_json::json!({"id": "in_1", "customer": "cus_1", "subscription": "sub_1"}),
        );
        assert!(matches!(
            e.billing_event().unwrap(),
            BillingEvent::InvoicePaymentFailed { .. }
        ));

        let e = event("charge.refunded", serde_json::json!({}));
        assert_eq!(
            e.billing_event().unwrap(),
            BillingEvent::Other("charge.refunded".into())
        );
    }

    #[test]
    fn construct_rejects_before_parsing() {
        let body = b"not json";
        assert!(matches!(
            StripeEvent::construct(body, "t=1,v1=00", SECRET, 1),
            Err(AppError::WebhookSignatureInvalid(_))
        ));
        let header = sign_webhook_payload(body, SECRET, NOW);
        assert!(matches!(
            StripeEvent::construct(body, &header, SECRET, NOW),
            Err(AppError::BadRequest(_))
        ));
    }
}
