// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tier transitions driven by billing events.
//!
//! Every transition writes an absolute tier derived from the subscription
//! status carried by (or looked up for) the event, so replays and
//! out-of-order delivery converge on the same state. Events for a customer
//! that is not linked to any user are dropped with a warning.

use crate::db::RecordStore;
use crate::error::AppError;
use crate::models::{Tier, User, UserPatch};
use crate::services::stripe::{BillingEvent, StripeClient};
use crate::time_utils::now_rfc3339;

/// Subscription status recorded when a checkout completes.
const CHECKOUT_STATUS: &str = "active";

/// Status recorded when a subscription is deleted.
const DELETED_STATUS: &str = "canceled";

/// Result of applying one billing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementOutcome {
    /// The user record was written.
    Updated { user_id: String, tier: Tier },
    /// The event matched a user but changed nothing.
    Unchanged { user_id: String },
    /// No user is linked to the event's customer.
    UnknownCustomer { customer_id: String },
    /// The event type carries no entitlement meaning.
    Ignored,
}

/// Tier implied by a Stripe subscription status.
pub fn tier_for_status(status: &str) -> Tier {
    match status {
        "active" | "trialing" => Tier::Paid,
        _ => Tier::Free,
    }
}

/// Applies billing events to user records.
#[derive(Clone)]
pub struct EntitlementService {
    store: RecordStore,
    /// Used to resolve customers and confirm subscription status; optional
    /// so that events can be replayed offline.
    billing: Option<StripeClient>,
}

impl EntitlementService {
    pub fn new(store: RecordStore, billing: Option<StripeClient>) -> Self {
        Self { store, billing }
    }

    pub async fn apply(&self, event: &BillingEvent) -> Result<EntitlementOutcome, AppError> {
        match event {
            BillingEvent::CheckoutCompleted {
                customer_id,
                subscription_id,
                email,
                user_id,
            } => {
                self.checkout_completed(
                    customer_id.as_deref(),
                    subscription_id.as_deref(),
                    email.as_deref(),
                    user_id.as_deref(),
                )
                .await
            }
            BillingEvent::SubscriptionChanged {
                customer_id,
                subscription_id,
                status,
            } => {
                self.set_status(customer_id, Some(subscription_id), status)
                    .await
            }
            BillingEvent::SubscriptionDeleted {
                customer_id,
                subscription_id,
            } => {
                self.set_status(customer_id, Some(subscription_id), DELETED_STATUS)
                    .await
            }
            BillingEvent::InvoicePaid {
                customer_id,
                subscription_id,
            } => self.invoice_paid(customer_id, subscription_id.as_deref()).await,
            BillingEvent::InvoicePaymentFailed {
                customer_id,
                invoice_id,
            } => {
                match self.store.find_user_by_billing_customer(customer_id).await? {
                    Some(user) => {
                        tracing::warn!(
                            user_id = %user.id,
                            customer_id = %customer_id,
                            invoice_id = %invoice_id,
                            "Invoice payment failed; tier left unchanged"
                        );
                        Ok(EntitlementOutcome::Unchanged { user_id: user.id })
                    }
                    None => Ok(self.unknown_customer(customer_id)),
                }
            }
            BillingEvent::Other(event_type) => {
                tracing::debug!(event_type = %event_type, "Ignoring billing event");
                Ok(EntitlementOutcome::Ignored)
            }
        }
    }

    async fn checkout_completed(
        &self,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
        email: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<EntitlementOutcome, AppError> {
        let Some(user) = self.resolve_checkout_user(customer_id, email, user_id).await? else {
            tracing::warn!(
                customer_id = customer_id.unwrap_or("<none>"),
                "Checkout completed without a resolvable user or email; dropping"
            );
            return Ok(EntitlementOutcome::UnknownCustomer {
                customer_id: customer_id.unwrap_or_default().to_string(),
            });
        };

        let patch = UserPatch {
            billing_customer_id: customer_id.map(str::to_string),
            billing_subscription_id: subscription_id.map(str::to_string),
            billing_status: Some(CHECKOUT_STATUS.to_string()),
            tier: Some(Tier::Paid),
            ..UserPatch::at(&now_rfc3339())
        };
        self.persist_if_changed(&user, patch).await
    }

    /// Metadata user ID, then email, then the customer linkage (ours, then
    /// the provider's record of the customer's email). Falls back to
    /// creating a user with a synthetic ID when an email is known.
    async fn resolve_checkout_user(
        &self,
        customer_id: Option<&str>,
        email: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Option<User>, AppError> {
        if let Some(user_id) = user_id {
            if let Some(user) = self.store.get_user(user_id).await? {
                return Ok(Some(user));
            }
            tracing::warn!(user_id, "Checkout metadata names an unknown user");
        }

        if let Some(email) = email {
            if let Some(user) = self.store.find_user_by_email(email).await? {
                return Ok(Some(user));
            }
        }

        let mut email = email.map(str::to_string);

        if let Some(customer_id) = customer_id {
            if let Some(user) = self.store.find_user_by_billing_customer(customer_id).await? {
                return Ok(Some(user));
            }

            if email.is_none() {
                if let Some(billing) = &self.billing {
                    match billing.retrieve_customer(customer_id).await {
                        Ok(customer) if !customer.deleted => email = customer.email,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(customer_id, error = %e, "Customer lookup failed")
                        }
                    }
                }
            }
        }

        let Some(email) = email else {
            return Ok(None);
        };

        if let Some(user) = self.store.find_user_by_email(&email).await? {
            return Ok(Some(user));
        }

        let now = now_rfc3339();
        let user = User::new(uuid::Uuid::new_v4().to_string(), &email, &now);
        let user = self.store.create_user(&user).await?;
        tracing::info!(user_id = %user.id, "Created user from checkout");
        Ok(Some(user))
    }

    async fn invoice_paid(
        &self,
        customer_id: &str,
        subscription_id: Option<&str>,
    ) -> Result<EntitlementOutcome, AppError> {
        let Some(user) = self.store.find_user_by_billing_customer(customer_id).await? else {
            return Ok(self.unknown_customer(customer_id));
        };

        let mut status = None;
        if let (Some(billing), Some(subscription_id)) = (&self.billing, subscription_id) {
            match billing.retrieve_subscription(subscription_id).await {
                Ok(sub) => status = Some(sub.status),
                Err(e) => tracing::warn!(
                    subscription_id,
                    error = %e,
                    "Subscription lookup failed; using stored status"
                ),
            }
        }

        let Some(status) = status.or_else(|| user.billing_status.clone()) else {
            tracing::debug!(user_id = %user.id, "Invoice paid with no known subscription status");
            return Ok(EntitlementOutcome::Unchanged { user_id: user.id });
        };

        self.apply_status(user, subscription_id, &status).await
    }

    async fn set_status(
        &self,
        customer_id: &str,
        subscription_id: Option<&str>,
        status: &str,
    ) -> Result<EntitlementOutcome, AppError> {
        match self.store.find_user_by_billing_customer(customer_id).await? {
            Some(user) => self.apply_status(user, subscription_id, status).await,
            None => Ok(self.unknown_customer(customer_id)),
        }
    }

    async fn apply_status(
        &self,
        user: User,
        subscription_id: Option<&str>,
        status: &str,
    ) -> Result<EntitlementOutcome, AppError> {
        let patch = UserPatch {
            billing_subscription_id: subscription_id.map(str::to_string),
            billing_status: Some(status.to_string()),
            tier: Some(tier_for_status(status)),
            ..UserPatch::at(&now_rfc3339())
        };
        self.persist_if_changed(&user, patch).await
    }

    /// Write only the billing fields the event determines, so a concurrent
    /// credential or sign-in write to the same user is preserved.
    async fn persist_if_changed(
        &self,
        before: &User,
        patch: UserPatch,
    ) -> Result<EntitlementOutcome, AppError> {
        if patch.is_noop_for(before) {
            return Ok(EntitlementOutcome::Unchanged {
                user_id: before.id.clone(),
            });
        }

        let Some(user) = self.store.patch_user(&before.id, &patch).await? else {
            return Err(AppError::NotFound(format!("User {}", before.id)));
        };

        if user.tier != before.tier {
            tracing::info!(
                user_id = %user.id,
                from = %before.tier,
                to = %user.tier,
                "Tier changed"
            );
        }

        Ok(EntitlementOutcome::Updated {
            user_id: user.id,
            tier: user.tier,
        })
    }

    fn unknown_customer(&self, customer_id: &str) -> EntitlementOutcome {
        tracing::warn!(customer_id, "Billing event for unlinked customer; dropping");
        EntitlementOutcome::UnknownCustomer {
            customer_id: customer_id.to_string(),
        }
    }
}
