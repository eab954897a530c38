//! Fulfillment orchestrator.
//!
//! Consumes verified payment-completed events and drives an order to the
//! terminal state: customer upsert, order creation, eSIM provisioning, and
//! the confirmation email. Every entry point is idempotent under
//! at-least-once webhook delivery and re-enterable by operator actions.
//!
//! The two side effects run independently and in a fixed order (provision
//! before email), so a provisioning result obtained in this pass can be
//! embedded in the email sent in the same pass. Provisioning failure never
//! blocks the degraded "payment confirmed" email.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::instrument;

use wandersim_core::{Email, OrderNumber};

use crate::db::{OrderStore, RepositoryError};
use crate::models::{NewOrder, Order};
use crate::services::email::{EmailError, Mailer, OrderConfirmation};
use crate::services::esim::{EsimError, Provisioner};
use crate::services::stripe::CheckoutSession;

/// Errors surfaced by fulfillment entry points.
///
/// `handle_payment_completed` only ever returns the `Store` variant (ingress
/// validation drops bad events, provisioning and email failures are recorded
/// on the order instead of propagated); the operator variants carry the 4xx
/// guard-rail conditions for `retry`/`resend`.
#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error(transparent)]
    Store(#[from] RepositoryError),

    /// No order exists for the payment session.
    #[error("no order found for session {0}")]
    OrderNotFound(String),

    /// `retry` on an order that already has a QR code.
    #[error("order {0} is already provisioned")]
    AlreadyProvisioned(OrderNumber),

    /// `retry` on an order with no bundle name to provision.
    #[error("order {0} has no bundle name; nothing to provision")]
    NoBundle(OrderNumber),

    /// `resend` on an order with no QR code yet.
    #[error("order {0} has no QR code yet; nothing to resend")]
    NothingToResend(OrderNumber),

    /// Provisioning failed during an operator retry.
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] EsimError),

    /// Email dispatch failed during an operator action.
    #[error("email send failed: {0}")]
    Email(#[from] EmailError),
}

/// Summary returned to the webhook handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// The event could not be fulfilled and was dropped (data-quality
    /// condition, e.g. missing customer email). Acknowledged, not an error.
    Skipped {
        reason: &'static str,
    },
    /// The order already reached the terminal state; nothing was done.
    Duplicate {
        order_number: OrderNumber,
    },
    Processed {
        order_number: OrderNumber,
        esim_provisioned: bool,
        email_sent: bool,
    },
}

/// A verified payment-completed event, normalized from the gateway session.
#[derive(Debug, Clone)]
pub struct PaymentCompleted {
    pub session_id: String,
    pub payment_intent: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub destination_slug: Option<String>,
    pub duration_days: Option<i32>,
    pub locale: Option<String>,
    pub bundle_name: Option<String>,
}

impl From<CheckoutSession> for PaymentCompleted {
    fn from(session: CheckoutSession) -> Self {
        let details = session.customer_details;
        Self {
            session_id: session.id,
            payment_intent: session.payment_intent,
            amount: Decimal::new(session.amount_total.unwrap_or(0), 2),
            currency: session
                .currency
                .map_or_else(|| "USD".to_owned(), |c| c.to_uppercase()),
            customer_email: details.as_ref().and_then(|d| d.email.clone()),
            customer_name: details.as_ref().and_then(|d| d.name.clone()),
            customer_phone: details.and_then(|d| d.phone),
            destination_slug: session.metadata.destination_slug,
            duration_days: session.metadata.duration.and_then(|d| d.parse().ok()),
            locale: session.metadata.locale,
            bundle_name: session.metadata.bundle_name,
        }
    }
}

/// Per-session advisory locks.
///
/// Serializes overlapping fulfillment attempts for one payment session
/// (duplicate webhook deliveries, or an operator retry racing a late
/// redelivery) so the read-decide-call-write sequence never interleaves.
/// Entries live for the process lifetime; the map is bounded by the number
/// of distinct sessions seen between restarts.
#[derive(Default)]
struct SessionLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    fn get(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            map.entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

/// The fulfillment orchestrator.
pub struct FulfillmentService {
    store: Arc<dyn OrderStore>,
    provisioner: Arc<dyn Provisioner>,
    mailer: Arc<dyn Mailer>,
    order_prefix: String,
    locks: SessionLocks,
}

impl FulfillmentService {
    /// Create a new orchestrator over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        provisioner: Arc<dyn Provisioner>,
        mailer: Arc<dyn Mailer>,
        order_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provisioner,
            mailer,
            order_prefix: order_prefix.into(),
            locks: SessionLocks::default(),
        }
    }

    /// Access to the order store, for read-only surfaces (status endpoint).
    #[must_use]
    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    /// Handle a verified payment-completed event.
    ///
    /// Safe under at-least-once delivery: at most one order is ever created
    /// per payment session, replays of a complete order are reported as
    /// duplicates, and incomplete orders are resumed rather than recreated.
    ///
    /// # Errors
    ///
    /// Returns an error only for store failures while establishing the
    /// order; provisioning and email failures are recorded on the order and
    /// reflected in the outcome instead.
    #[instrument(skip(self, event), fields(session_id = %event.session_id))]
    pub async fn handle_payment_completed(
        &self,
        event: PaymentCompleted,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        // Cannot fulfill without a delivery address. Acknowledge and drop.
        let Some(raw_email) = event.customer_email.clone() else {
            tracing::warn!("payment event without customer email; dropping");
            return Ok(FulfillmentOutcome::Skipped {
                reason: "missing customer email",
            });
        };
        let Ok(customer_email) = Email::parse(&raw_email) else {
            tracing::warn!(email = %raw_email, "payment event with unparseable email; dropping");
            return Ok(FulfillmentOutcome::Skipped {
                reason: "invalid customer email",
            });
        };

        let lock = self.locks.get(&event.session_id);
        let _guard = lock.lock().await;

        let existing = self.store.find_by_session(&event.session_id).await?;

        if let Some(order) = &existing
            && order.fulfillment_state().is_complete()
        {
            tracing::info!(order_number = %order.order_number, "duplicate delivery for complete order");
            return Ok(FulfillmentOutcome::Duplicate {
                order_number: order.order_number.clone(),
            });
        }

        let order = match existing {
            Some(order) => order,
            None => self.establish_order(&event, &customer_email).await?,
        };

        // A resumed row may predate the bundle name (earlier event lacked
        // it). Persist it so a later operator retry can still provision.
        let order = if order.bundle_name.is_none()
            && let Some(bundle_name) = event.bundle_name.as_deref()
        {
            self.store.set_bundle_name(order.id, bundle_name).await?;
            self.reload(&event.session_id).await?
        } else {
            order
        };

        let bundle_hint = order.bundle_name.clone();
        let order = self.provision_step(order, bundle_hint.as_deref()).await?;
        let email_sent = self.email_step(&order, &customer_email).await?;

        Ok(FulfillmentOutcome::Processed {
            order_number: order.order_number.clone(),
            esim_provisioned: order.qr_code.is_some(),
            email_sent,
        })
    }

    /// Operator retry: re-provision an already-paid order and send the
    /// confirmation email with the fresh QR code.
    ///
    /// # Errors
    ///
    /// Rejects when the order is unknown, already has a QR code, or has no
    /// bundle name. Provisioning and email failures are surfaced to the
    /// operator (the failed provisioning attempt is also recorded).
    #[instrument(skip(self))]
    pub async fn retry(&self, session_id: &str) -> Result<OrderNumber, FulfillmentError> {
        let lock = self.locks.get(session_id);
        let _guard = lock.lock().await;

        let order = self
            .store
            .find_by_session(session_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(session_id.to_owned()))?;

        if order.qr_code.is_some() {
            return Err(FulfillmentError::AlreadyProvisioned(order.order_number));
        }
        let bundle_name = order
            .bundle_name
            .clone()
            .ok_or_else(|| FulfillmentError::NoBundle(order.order_number.clone()))?;

        let profile = match self.provisioner.provision(&bundle_name, &order.order_number).await {
            Ok(profile) => profile,
            Err(e) => {
                self.store.mark_provisioning_failed(order.id).await?;
                return Err(e.into());
            }
        };
        let qr_code = match profile.activation_code() {
            Ok(qr_code) => qr_code,
            Err(e) => {
                self.store.mark_provisioning_failed(order.id).await?;
                return Err(EsimError::IncompleteResponse(e.to_string()).into());
            }
        };

        self.store
            .record_provisioning(order.id, &profile, &qr_code, Utc::now())
            .await?;
        let order = self.reload(session_id).await?;

        let customer_email = self.customer_email(&order).await?;
        self.mailer
            .send_confirmation(&customer_email, &Self::confirmation(&order))
            .await?;
        self.store.mark_email_sent(order.id).await?;

        Ok(order.order_number)
    }

    /// Operator resend: re-send the confirmation email using the stored QR
    /// code.
    ///
    /// # Errors
    ///
    /// Rejects when the order is unknown or has no QR code yet; email
    /// failures are surfaced to the operator.
    #[instrument(skip(self))]
    pub async fn resend(&self, session_id: &str) -> Result<OrderNumber, FulfillmentError> {
        let lock = self.locks.get(session_id);
        let _guard = lock.lock().await;

        let order = self
            .store
            .find_by_session(session_id)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(session_id.to_owned()))?;

        if order.qr_code.is_none() {
            return Err(FulfillmentError::NothingToResend(order.order_number));
        }

        let customer_email = self.customer_email(&order).await?;
        self.mailer
            .send_confirmation(&customer_email, &Self::confirmation(&order))
            .await?;
        self.store.mark_email_sent(order.id).await?;

        Ok(order.order_number)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// First-time processing of a session: upsert the customer, resolve the
    /// destination, allocate an order number, and insert the order.
    ///
    /// A lost create race (unique violation on the session id) falls back to
    /// the existing row.
    async fn establish_order(
        &self,
        event: &PaymentCompleted,
        customer_email: &Email,
    ) -> Result<Order, FulfillmentError> {
        let customer = self
            .store
            .upsert_customer(
                customer_email,
                event.customer_name.as_deref(),
                event.customer_phone.as_deref(),
            )
            .await?;

        let destination_slug = event
            .destination_slug
            .clone()
            .unwrap_or_else(|| "unknown".to_owned());
        let destination_name = match self.store.destination_name(&destination_slug).await {
            Ok(Some(name)) => name,
            Ok(None) => prettify_slug(&destination_slug),
            Err(e) => {
                tracing::warn!(error = %e, slug = %destination_slug, "destination lookup failed; using slug");
                prettify_slug(&destination_slug)
            }
        };

        // One re-allocation covers the common numbering race (two processes
        // reading the same daily maximum); a second collision propagates.
        let mut reallocated = false;
        loop {
            let order_number = self
                .store
                .next_order_number(&self.order_prefix, Utc::now().date_naive())
                .await?;

            let new_order = NewOrder {
                order_number,
                customer_id: customer.id,
                destination_slug: destination_slug.clone(),
                destination_name: destination_name.clone(),
                duration_days: event.duration_days.unwrap_or(0),
                bundle_name: event.bundle_name.clone(),
                amount: event.amount,
                currency: event.currency.clone(),
                stripe_session_id: event.session_id.clone(),
                stripe_payment_intent: event.payment_intent.clone(),
                locale: event.locale.clone().unwrap_or_else(|| "en".to_owned()),
            };

            match self.store.create_order(new_order).await {
                Ok(order) => {
                    tracing::info!(order_number = %order.order_number, "order created");
                    return Ok(order);
                }
                Err(RepositoryError::Conflict(_)) => {
                    tracing::info!("lost create race for session; resuming existing order");
                    return self.reload(&event.session_id).await;
                }
                Err(RepositoryError::OrderNumberCollision(number)) if !reallocated => {
                    tracing::info!(order_number = %number, "lost allocation race; re-allocating");
                    reallocated = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Provision an eSIM if the order still needs one and a bundle is known.
    ///
    /// Returns the order with any freshly assigned QR code visible, so the
    /// email step in the same pass can embed it.
    async fn provision_step(
        &self,
        order: Order,
        bundle_hint: Option<&str>,
    ) -> Result<Order, FulfillmentError> {
        if order.qr_code.is_some() {
            return Ok(order);
        }

        let Some(bundle_name) = bundle_hint else {
            tracing::warn!(order_number = %order.order_number, "no bundle name known; skipping provisioning");
            return Ok(order);
        };

        let result = self.provisioner.provision(bundle_name, &order.order_number).await;
        match result.and_then(|profile| {
            profile
                .activation_code()
                .map(|qr_code| (profile, qr_code))
                .map_err(|e| EsimError::IncompleteResponse(e.to_string()))
        }) {
            Ok((profile, qr_code)) => {
                let wrote = self
                    .store
                    .record_provisioning(order.id, &profile, &qr_code, Utc::now())
                    .await?;
                if !wrote {
                    // Another pass got there first. Keep the stored values.
                    tracing::info!(order_number = %order.order_number, "QR code already assigned; keeping stored values");
                }
                self.reload(&order.stripe_session_id).await
            }
            Err(e) => {
                tracing::warn!(order_number = %order.order_number, error = %e, "provisioning failed; continuing to email step");
                self.store.mark_provisioning_failed(order.id).await?;
                self.reload(&order.stripe_session_id).await
            }
        }
    }

    /// Send the confirmation email if it has not gone out yet.
    ///
    /// Send failures are logged and left for operator remediation (the flag
    /// stays false so a later resend picks it up); they never fail the pass.
    async fn email_step(
        &self,
        order: &Order,
        customer_email: &Email,
    ) -> Result<bool, FulfillmentError> {
        if order.confirmation_email_sent {
            return Ok(true);
        }

        match self
            .mailer
            .send_confirmation(customer_email, &Self::confirmation(order))
            .await
        {
            Ok(()) => {
                self.store.mark_email_sent(order.id).await?;
                Ok(true)
            }
            Err(e) => {
                tracing::error!(
                    order_number = %order.order_number,
                    error = %e,
                    "confirmation email failed; flag left unset for operator resend"
                );
                Ok(false)
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn reload(&self, session_id: &str) -> Result<Order, FulfillmentError> {
        self.store
            .find_by_session(session_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::DataCorruption(format!(
                    "order for session {session_id} disappeared"
                ))
                .into()
            })
    }

    async fn customer_email(&self, order: &Order) -> Result<Email, FulfillmentError> {
        let customer = self
            .store
            .find_customer(order.customer_id)
            .await?
            .ok_or_else(|| {
                FulfillmentError::Store(RepositoryError::DataCorruption(format!(
                    "customer {} missing for order {}",
                    order.customer_id, order.order_number
                )))
            })?;
        Ok(customer.email)
    }

    fn confirmation(order: &Order) -> OrderConfirmation {
        OrderConfirmation {
            order_number: order.order_number.to_string(),
            destination_name: order.destination_name.clone(),
            duration_days: order.duration_days,
            amount: format!("{:.2} {}", order.amount, order.currency),
            activation_code: order.qr_code.clone(),
        }
    }
}

/// Human-readable fallback when a destination slug has no catalog entry:
/// `south-korea` becomes `South Korea`.
fn prettify_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + chars.as_str()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prettify_slug() {
        assert_eq!(prettify_slug("japan"), "Japan");
        assert_eq!(prettify_slug("south-korea"), "South Korea");
        assert_eq!(prettify_slug("united-arab-emirates"), "United Arab Emirates");
        assert_eq!(prettify_slug(""), "");
    }

    #[test]
    fn test_payment_completed_from_session() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "payment_intent": "pi_1",
            "amount_total": 2450,
            "currency": "eur",
            "customer_details": { "email": "a@example.com", "name": "Ada" },
            "metadata": { "destination_slug": "japan", "duration": "5", "bundle_name": "jp-5day-unltd" }
        }))
        .expect("valid session");

        let event = PaymentCompleted::from(session);
        assert_eq!(event.amount, Decimal::new(2450, 2));
        assert_eq!(event.currency, "EUR");
        assert_eq!(event.duration_days, Some(5));
        assert_eq!(event.bundle_name.as_deref(), Some("jp-5day-unltd"));
    }

    #[test]
    fn test_payment_completed_defaults() {
        let session: CheckoutSession =
            serde_json::from_value(serde_json::json!({ "id": "cs_2" })).expect("valid session");

        let event = PaymentCompleted::from(session);
        assert_eq!(event.amount, Decimal::new(0, 2));
        assert_eq!(event.currency, "USD");
        assert!(event.customer_email.is_none());
        assert!(event.bundle_name.is_none());
    }
}
