//! Order domain model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use wandersim_core::{
    ActivationCode, CustomerId, EsimStatus, FulfillmentState, OrderId, OrderNumber, OrderStatus,
};

/// A purchased eSIM order.
///
/// Created exactly once per payment session (the `stripe_session_id` column
/// is unique) and mutated in place by the provisioning and email steps.
/// Fulfillment progress is tracked through independent fields; the derived
/// state lives in [`FulfillmentState`].
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub destination_slug: String,
    pub destination_name: String,
    pub duration_days: i32,
    /// Wholesale product identifier at the provider. Provisioning is
    /// skipped while this is unknown.
    pub bundle_name: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub stripe_session_id: String,
    pub stripe_payment_intent: Option<String>,
    pub iccid: Option<String>,
    pub smdp_address: Option<String>,
    pub matching_id: Option<String>,
    /// Immutable once set; a retry never overwrites an assigned QR code.
    pub qr_code: Option<ActivationCode>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub esim_status: Option<EsimStatus>,
    pub confirmation_email_sent: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub locale: String,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Derived fulfillment state of this order.
    #[must_use]
    pub fn fulfillment_state(&self) -> FulfillmentState {
        FulfillmentState::derive(
            self.qr_code.is_some(),
            self.confirmation_email_sent,
            self.esim_status,
        )
    }
}

/// Fields for inserting a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub destination_slug: String,
    pub destination_name: String,
    pub duration_days: i32,
    pub bundle_name: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub stripe_session_id: String,
    pub stripe_payment_intent: Option<String>,
    pub locale: String,
}

/// A provisioned SIM profile returned by the inventory provider.
///
/// The SM-DP+ address and matching ID together form the activation code;
/// the ICCID identifies the assigned profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsimProfile {
    pub iccid: String,
    pub smdp_address: String,
    pub matching_id: String,
}

impl EsimProfile {
    /// Build the activation code (QR payload) for this profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider handed back components that cannot
    /// form a valid activation code.
    pub fn activation_code(&self) -> Result<ActivationCode, wandersim_core::ActivationCodeError> {
        ActivationCode::new(&self.smdp_address, &self.matching_id)
    }
}
