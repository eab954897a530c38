//! Order and fulfillment status types.

use serde::{Deserialize, Serialize};

/// Order payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
}

/// Provisioning outcome recorded on an order.
///
/// Unset until the first provisioning attempt for the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "esim_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum EsimStatus {
    /// The provider accepted the order and assigned a SIM profile.
    Ordered,
    /// The last provisioning attempt failed; an operator retry can clear it.
    Failed,
}

/// Derived fulfillment state of an order.
///
/// Storage keeps independent fields (`qr_code`, `confirmation_email_sent`,
/// `esim_status`); this enum is the single derived state used for
/// validation, admin filtering, and tests. It is never persisted.
///
/// Reachable states: `New` → `Provisioned` → `Complete`, with
/// `ProvisionFailed` as the recoverable side branch. A degraded
/// confirmation email can be sent before provisioning succeeds, so
/// `email_sent` alone does not imply `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentState {
    /// Neither a QR code nor a confirmation email yet.
    New,
    /// QR code assigned, confirmation email still outstanding.
    Provisioned,
    /// QR code assigned and confirmation email sent. Terminal.
    Complete,
    /// Provisioning was attempted and failed; no QR code.
    ProvisionFailed,
}

impl FulfillmentState {
    /// Derive the fulfillment state from the stored flags.
    #[must_use]
    pub const fn derive(
        has_qr_code: bool,
        email_sent: bool,
        esim_status: Option<EsimStatus>,
    ) -> Self {
        match (has_qr_code, email_sent) {
            (true, true) => Self::Complete,
            (true, false) => Self::Provisioned,
            (false, _) => match esim_status {
                Some(EsimStatus::Failed) => Self::ProvisionFailed,
                _ => Self::New,
            },
        }
    }

    /// Whether the order has reached the terminal state.
    ///
    /// A complete order is idempotent: any further fulfillment invocation
    /// is a no-op reported as a duplicate.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}
