//! Customer domain model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use wandersim_core::{CustomerId, Email};

/// A customer, keyed by email.
///
/// One row per distinct email: later purchases merge in newly supplied
/// name/phone values but never create a duplicate.
#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub id: CustomerId,
    pub email: Email,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
