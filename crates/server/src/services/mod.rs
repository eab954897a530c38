//! Business logic services.

pub mod email;
pub mod esim;
pub mod fulfillment;
pub mod stripe;
