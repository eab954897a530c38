//! Core types for Wandersim.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod activation;
pub mod email;
pub mod id;
pub mod order_number;
pub mod status;

pub use activation::{ActivationCode, ActivationCodeError};
pub use email::{Email, EmailError};
pub use id::*;
pub use order_number::{OrderNumber, OrderNumberError};
pub use status::{EsimStatus, FulfillmentState, OrderStatus};
