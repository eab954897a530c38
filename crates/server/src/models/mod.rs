//! Domain models for the fulfillment service.

pub mod customer;
pub mod order;

pub use customer::Customer;
pub use order::{EsimProfile, NewOrder, Order};
