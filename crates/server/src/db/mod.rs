//! Database operations for the fulfillment service.
//!
//! # Tables
//!
//! - `customer` - Customers keyed by unique email
//! - `orders` - One row per paid checkout session (unique `stripe_session_id`)
//! - `destination` - Slug to display-name lookup, seeded via the CLI
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/`, embedded via
//! `sqlx::migrate!`, and run on server startup or via:
//! ```bash
//! cargo run -p wandersim-cli -- migrate
//! ```

pub mod orders;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use wandersim_core::{ActivationCode, CustomerId, Email, OrderId, OrderNumber};

use crate::models::{Customer, EsimProfile, NewOrder, Order};

pub use orders::{OrderListFilter, OrderListPage, PgOrderStore, list_orders};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate payment session).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// A concurrently allocated order number won the insert race.
    #[error("order number collision: {0}")]
    OrderNumberCollision(String),
}

/// Persistence contract for the fulfillment orchestrator.
///
/// The production implementation is [`PgOrderStore`]; tests substitute an
/// in-memory store. All mutations that guard fulfillment invariants
/// (QR immutability, one-shot email flag) are conditional updates here, so
/// every implementation carries the same no-regression semantics.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Look up an order by its payment session id (the idempotency key).
    async fn find_by_session(&self, session_id: &str)
    -> Result<Option<Order>, RepositoryError>;

    /// Create the customer for an email, or merge newly supplied name/phone
    /// into the existing row (new non-null values win, nulls keep the old).
    async fn upsert_customer(
        &self,
        email: &Email,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Customer, RepositoryError>;

    /// Look up a customer by id (for the email step on resumed orders).
    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError>;

    /// Display name for a destination slug, if known.
    async fn destination_name(&self, slug: &str) -> Result<Option<String>, RepositoryError>;

    /// Allocate the next order number for the given day.
    ///
    /// Reads the day's highest sequence and increments it. Two processes
    /// allocating in the same instant can collide; the unique constraint on
    /// `order_number` turns that into a `Conflict` at insert time.
    async fn next_order_number(
        &self,
        prefix: &str,
        date: NaiveDate,
    ) -> Result<OrderNumber, RepositoryError>;

    /// Insert a new order.
    ///
    /// Returns `Conflict` when an order for the same payment session already
    /// exists (the caller falls back to resuming that order) and
    /// `OrderNumberCollision` when the allocated order number was taken by a
    /// concurrent insert (the caller re-allocates).
    async fn create_order(&self, new_order: NewOrder) -> Result<Order, RepositoryError>;

    /// Backfill a bundle name learned from a redelivered event. Only fires
    /// while the row has none; an assigned bundle name is never overwritten.
    async fn set_bundle_name(
        &self,
        order_id: OrderId,
        bundle_name: &str,
    ) -> Result<(), RepositoryError>;

    /// Persist a successful provisioning result.
    ///
    /// Only fires while `qr_code` is still null; returns `false` without
    /// touching the row when a QR code is already assigned.
    async fn record_provisioning(
        &self,
        order_id: OrderId,
        profile: &EsimProfile,
        qr_code: &ActivationCode,
        provisioned_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Mark the last provisioning attempt as failed. Never clears an
    /// assigned QR code.
    async fn mark_provisioning_failed(&self, order_id: OrderId) -> Result<(), RepositoryError>;

    /// Flip `confirmation_email_sent` to true. Idempotent; the flag never
    /// resets to false.
    async fn mark_email_sent(&self, order_id: OrderId) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
