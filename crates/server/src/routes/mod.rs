//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                      - Liveness check
//! GET  /health/ready                - Readiness check (verifies database)
//!
//! # Payment gateway
//! POST /webhooks/stripe             - Signed webhook ingress
//!
//! # Public
//! GET  /orders/{session_id}/status  - Fulfillment status for a paid session
//!
//! # Operator (bearer token)
//! GET  /admin/orders                - Paginated order listing
//! POST /admin/orders/action         - Retry provisioning / resend email
//! ```

pub mod admin;
pub mod orders;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the application router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/stripe", post(webhooks::stripe))
        .route("/orders/{session_id}/status", get(orders::status))
        .route("/admin/orders", get(admin::list))
        .route("/admin/orders/action", post(admin::action))
}
