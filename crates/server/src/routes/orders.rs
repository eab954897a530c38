//! Public order status endpoint.
//!
//! Polled by the post-checkout page; keyed by the payment session id the
//! customer already holds, and deliberately terse (no PII, no activation
//! data).

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use wandersim_core::OrderStatus;

use crate::error::AppError;
use crate::state::AppState;

/// Customer-facing fulfillment status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub order_number: String,
}

/// GET /orders/{session_id}/status
///
/// # Errors
///
/// Returns 404 when no order exists for the session.
pub async fn status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let order = state
        .fulfillment()
        .store()
        .find_by_session(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no order for session {session_id}")))?;

    let status = if order.fulfillment_state().is_complete() {
        "ready"
    } else if order.status == OrderStatus::Paid {
        "processing"
    } else {
        "pending"
    };

    Ok(Json(StatusResponse {
        status,
        order_number: order.order_number.to_string(),
    }))
}
