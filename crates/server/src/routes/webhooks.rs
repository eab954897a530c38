//! Payment gateway webhook ingress.
//!
//! The handler verifies the signature over the raw request body before any
//! JSON parsing, dispatches checkout completions to the fulfillment
//! orchestrator, and acknowledges everything else. The gateway retries on
//! non-2xx, so only a failure to establish the order returns one; a replay
//! of an already-complete order is acknowledged as a duplicate.

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde_json::{Value, json};

use crate::error::AppError;
use crate::services::fulfillment::FulfillmentOutcome;
use crate::state::AppState;

/// POST /webhooks/stripe
///
/// # Errors
///
/// Returns 400 for a missing or invalid signature or an undecodable
/// checkout session, 500 when the order could not be established.
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("missing Stripe-Signature header".to_string()))?;

    let event = state.stripe().verify_and_parse(&body, signature)?;

    if !event.is_checkout_completed() {
        tracing::debug!(event_type = %event.event_type, "ignoring webhook event");
        return Ok(Json(json!({ "received": true })));
    }

    let session = event.checkout_session()?;
    let outcome = state
        .fulfillment()
        .handle_payment_completed(session.into())
        .await?;

    let body = match outcome {
        FulfillmentOutcome::Skipped { reason } => json!({
            "received": true,
            "skipped": reason,
        }),
        FulfillmentOutcome::Duplicate { order_number } => json!({
            "received": true,
            "duplicate": true,
            "order_number": order_number,
        }),
        FulfillmentOutcome::Processed {
            order_number,
            esim_provisioned,
            email_sent,
        } => json!({
            "received": true,
            "order_number": order_number,
            "esim_provisioned": esim_provisioned,
            "email_sent": email_sent,
        }),
    };

    Ok(Json(body))
}
