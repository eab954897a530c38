//! Operator endpoints for order inspection and remediation.
//!
//! All handlers require the operator bearer token. Actions are keyed by the
//! payment session id, same as the webhook, so an operator can paste an id
//! straight from the gateway dashboard.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use wandersim_core::{Email, FulfillmentState};

use crate::db::{OrderListFilter, list_orders};
use crate::error::AppError;
use crate::middleware::RequireOperatorAuth;
use crate::models::Order;
use crate::state::AppState;

// ============================================================================
// Listing
// ============================================================================

/// Query parameters for the order listing.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub status: Option<FulfillmentState>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

const fn default_page() -> u32 {
    1
}

const fn default_per_page() -> u32 {
    25
}

/// One row of the order listing.
#[derive(Debug, Serialize)]
pub struct ListedOrder {
    pub order_number: String,
    pub stripe_session_id: String,
    pub customer_email: String,
    pub destination_name: String,
    pub duration_days: i32,
    pub amount: String,
    pub fulfillment_state: FulfillmentState,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ListedOrder {
    fn from_row(order: Order, email: Email) -> Self {
        Self {
            order_number: order.order_number.to_string(),
            stripe_session_id: order.stripe_session_id.clone(),
            customer_email: email.to_string(),
            destination_name: order.destination_name.clone(),
            duration_days: order.duration_days,
            amount: format!("{:.2} {}", order.amount, order.currency),
            fulfillment_state: order.fulfillment_state(),
            created_at: order.created_at,
        }
    }
}

/// Response body for the order listing.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub orders: Vec<ListedOrder>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// GET /admin/orders
///
/// # Errors
///
/// Returns 401 without a valid operator token, 500 on database failure.
pub async fn list(
    _auth: RequireOperatorAuth,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let filter = OrderListFilter {
        search: params.search,
        state: params.status,
        page: params.page,
        per_page: params.per_page,
    };

    let page = list_orders(state.pool(), &filter).await?;

    Ok(Json(ListResponse {
        orders: page
            .orders
            .into_iter()
            .map(|(order, email)| ListedOrder::from_row(order, email))
            .collect(),
        total: page.total,
        page: params.page,
        per_page: params.per_page,
    }))
}

// ============================================================================
// Actions
// ============================================================================

/// Remediation to run against an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    /// Re-run provisioning and send the QR email.
    Retry,
    /// Re-send the confirmation email with the stored QR code.
    Resend,
}

/// Request body for an operator action.
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub session_id: String,
    pub action: OrderAction,
}

/// Response body for a completed action.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    pub order_number: String,
}

/// POST /admin/orders/action
///
/// # Errors
///
/// Returns 401 without a valid operator token, 404 for an unknown session,
/// 409 when the order state rejects the action (already provisioned, no
/// bundle, nothing to resend), 502 when the provider or email relay fails.
pub async fn action(
    _auth: RequireOperatorAuth,
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let (order_number, message) = match request.action {
        OrderAction::Retry => {
            let number = state.fulfillment().retry(&request.session_id).await?;
            let message = format!("order {number} provisioned and confirmation email sent");
            (number, message)
        }
        OrderAction::Resend => {
            let number = state.fulfillment().resend(&request.session_id).await?;
            let message = format!("confirmation email re-sent for order {number}");
            (number, message)
        }
    };

    tracing::info!(
        order_number = %order_number,
        action = ?request.action,
        "operator action completed"
    );

    Ok(Json(ActionResponse {
        success: true,
        message,
        order_number: order_number.to_string(),
    }))
}
