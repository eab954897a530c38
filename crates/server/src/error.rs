//! Unified error handling for the fulfillment server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::email::EmailError;
use crate::services::esim::EsimError;
use crate::services::fulfillment::FulfillmentError;
use crate::services::stripe::StripeError;

/// Application-level error type for HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Webhook payload failed verification or parsing.
    #[error("Webhook error: {0}")]
    Webhook(#[from] StripeError),

    /// eSIM provisioning failed.
    #[error("Provisioning error: {0}")]
    Provisioning(#[from] EsimError),

    /// Email dispatch failed.
    #[error("Email error: {0}")]
    Email(#[from] EmailError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Request conflicts with the order's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FulfillmentError> for AppError {
    fn from(err: FulfillmentError) -> Self {
        match err {
            FulfillmentError::Store(e) => Self::Database(e),
            FulfillmentError::OrderNotFound(session_id) => {
                Self::NotFound(format!("no order for session {session_id}"))
            }
            FulfillmentError::AlreadyProvisioned(_)
            | FulfillmentError::NothingToResend(_)
            | FulfillmentError::NoBundle(_) => Self::Conflict(err.to_string()),
            FulfillmentError::Provisioning(e) => Self::Provisioning(e),
            FulfillmentError::Email(e) => Self::Email(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log server errors with Sentry
        if matches!(
            self,
            Self::Database(_) | Self::Internal(_) | Self::Provisioning(_) | Self::Email(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Provisioning(_) | Self::Email(_) => StatusCode::BAD_GATEWAY,
            Self::Webhook(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
        };

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Provisioning(_) => "Provisioning service error".to_string(),
            Self::Email(_) => "Email delivery error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("cs_test_123".to_string());
        assert_eq!(err.to_string(), "Not found: cs_test_123");

        let err = AppError::Conflict("already provisioned".to_string());
        assert_eq!(err.to_string(), "Conflict: already provisioned");
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            get_status(AppError::NotFound("x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("x".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::Conflict("x".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::Internal("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_fulfillment_error_mapping() {
        use wandersim_core::OrderNumber;

        let number: OrderNumber = "WS-20260314-001".parse().expect("valid number");

        let err: AppError = FulfillmentError::OrderNotFound("cs_1".to_string()).into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = FulfillmentError::AlreadyProvisioned(number.clone()).into();
        assert!(matches!(err, AppError::Conflict(_)));

        let err: AppError = FulfillmentError::NothingToResend(number.clone()).into();
        assert!(matches!(err, AppError::Conflict(_)));

        let err: AppError = FulfillmentError::NoBundle(number).into();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
