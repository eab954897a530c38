//! Authentication extractor for the operator endpoints.
//!
//! Operator actions (retry, resend, order listing) are protected by a static
//! bearer token checked in constant time against the configured value.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use secrecy::ExposeSecret;

use crate::error::AppError;
use crate::state::AppState;

/// Extractor that requires a valid operator bearer token.
///
/// ```rust,ignore
/// async fn protected_handler(
///     _auth: RequireOperatorAuth,
///     State(state): State<AppState>,
/// ) -> impl IntoResponse {
///     // only reached with a valid token
/// }
/// ```
pub struct RequireOperatorAuth;

impl FromRequestParts<AppState> for RequireOperatorAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing authorization header".to_string()))?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("expected bearer token".to_string()))?;

        let expected = state.config().operator_api_token.expose_secret();
        if !constant_time_compare(token.as_bytes(), expected.as_bytes()) {
            return Err(AppError::Unauthorized("invalid operator token".to_string()));
        }

        Ok(Self)
    }
}

/// Compare two byte slices without early exit on mismatch.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"token", b"token"));
        assert!(!constant_time_compare(b"token", b"other"));
        assert!(!constant_time_compare(b"token", b"token-longer"));
        assert!(constant_time_compare(b"", b""));
    }
}
