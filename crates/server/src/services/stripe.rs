//! Payment gateway adapter for Stripe webhooks.
//!
//! Verifies inbound webhook signatures and exposes the checkout-session
//! fields the fulfillment orchestrator consumes. Payment capture itself is
//! entirely Stripe's concern; nothing here ever re-triggers a charge.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

/// Event type that triggers fulfillment. All other types are acknowledged
/// without action.
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// Maximum age of a signed webhook before it is rejected as a replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Errors that can occur when handling Stripe webhooks.
#[derive(Debug, Error)]
pub enum StripeError {
    /// The signature header is missing, malformed, stale, or wrong.
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// The verified payload could not be decoded.
    #[error("failed to parse webhook payload: {0}")]
    Parse(String),
}

/// Stripe webhook verifier and event decoder.
#[derive(Clone)]
pub struct StripeClient {
    webhook_secret: SecretString,
}

impl StripeClient {
    /// Create a new client from the endpoint's signing secret.
    #[must_use]
    pub const fn new(webhook_secret: SecretString) -> Self {
        Self { webhook_secret }
    }

    /// Verify a webhook signature and decode the event envelope.
    ///
    /// The `Stripe-Signature` header carries `t=<unix>,v1=<hex>[,v1=<hex>]`;
    /// the signed payload is `<t>.<raw body>` under HMAC-SHA256 with the
    /// endpoint secret. Timestamps older than five minutes are rejected to
    /// prevent replays.
    ///
    /// # Errors
    ///
    /// Returns `StripeError::InvalidSignature` on any verification failure
    /// and `StripeError::Parse` if the verified body is not a valid event.
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, StripeError> {
        self.verify_signature(payload, signature_header)?;

        serde_json::from_slice(payload).map_err(|e| StripeError::Parse(e.to_string()))
    }

    fn verify_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<(), StripeError> {
        let mut timestamp: Option<&str> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for element in signature_header.split(',') {
            match element.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| StripeError::InvalidSignature("missing timestamp".into()))?;
        if candidates.is_empty() {
            return Err(StripeError::InvalidSignature(
                "missing v1 signature".into(),
            ));
        }

        // Reject stale timestamps to prevent replay attacks.
        let ts: i64 = timestamp
            .parse()
            .map_err(|_| StripeError::InvalidSignature("invalid timestamp".into()))?;
        let now = chrono::Utc::now().timestamp();
        if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(StripeError::InvalidSignature(
                "request timestamp too old".into(),
            ));
        }

        let mut mac = Hmac::<Sha256>::new_from_slice(
            self.webhook_secret.expose_secret().as_bytes(),
        )
        .map_err(|e| StripeError::InvalidSignature(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);

        let expected = hex::encode(mac.finalize().into_bytes());

        if candidates
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            Ok(())
        } else {
            Err(StripeError::InvalidSignature("signature mismatch".into()))
        }
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

// =============================================================================
// Event Types
// =============================================================================

/// A verified webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

/// The `data` member of a webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Whether this event should trigger fulfillment.
    #[must_use]
    pub fn is_checkout_completed(&self) -> bool {
        self.event_type == CHECKOUT_SESSION_COMPLETED
    }

    /// Decode the event object as a checkout session.
    ///
    /// # Errors
    ///
    /// Returns `StripeError::Parse` if the object is not a checkout session.
    pub fn checkout_session(&self) -> Result<CheckoutSession, StripeError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| StripeError::Parse(e.to_string()))
    }
}

/// A completed checkout session.
///
/// All metadata fields are optional at the type level; fulfillment quality
/// degrades without them (destination name falls back to the slug,
/// provisioning is skipped without a bundle name).
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Total in the currency's smallest unit (cents).
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

/// Customer contact details collected at checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Fulfillment metadata attached to the session at checkout creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub destination_slug: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub bundle_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_fake_test_signing_key_1234";

    fn client() -> StripeClient {
        StripeClient::new(SecretString::from(SECRET))
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("valid key length");
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn event_body() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_123",
                    "payment_intent": "pi_123",
                    "amount_total": 1999,
                    "currency": "usd",
                    "customer_details": {
                        "email": "a@example.com",
                        "name": "Ada Traveler",
                        "phone": null
                    },
                    "metadata": {
                        "destination_slug": "japan",
                        "duration": "5",
                        "locale": "en",
                        "bundle_name": "jp-5day-unltd"
                    }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_valid_signature_parses_event() {
        let payload = event_body();
        let header = sign(&payload, SECRET, chrono::Utc::now().timestamp());

        let event = client()
            .verify_and_parse(&payload, &header)
            .expect("valid signature");

        assert!(event.is_checkout_completed());
        let session = event.checkout_session().expect("checkout session");
        assert_eq!(session.id, "cs_test_123");
        assert_eq!(session.metadata.bundle_name.as_deref(), Some("jp-5day-unltd"));
        assert_eq!(
            session.customer_details.and_then(|d| d.email).as_deref(),
            Some("a@example.com")
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = event_body();
        let header = sign(&payload, "whsec_other_secret_key_000", chrono::Utc::now().timestamp());

        let result = client().verify_and_parse(&payload, &header);
        assert!(matches!(result, Err(StripeError::InvalidSignature(_))));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = event_body();
        let header = sign(&payload, SECRET, chrono::Utc::now().timestamp());

        let mut tampered = payload.clone();
        tampered.extend_from_slice(b" ");
        let result = client().verify_and_parse(&tampered, &header);
        assert!(matches!(result, Err(StripeError::InvalidSignature(_))));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = event_body();
        let header = sign(&payload, SECRET, chrono::Utc::now().timestamp() - 600);

        let result = client().verify_and_parse(&payload, &header);
        assert!(matches!(result, Err(StripeError::InvalidSignature(_))));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let payload = event_body();

        for header in ["", "t=abc,v1=00", "v1=00", "t=12345"] {
            let result = client().verify_and_parse(&payload, header);
            assert!(
                matches!(result, Err(StripeError::InvalidSignature(_))),
                "header {header:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_second_v1_candidate_accepted() {
        // Stripe sends multiple v1 entries during secret rotation.
        let payload = event_body();
        let timestamp = chrono::Utc::now().timestamp();
        let good = sign(&payload, SECRET, timestamp);
        let good_sig = good.split("v1=").nth(1).expect("signature").to_owned();
        let header = format!("t={timestamp},v1=deadbeef,v1={good_sig}");

        assert!(client().verify_and_parse(&payload, &header).is_ok());
    }

    #[test]
    fn test_other_event_types_parse() {
        let payload = serde_json::json!({
            "type": "payment_intent.created",
            "data": { "object": {} }
        })
        .to_string()
        .into_bytes();
        let header = sign(&payload, SECRET, chrono::Utc::now().timestamp());

        let event = client()
            .verify_and_parse(&payload, &header)
            .expect("valid signature");
        assert!(!event.is_checkout_completed());
    }
}
