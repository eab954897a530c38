//! eSIM activation codes (QR payloads).
//!
//! An eSIM is installed by scanning a QR code whose payload follows the
//! GSMA activation-code grammar: `LPA:1$<smdp_address>$<matching_id>`.
//! Only the payload string is persisted; the scannable image is rendered
//! from it at send time via a QR image service.

use core::fmt;

use serde::{Deserialize, Serialize};

/// QR image rendering service. Takes the URL-encoded payload as `data`.
const QR_IMAGE_ENDPOINT: &str = "https://api.qrserver.com/v1/create-qr-code/";

/// Errors that can occur when building an [`ActivationCode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ActivationCodeError {
    /// The SM-DP+ address is empty.
    #[error("SM-DP+ address cannot be empty")]
    EmptySmdpAddress,
    /// The matching ID is empty.
    #[error("matching ID cannot be empty")]
    EmptyMatchingId,
    /// A component contains the `$` separator character.
    #[error("activation code component cannot contain '$'")]
    InvalidCharacter,
}

/// An eSIM activation code in the `LPA:1$<smdp>$<matching_id>` grammar.
///
/// Construction is deterministic: the same SM-DP+ address and matching ID
/// always produce the same payload.
///
/// ## Examples
///
/// ```
/// use wandersim_core::ActivationCode;
///
/// let code = ActivationCode::new("rsp.example.io", "ABC-123").expect("valid parts");
/// assert_eq!(code.as_str(), "LPA:1$rsp.example.io$ABC-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivationCode(String);

impl ActivationCode {
    /// Build an activation code from an SM-DP+ address and a matching ID.
    ///
    /// # Errors
    ///
    /// Returns an error if either component is empty or contains the `$`
    /// separator.
    pub fn new(smdp_address: &str, matching_id: &str) -> Result<Self, ActivationCodeError> {
        if smdp_address.is_empty() {
            return Err(ActivationCodeError::EmptySmdpAddress);
        }
        if matching_id.is_empty() {
            return Err(ActivationCodeError::EmptyMatchingId);
        }
        if smdp_address.contains('$') || matching_id.contains('$') {
            return Err(ActivationCodeError::InvalidCharacter);
        }

        Ok(Self(format!("LPA:1${smdp_address}${matching_id}")))
    }

    /// Wrap an already-encoded payload string (e.g. read back from storage).
    #[must_use]
    pub fn from_payload(payload: String) -> Self {
        Self(payload)
    }

    /// Returns the payload as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `ActivationCode` and returns the payload string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// URL of a scannable QR image for this payload.
    ///
    /// The image is never stored; it is rendered by a third-party service
    /// when the confirmation email is displayed.
    #[must_use]
    pub fn qr_image_url(&self) -> String {
        format!(
            "{QR_IMAGE_ENDPOINT}?size=300x300&data={}",
            urlencoding::encode(&self.0)
        )
    }
}

impl fmt::Display for ActivationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_grammar() {
        let code = ActivationCode::new("rsp.test.esim-go.io", "TEST-WS-20260314-001-A7F2")
            .expect("valid parts");
        assert_eq!(
            code.as_str(),
            "LPA:1$rsp.test.esim-go.io$TEST-WS-20260314-001-A7F2"
        );
    }

    #[test]
    fn test_deterministic() {
        let a = ActivationCode::new("rsp.example.io", "M-1").expect("valid parts");
        let b = ActivationCode::new("rsp.example.io", "M-1").expect("valid parts");
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_empty_components() {
        assert!(matches!(
            ActivationCode::new("", "M-1"),
            Err(ActivationCodeError::EmptySmdpAddress)
        ));
        assert!(matches!(
            ActivationCode::new("rsp.example.io", ""),
            Err(ActivationCodeError::EmptyMatchingId)
        ));
    }

    #[test]
    fn test_rejects_separator_in_components() {
        assert!(matches!(
            ActivationCode::new("rsp$example.io", "M-1"),
            Err(ActivationCodeError::InvalidCharacter)
        ));
        assert!(matches!(
            ActivationCode::new("rsp.example.io", "M$1"),
            Err(ActivationCodeError::InvalidCharacter)
        ));
    }

    #[test]
    fn test_qr_image_url_encodes_payload() {
        let code = ActivationCode::new("rsp.example.io", "M-1").expect("valid parts");
        let url = code.qr_image_url();
        assert!(url.starts_with("https://api.qrserver.com/v1/create-qr-code/?size=300x300&data="));
        assert!(url.contains("LPA%3A1%24rsp.example.io%24M-1"));
    }
}
