//! Provisioning client for the eSIM inventory API.
//!
//! Allocates a SIM profile for a purchased bundle. Test mode is an injected
//! configuration parameter, not a global flag: in [`ProvisioningMode::Test`]
//! the client synthesizes a deterministic profile without any network call,
//! so the email/QR pipeline can be exercised without spending real inventory.

use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use wandersim_core::OrderNumber;

use crate::models::EsimProfile;

/// Inventory API base URL.
const DEFAULT_BASE_URL: &str = "https://api.esim-go.com/v2.4";

/// SM-DP+ address used by synthesized test profiles.
const TEST_SMDP_ADDRESS: &str = "rsp.test.esim-go.io";

/// Errors that can occur when provisioning an eSIM.
#[derive(Debug, Error)]
pub enum EsimError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The provider response is missing an assigned SIM or one of its
    /// activation fields.
    #[error("incomplete provisioning response: {0}")]
    IncompleteResponse(String),

    /// Failed to build the HTTP client.
    #[error("client setup error: {0}")]
    Setup(String),
}

/// Whether provisioning talks to the real inventory API or synthesizes
/// deterministic test profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningMode {
    #[default]
    Live,
    Test,
}

/// Allocates a SIM profile for a purchased bundle.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Order one eSIM for `bundle_name`, using the order number as the
    /// external reference at the provider.
    async fn provision(
        &self,
        bundle_name: &str,
        order_number: &OrderNumber,
    ) -> Result<EsimProfile, EsimError>;
}

/// HTTP client for the eSIM Go inventory API.
#[derive(Clone)]
pub struct EsimGoClient {
    client: reqwest::Client,
    base_url: String,
    mode: ProvisioningMode,
}

impl EsimGoClient {
    /// Create a new inventory API client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(
        api_key: &SecretString,
        base_url: Option<&str>,
        mode: ProvisioningMode,
    ) -> Result<Self, EsimError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-API-Key",
            HeaderValue::from_str(api_key.expose_secret())
                .map_err(|e| EsimError::Setup(format!("invalid API key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_owned(),
            mode,
        })
    }

    async fn order_live(
        &self,
        bundle_name: &str,
        order_number: &OrderNumber,
    ) -> Result<EsimProfile, EsimError> {
        let url = format!("{}/orders", self.base_url);

        let body = serde_json::json!({
            "type": "transaction",
            "assign": true,
            "order": [{
                "type": "bundle",
                "item": bundle_name,
                "quantity": 1
            }],
            "customerReference": order_number.as_str()
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EsimError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let order: ProviderOrderResponse = response.json().await?;
        extract_profile(order)
    }

    /// Synthesize a deterministic profile without touching the provider.
    ///
    /// ICCID from the current timestamp, fixed test SM-DP+ address, matching
    /// ID derived from the order number plus a random suffix.
    fn order_test(order_number: &OrderNumber) -> EsimProfile {
        let suffix: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(6)
            .map(char::from)
            .collect::<String>()
            .to_uppercase();

        EsimProfile {
            iccid: format!("8944{}", chrono::Utc::now().timestamp_millis()),
            smdp_address: TEST_SMDP_ADDRESS.to_owned(),
            matching_id: format!("TEST-{order_number}-{suffix}"),
        }
    }
}

#[async_trait]
impl Provisioner for EsimGoClient {
    #[instrument(skip(self), fields(bundle = %bundle_name, order = %order_number))]
    async fn provision(
        &self,
        bundle_name: &str,
        order_number: &OrderNumber,
    ) -> Result<EsimProfile, EsimError> {
        match self.mode {
            ProvisioningMode::Live => self.order_live(bundle_name, order_number).await,
            ProvisioningMode::Test => {
                let profile = Self::order_test(order_number);
                tracing::info!(iccid = %profile.iccid, "Synthesized test eSIM profile");
                Ok(profile)
            }
        }
    }
}

// =============================================================================
// Provider Response Types
// =============================================================================

/// Top-level provider order response.
#[derive(Debug, Deserialize)]
struct ProviderOrderResponse {
    #[serde(default)]
    order: Vec<OrderLineItem>,
}

/// One line item of a provider order.
#[derive(Debug, Deserialize)]
struct OrderLineItem {
    #[serde(default)]
    esims: Vec<AssignedEsim>,
}

/// An assigned SIM record. All fields are optional on the wire; absence of
/// any of the three is a provisioning failure.
#[derive(Debug, Deserialize)]
struct AssignedEsim {
    #[serde(default)]
    iccid: Option<String>,
    #[serde(default, rename = "smdpAddress")]
    smdp_address: Option<String>,
    #[serde(default, rename = "matchingId")]
    matching_id: Option<String>,
}

fn extract_profile(response: ProviderOrderResponse) -> Result<EsimProfile, EsimError> {
    let esim = response
        .order
        .into_iter()
        .flat_map(|item| item.esims)
        .next()
        .ok_or_else(|| EsimError::IncompleteResponse("no assigned eSIM in response".into()))?;

    match (esim.iccid, esim.smdp_address, esim.matching_id) {
        (Some(iccid), Some(smdp_address), Some(matching_id)) => Ok(EsimProfile {
            iccid,
            smdp_address,
            matching_id,
        }),
        (iccid, smdp, matching) => {
            let mut missing = Vec::new();
            if iccid.is_none() {
                missing.push("iccid");
            }
            if smdp.is_none() {
                missing.push("smdpAddress");
            }
            if matching.is_none() {
                missing.push("matchingId");
            }
            Err(EsimError::IncompleteResponse(format!(
                "missing fields: {}",
                missing.join(", ")
            )))
        }
    }
}
