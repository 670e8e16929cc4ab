//! Hosted checkout client.

use railgate::{Rail, UnixTimestamp};
use railgate_http::{RestClient, RestClientError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `POST /v1/checkouts` body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCheckout {
    /// External product id.
    pub product_id: String,
    /// Price override in USD.
    pub amount: Decimal,
    /// Always `USD`.
    pub currency: String,
    /// Prefilled payer email.
    pub customer_email: String,
    /// Our payment id, echoed back in webhooks.
    pub reference: String,
    /// Post-payment redirect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_url: Option<String>,
}

/// A checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    /// Session id.
    pub id: String,
    /// Hosted payment page.
    pub url: String,
    /// When the page stops accepting payment.
    #[serde(default)]
    pub expires_at: Option<UnixTimestamp>,
}

/// Checkout API client authenticated by bearer token.
#[derive(Debug, Clone)]
pub struct CheckoutClient {
    client: RestClient,
}

impl CheckoutClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Malformed URL or a key that cannot be sent as a header.
    pub fn try_new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, RestClientError> {
        let client = RestClient::try_new(Rail::Checkout, base_url)?
            .with_header("Authorization", &format!("Bearer {api_key}"))?
            .with_timeout(timeout);
        Ok(Self { client })
    }

    /// `POST /v1/checkouts`
    ///
    /// # Errors
    ///
    /// Upstream failures.
    pub async fn create_checkout(&self, body: &CreateCheckout) -> Result<CheckoutSession, RestClientError> {
        let url = self.client.url("v1/checkouts")?;
        self.client.post_json(&url, "POST /v1/checkouts", body).await
    }
}
