//! Processor REST client and wire types.

use railgate::Rail;
use railgate::proto::SettlementStatus;
use railgate_http::{RestClient, RestClientError};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// `POST /v1/payment` body.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePayment {
    /// Price in `price_currency`.
    pub price_amount: Decimal,
    /// Pricing currency, always `usd` here.
    pub price_currency: String,
    /// Currency the payer sends.
    pub pay_currency: String,
    /// Our payment id, echoed back in IPNs.
    pub order_id: String,
    /// Free text shown to the payer.
    pub order_description: String,
    /// IPN target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipn_callback_url: Option<String>,
}

/// Processor payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorStatus {
    /// Nothing received yet.
    Waiting,
    /// Seen on chain.
    Confirming,
    /// Confirmed on chain.
    Confirmed,
    /// Being forwarded to the merchant.
    Sending,
    /// Less than due arrived.
    PartiallyPaid,
    /// Done.
    Finished,
    /// Failed.
    Failed,
    /// Returned to the payer.
    Refunded,
    /// Lapsed.
    Expired,
    /// Anything newer than this client.
    #[serde(other)]
    Unknown,
}

impl ProcessorStatus {
    /// Maps the processor vocabulary onto settlement statuses.
    #[must_use]
    pub const fn settlement(self) -> SettlementStatus {
        match self {
            Self::Waiting | Self::Confirming | Self::Unknown => SettlementStatus::Pending,
            Self::Confirmed | Self::Sending | Self::Finished => SettlementStatus::Confirmed,
            Self::PartiallyPaid => SettlementStatus::Mismatched,
            Self::Failed | Self::Refunded => SettlementStatus::Failed,
            Self::Expired => SettlementStatus::Expired,
        }
    }
}

/// Payment ids arrive as numbers from some endpoints and strings from others.
pub(crate) fn payment_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        Text(String),
    }

    Ok(match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n.to_string(),
        NumberOrString::Text(s) => s,
    })
}

/// A processor payment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Payment {
    /// Provider payment id.
    #[serde(deserialize_with = "payment_id")]
    pub payment_id: String,
    /// Current status.
    pub payment_status: ProcessorStatus,
    /// Deposit address.
    #[serde(default)]
    pub pay_address: Option<String>,
    /// Amount due in `pay_currency`.
    #[serde(default)]
    pub pay_amount: Option<Decimal>,
    /// Currency due.
    #[serde(default)]
    pub pay_currency: Option<String>,
    /// Memo or destination tag, for currencies that need one.
    #[serde(default)]
    pub payin_extra_id: Option<String>,
    /// Amount received so far.
    #[serde(default)]
    pub actually_paid: Option<Decimal>,
    /// Payout transaction hash, once forwarded.
    #[serde(default)]
    pub payin_hash: Option<String>,
}

/// Processor client authenticated by `x-api-key`.
#[derive(Debug, Clone)]
pub struct ProcessorClient {
    client: RestClient,
}

impl ProcessorClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Malformed URL or a key that cannot be sent as a header.
    pub fn try_new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, RestClientError> {
        let client = RestClient::try_new(Rail::Processor, base_url)?
            .with_header("x-api-key", api_key)?
            .with_timeout(timeout);
        Ok(Self { client })
    }

    /// `POST /v1/payment`
    ///
    /// # Errors
    ///
    /// Upstream failures.
    pub async fn create_payment(&self, body: &CreatePayment) -> Result<Payment, RestClientError> {
        let url = self.client.url("v1/payment")?;
        self.client.post_json(&url, "POST /v1/payment", body).await
    }

    /// `GET /v1/payment/{id}`
    ///
    /// # Errors
    ///
    /// Upstream failures.
    pub async fn payment(&self, payment_id: &str) -> Result<Payment, RestClientError> {
        let url = self.client.url(&format!("v1/payment/{payment_id}"))?;
        self.client.get_json(&url, "GET /v1/payment/{id}").await
    }
}
