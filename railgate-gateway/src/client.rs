//! Greenfield API client and wire types.

use railgate::proto::SettlementStatus;
use railgate::{Rail, UnixTimestamp};
use railgate_http::{RestClient, RestClientError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Invoice creation body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoice {
    /// Price in `currency`.
    pub amount: Decimal,
    /// Pricing currency.
    pub currency: String,
    /// Metadata echoed back in webhooks.
    pub metadata: InvoiceMetadata,
    /// Checkout options.
    pub checkout: InvoiceCheckout,
}

/// Invoice metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceMetadata {
    /// Our payment id.
    pub order_id: String,
    /// Payer email.
    pub buyer_email: String,
    /// Plan id.
    pub item_code: String,
}

/// Invoice checkout options.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceCheckout {
    /// Payment method ids to offer.
    pub payment_methods: Vec<String>,
    /// Invoice lifetime.
    pub expiration_minutes: u64,
}

/// Primary invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum InvoiceStatus {
    /// Awaiting payment.
    New,
    /// Paid, waiting for confirmations.
    Processing,
    /// Paid and confirmed.
    Settled,
    /// Lapsed.
    Expired,
    /// Marked invalid.
    Invalid,
    /// Anything newer than this client.
    #[serde(other)]
    Unknown,
}

/// Secondary invoice status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum AdditionalStatus {
    /// Nothing to add.
    #[default]
    None,
    /// Paid after expiry.
    PaidLate,
    /// Paid less than due.
    PaidPartial,
    /// Manually marked.
    Marked,
    /// Invalidated.
    Invalid,
    /// Paid more than due.
    PaidOver,
    /// Anything newer than this client.
    #[serde(other)]
    Other,
}

/// A Greenfield invoice.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    /// Invoice id.
    pub id: String,
    /// Primary status.
    pub status: InvoiceStatus,
    /// Secondary status.
    #[serde(default)]
    pub additional_status: AdditionalStatus,
    /// Hosted checkout page.
    #[serde(default)]
    pub checkout_link: Option<String>,
    /// Creation time.
    pub created_time: UnixTimestamp,
    /// Expiry.
    pub expiration_time: UnixTimestamp,
}

impl Invoice {
    /// Maps the gateway's status pair onto settlement vocabulary.
    #[must_use]
    pub const fn settlement(&self) -> SettlementStatus {
        match (self.status, self.additional_status) {
            (InvoiceStatus::Expired, AdditionalStatus::PaidPartial) => SettlementStatus::Mismatched,
            (InvoiceStatus::Settled, _) => SettlementStatus::Confirmed,
            (InvoiceStatus::Expired, _) => SettlementStatus::Expired,
            (InvoiceStatus::Invalid, _) => SettlementStatus::Failed,
            (InvoiceStatus::New | InvoiceStatus::Processing | InvoiceStatus::Unknown, _) => SettlementStatus::Pending,
        }
    }
}

/// One payment method offered on an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePaymentMethod {
    /// Method id, e.g. `BTC-LN`.
    #[serde(alias = "paymentMethod")]
    pub payment_method_id: String,
    /// BOLT11 invoice or address.
    #[serde(default)]
    pub destination: Option<String>,
    /// Amount to pay in the method's currency.
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// Wallet URI.
    #[serde(default)]
    pub payment_link: Option<String>,
    /// Amount received so far through this method.
    #[serde(default)]
    pub total_paid: Option<Decimal>,
}

/// Greenfield store-scoped client.
#[derive(Debug, Clone)]
pub struct GreenfieldClient {
    client: RestClient,
    store_id: String,
}

impl GreenfieldClient {
    /// Creates a client for `base_url` authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Malformed URL or a key that cannot be sent as a header.
    pub fn try_new(
        base_url: &str,
        api_key: &str,
        store_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RestClientError> {
        let client = RestClient::try_new(Rail::Gateway, &format!("{}/api/v1", base_url.trim_end_matches('/')))?
            .with_header("Authorization", &format!("token {api_key}"))?
            .with_timeout(timeout);
        Ok(Self {
            client,
            store_id: store_id.into(),
        })
    }

    /// `POST /stores/{store}/invoices`
    ///
    /// # Errors
    ///
    /// Upstream failures.
    pub async fn create_invoice(&self, body: &CreateInvoice) -> Result<Invoice, RestClientError> {
        let url = self.client.url(&format!("stores/{}/invoices", self.store_id))?;
        self.client.post_json(&url, "POST /invoices", body).await
    }

    /// `GET /stores/{store}/invoices/{id}`
    ///
    /// # Errors
    ///
    /// Upstream failures.
    pub async fn invoice(&self, invoice_id: &str) -> Result<Invoice, RestClientError> {
        let url = self
            .client
            .url(&format!("stores/{}/invoices/{invoice_id}", self.store_id))?;
        self.client.get_json(&url, "GET /invoices/{id}").await
    }

    /// `GET /stores/{store}/invoices/{id}/payment-methods`
    ///
    /// # Errors
    ///
    /// Upstream failures.
    pub async fn payment_methods(&self, invoice_id: &str) -> Result<Vec<InvoicePaymentMethod>, RestClientError> {
        let url = self.client.url(&format!(
            "stores/{}/invoices/{invoice_id}/payment-methods",
            self.store_id
        ))?;
        self.client
            .get_json(&url, "GET /invoices/{id}/payment-methods")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice(status: &str, additional: &str) -> Invoice {
        serde_json::from_value(json!({
            "id": "inv-1",
            "status": status,
            "additionalStatus": additional,
            "createdTime": 1_700_000_000,
            "expirationTime": 1_700_001_800
        }))
        .unwrap()
    }

    #[test]
    fn maps_invoice_statuses() {
        assert_eq!(invoice("New", "None").settlement(), SettlementStatus::Pending);
        assert_eq!(invoice("Processing", "None").settlement(), SettlementStatus::Pending);
        assert_eq!(invoice("Settled", "PaidOver").settlement(), SettlementStatus::Confirmed);
        assert_eq!(invoice("Settled", "PaidLate").settlement(), SettlementStatus::Confirmed);
        assert_eq!(invoice("Expired", "None").settlement(), SettlementStatus::Expired);
        assert_eq!(invoice("Expired", "PaidPartial").settlement(), SettlementStatus::Mismatched);
        assert_eq!(invoice("Invalid", "Marked").settlement(), SettlementStatus::Failed);
        assert_eq!(invoice("Refunding", "Whatever").settlement(), SettlementStatus::Pending);
    }

    #[test]
    fn reads_legacy_payment_method_field() {
        let method: InvoicePaymentMethod = serde_json::from_value(json!({
            "paymentMethod": "BTC-LightningNetwork",
            "destination": "lnbc1...",
            "amount": "0.00010000"
        }))
        .unwrap();
        assert_eq!(method.payment_method_id, "BTC-LightningNetwork");
        assert_eq!(method.amount.unwrap().to_string(), "0.00010000");
    }
}
