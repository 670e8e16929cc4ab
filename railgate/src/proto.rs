//! Request, payload, and status types exchanged between the router and the
//! rail adapters, plus the caller-facing request and response shapes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::{self, SATS_PER_BTC};
use crate::rail::{PaymentMethod, Rail};
use crate::timestamp::UnixTimestamp;

/// Lifecycle state of a stored payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Awaiting settlement.
    Pending,
    /// Settled.
    Confirmed,
    /// Nothing arrived in time, or superseded by a newer request.
    Expired,
    /// Rejected or refunded upstream.
    Failed,
    /// Consumed before settlement was observed.
    Used,
}

impl PaymentStatus {
    /// Terminal records never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What a status poll or a webhook says about a payment.
///
/// Adds [`Mismatched`](Self::Mismatched) to the record vocabulary: funds
/// arrived for the wrong amount. The record stays pending so an operator can
/// resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// Nothing yet, or unknown.
    Pending,
    /// Settled.
    Confirmed,
    /// Funds arrived outside tolerance.
    Mismatched,
    /// Expired without payment.
    Expired,
    /// Rejected or refunded.
    Failed,
    /// Consumed.
    Used,
}

impl SettlementStatus {
    /// Record status this settlement moves a pending record to, if any.
    #[must_use]
    pub const fn record_status(self) -> Option<PaymentStatus> {
        match self {
            Self::Pending | Self::Mismatched => None,
            Self::Confirmed => Some(PaymentStatus::Confirmed),
            Self::Expired => Some(PaymentStatus::Expired),
            Self::Failed => Some(PaymentStatus::Failed),
            Self::Used => Some(PaymentStatus::Used),
        }
    }
}

impl From<PaymentStatus> for SettlementStatus {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Pending => Self::Pending,
            PaymentStatus::Confirmed => Self::Confirmed,
            PaymentStatus::Expired => Self::Expired,
            PaymentStatus::Failed => Self::Failed,
            PaymentStatus::Used => Self::Used,
        }
    }
}

/// On-chain Bitcoin assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinPayload {
    /// Receiving address.
    pub address: String,
    /// Position in the receive derivation chain.
    pub derivation_index: u32,
    /// Expected satoshis.
    pub amount_sats: u64,
    /// Price the quote was computed at.
    pub usd_per_btc: Decimal,
    /// Whether the quote used a cached or fallback price.
    pub price_stale: bool,
    /// When the address was first handed out for this quote.
    pub issued_at: UnixTimestamp,
    /// When the quote lapses.
    pub expires_at: UnixTimestamp,
}

/// Greenfield gateway invoice (Lightning or Liquid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPayload {
    /// Gateway invoice id.
    pub invoice_id: String,
    /// `lightning` or `liquid`.
    pub network: String,
    /// Gateway payment method id, e.g. `BTC-LN`.
    pub payment_method: String,
    /// BOLT11 invoice or Liquid address.
    pub destination: String,
    /// Amount due in BTC.
    pub amount: Decimal,
    /// Hosted checkout page, if the gateway returned one.
    pub checkout_link: Option<String>,
    /// Invoice creation time.
    pub issued_at: UnixTimestamp,
    /// Invoice expiry.
    pub expires_at: UnixTimestamp,
}

/// USDT transfer to the fixed merchant address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    /// `trc20` or `erc20`.
    pub network: String,
    /// Merchant receiving address.
    pub address: String,
    /// Token contract address.
    pub contract: String,
    /// Expected amount in minor units.
    pub amount_units: u64,
    /// Token decimals.
    pub decimals: u32,
    /// When this quote was first handed out.
    pub issued_at: UnixTimestamp,
    /// When the quote lapses.
    pub expires_at: UnixTimestamp,
}

/// Stablecoin processor payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorPayload {
    /// Processor payment id.
    pub provider_payment_id: String,
    /// Deposit address.
    pub pay_address: String,
    /// Amount to send, in `pay_currency`.
    pub pay_amount: Decimal,
    /// Processor currency code, e.g. `usdttrc20`.
    pub pay_currency: String,
    /// Memo or destination tag some networks require.
    pub extra_id: Option<String>,
    /// Creation time.
    pub issued_at: UnixTimestamp,
    /// Expiry reported or assumed.
    pub expires_at: UnixTimestamp,
}

/// Hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPayload {
    /// Provider checkout id.
    pub checkout_id: String,
    /// Hosted page to redirect to.
    pub url: String,
    /// Amount charged in USD.
    pub amount_usd: Decimal,
    /// Creation time.
    pub issued_at: UnixTimestamp,
    /// Session expiry.
    pub expires_at: UnixTimestamp,
}

/// Rail-specific payload, one variant per rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "lowercase")]
pub enum RailPayload {
    /// See [`BitcoinPayload`].
    Bitcoin(BitcoinPayload),
    /// See [`GatewayPayload`].
    Gateway(GatewayPayload),
    /// See [`TokenPayload`].
    Token(TokenPayload),
    /// See [`ProcessorPayload`].
    Processor(ProcessorPayload),
    /// See [`CheckoutPayload`].
    Checkout(CheckoutPayload),
}

/// Amount the payer must send, in the rail's currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedAmount {
    /// Decimal amount.
    pub amount: Decimal,
    /// Currency code, e.g. `BTC`, `USDT`.
    pub currency: String,
}

impl RailPayload {
    /// Rail this payload belongs to.
    #[must_use]
    pub const fn rail(&self) -> Rail {
        match self {
            Self::Bitcoin(_) => Rail::Bitcoin,
            Self::Gateway(_) => Rail::Gateway,
            Self::Token(_) => Rail::Token,
            Self::Processor(_) => Rail::Processor,
            Self::Checkout(_) => Rail::Checkout,
        }
    }

    /// The id that ties this payload to upstream state.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Bitcoin(p) => &p.address,
            Self::Gateway(p) => &p.invoice_id,
            Self::Token(p) => &p.address,
            Self::Processor(p) => &p.provider_payment_id,
            Self::Checkout(p) => &p.checkout_id,
        }
    }

    /// Gateway invoice id, if any.
    #[must_use]
    pub fn invoice_id(&self) -> Option<&str> {
        match self {
            Self::Gateway(p) => Some(&p.invoice_id),
            _ => None,
        }
    }

    /// Processor or checkout id, if any.
    #[must_use]
    pub fn provider_payment_id(&self) -> Option<&str> {
        match self {
            Self::Processor(p) => Some(&p.provider_payment_id),
            Self::Checkout(p) => Some(&p.checkout_id),
            _ => None,
        }
    }

    /// Receiving address, if any.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Bitcoin(p) => Some(&p.address),
            Self::Token(p) => Some(&p.address),
            Self::Processor(p) => Some(&p.pay_address),
            Self::Gateway(_) | Self::Checkout(_) => None,
        }
    }

    /// When the underlying assignment was first issued.
    #[must_use]
    pub const fn issued_at(&self) -> UnixTimestamp {
        match self {
            Self::Bitcoin(p) => p.issued_at,
            Self::Gateway(p) => p.issued_at,
            Self::Token(p) => p.issued_at,
            Self::Processor(p) => p.issued_at,
            Self::Checkout(p) => p.issued_at,
        }
    }

    /// When the payer's quote lapses.
    #[must_use]
    pub const fn expires_at(&self) -> UnixTimestamp {
        match self {
            Self::Bitcoin(p) => p.expires_at,
            Self::Gateway(p) => p.expires_at,
            Self::Token(p) => p.expires_at,
            Self::Processor(p) => p.expires_at,
            Self::Checkout(p) => p.expires_at,
        }
    }

    /// Amount the payer must send.
    #[must_use]
    pub fn expected_amount(&self) -> ExpectedAmount {
        let (amount, currency) = match self {
            Self::Bitcoin(p) => (
                amount::from_minor_units(p.amount_sats, 8)
                    .unwrap_or_else(|_| Decimal::from(p.amount_sats) / Decimal::from(SATS_PER_BTC)),
                "BTC".to_owned(),
            ),
            Self::Gateway(p) => (
                p.amount,
                if p.network == "liquid" { "L-BTC" } else { "BTC" }.to_owned(),
            ),
            Self::Token(p) => (
                amount::from_minor_units(p.amount_units, p.decimals)
                    .unwrap_or_else(|_| Decimal::from(p.amount_units)),
                "USDT".to_owned(),
            ),
            Self::Processor(p) => (p.pay_amount, p.pay_currency.to_ascii_uppercase()),
            Self::Checkout(p) => (p.amount_usd, "USD".to_owned()),
        };
        ExpectedAmount { amount, currency }
    }
}

/// What the router asks an adapter to mint or reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailRequest {
    /// Caller-supplied payment id.
    pub payment_id: String,
    /// Caller identity.
    pub email: String,
    /// Plan id.
    pub plan: String,
    /// Chosen method.
    pub method: PaymentMethod,
    /// Resolved network.
    pub network: String,
    /// Price in USD.
    pub amount_usd: Decimal,
}

/// What an adapter hands back from `create_payment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailPayment {
    /// Payload to store and normalize.
    pub payload: RailPayload,
    /// Whether an existing assignment was served again.
    pub reused: bool,
}

impl RailPayment {
    /// A newly minted assignment.
    #[must_use]
    pub const fn minted(payload: RailPayload) -> Self {
        Self {
            payload,
            reused: false,
        }
    }

    /// A reused assignment.
    #[must_use]
    pub const fn reused(payload: RailPayload) -> Self {
        Self {
            payload,
            reused: true,
        }
    }
}

/// Input to a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusQuery {
    /// Payment being polled.
    pub payment_id: String,
    /// Stored payload.
    pub payload: RailPayload,
    /// When the record was created; expiry is measured from here.
    pub created_at: UnixTimestamp,
}

/// Output of a status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Settlement state.
    pub status: SettlementStatus,
    /// Settling transaction, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    /// Confirmation count, for on-chain rails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    /// Amount actually received, when it differs from what was expected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
    /// Operator-facing detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusReport {
    /// A report with only a status.
    #[must_use]
    pub const fn new(status: SettlementStatus) -> Self {
        Self {
            status,
            txid: None,
            confirmations: None,
            received: None,
            detail: None,
        }
    }

    /// Nothing known yet.
    #[must_use]
    pub const fn pending() -> Self {
        Self::new(SettlementStatus::Pending)
    }

    /// Settled by `txid`.
    #[must_use]
    pub fn confirmed(txid: impl Into<String>) -> Self {
        Self::new(SettlementStatus::Confirmed).with_txid(txid)
    }

    /// Attaches a transaction id.
    #[must_use]
    pub fn with_txid(mut self, txid: impl Into<String>) -> Self {
        self.txid = Some(txid.into());
        self
    }

    /// Attaches a confirmation count.
    #[must_use]
    pub const fn with_confirmations(mut self, confirmations: Option<u64>) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Attaches the amount received.
    #[must_use]
    pub fn with_received(mut self, received: impl Into<String>) -> Self {
        self.received = Some(received.into());
        self
    }

    /// Attaches operator detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// How to find the record a webhook refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLookup {
    /// Our own payment id (carried as a reference).
    PaymentId(String),
    /// Gateway invoice id.
    InvoiceId(String),
    /// Processor or checkout id.
    ProviderPaymentId(String),
    /// Receiving address.
    Address(String),
}

impl RecordLookup {
    /// The id being looked up.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::PaymentId(id)
            | Self::InvoiceId(id)
            | Self::ProviderPaymentId(id)
            | Self::Address(id) => id,
        }
    }
}

/// An authenticated notification from a push rail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementEvent {
    /// Which record it refers to.
    pub lookup: RecordLookup,
    /// New status.
    pub status: SettlementStatus,
    /// Settling transaction, if reported.
    pub transaction_id: Option<String>,
    /// Amount actually received, with unit, when the provider reports one.
    pub received: Option<String>,
    /// Provider event name, for logs.
    pub kind: String,
}

/// Caller request to start a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    /// Chosen method.
    pub method: PaymentMethod,
    /// Network; the method default when absent.
    #[serde(default)]
    pub network: Option<String>,
    /// Plan id.
    pub plan: String,
    /// Caller identity.
    pub email: String,
    /// Caller-generated unique payment id.
    pub payment_id: String,
    /// Dynamic price replacing the plan price.
    #[serde(default)]
    pub amount_override: Option<Decimal>,
}

/// Normalized answer to `create_payment`, identical in shape for every rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    /// Always `true`; failures are errors.
    pub success: bool,
    /// Rail that served the payment.
    pub provider: Rail,
    /// Method requested.
    pub method: PaymentMethod,
    /// Network used.
    pub network: String,
    /// Caller payment id.
    pub payment_id: String,
    /// Address to pay, for address-based rails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Invoice to pay, for invoice-based rails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
    /// Hosted page to redirect to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    /// Content for a QR code.
    pub qr_data: String,
    /// Amount in the rail currency, as display text.
    pub amount: String,
    /// Rail currency code.
    pub currency: String,
    /// Price in USD.
    pub amount_usd: Decimal,
    /// When the quote lapses.
    pub expires_at: UnixTimestamp,
    /// Whether an existing address or invoice was served again.
    pub reused: bool,
}

/// Answer to a status request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    /// Caller payment id.
    pub payment_id: String,
    /// Rail.
    pub provider: Rail,
    /// Current settlement state.
    pub status: SettlementStatus,
    /// Settling transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    /// Confirmation count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    /// Operator-facing detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the quote lapses.
    pub expires_at: UnixTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_is_tagged_by_rail() {
        let payload = RailPayload::Token(TokenPayload {
            network: "trc20".into(),
            address: "TXYZ".into(),
            contract: "TR7N".into(),
            amount_units: 10_000_000,
            decimals: 6,
            issued_at: UnixTimestamp::from_secs(1),
            expires_at: UnixTimestamp::from_secs(1801),
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["rail"], "token");
        assert_eq!(value["amountUnits"], 10_000_000);

        let back: RailPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.correlation_id(), "TXYZ");
        assert_eq!(back.expected_amount().amount.to_string(), "10.000000");
    }

    #[test]
    fn create_request_accepts_camel_case() {
        let request: CreatePaymentRequest = serde_json::from_value(json!({
            "method": "lightning",
            "plan": "pro",
            "email": "a@b.c",
            "paymentId": "p-1",
            "amountOverride": "49.50"
        }))
        .unwrap();
        assert_eq!(request.method, PaymentMethod::Lightning);
        assert_eq!(request.network, None);
        assert_eq!(request.amount_override.unwrap().to_string(), "49.50");
    }

    #[test]
    fn mismatched_keeps_record_pending() {
        assert_eq!(SettlementStatus::Mismatched.record_status(), None);
        assert_eq!(
            SettlementStatus::Confirmed.record_status(),
            Some(PaymentStatus::Confirmed)
        );
        assert!(PaymentStatus::Used.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
    }
}
