//! Self-hosted payment gateway rail (BTCPay-style invoices).
//!
//! Invoices are created per buyer and reused inside the window. Webhooks
//! carry an HMAC over the raw body in [`SIGNATURE_HEADER`].

use async_trait::async_trait;
use railgate::adapter::RailAdapter;
use railgate::assignment::{
    Assignment, AssignmentCache, AssignmentKey, AssignmentProbe, DEFAULT_WINDOW, ProbeOutcome, Reuse,
};
use railgate::proto::{
    GatewayPayload, RailPayload, RailPayment, RailRequest, RecordLookup, SettlementEvent, SettlementStatus,
    StatusQuery, StatusReport,
};
use railgate::webhook::{self, WebhookSecret};
use railgate::{PaymentMethod, Rail, RailError, Result, UnixTimestamp};
use serde::Deserialize;
use std::time::Duration;

use crate::client::{
    AdditionalStatus, CreateInvoice, GreenfieldClient, InvoiceCheckout, InvoiceMetadata, InvoiceStatus,
};
use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "BTCPay-Sig";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    invoice_id: Option<String>,
    #[serde(default)]
    partially_paid: bool,
    #[serde(default)]
    is_redelivery: bool,
}

/// Lightning and Liquid invoices through a Greenfield gateway.
///
/// Invoices are priced in USD, so the assignment cache compares USD amounts.
#[derive(Debug)]
pub struct GatewayRail {
    config: GatewayConfig,
    client: Option<GreenfieldClient>,
    secret: Option<WebhookSecret>,
    cache: AssignmentCache<GatewayPayload>,
}

impl GatewayRail {
    /// Builds the rail. Missing credentials leave it unconfigured.
    ///
    /// # Errors
    ///
    /// A malformed URL or an API key that cannot be sent as a header.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = match (
            non_blank(config.url.as_deref()),
            non_blank(config.api_key.as_deref()),
            non_blank(config.store_id.as_deref()),
        ) {
            (Some(url), Some(api_key), Some(store_id)) => Some(GreenfieldClient::try_new(
                url,
                api_key,
                store_id,
                Duration::from_secs(config.timeout_secs),
            )?),
            _ => None,
        };
        let secret = config.webhook_secret.clone().and_then(WebhookSecret::new);
        if client.is_some() && secret.is_none() {
            tracing::warn!("gateway webhook secret missing, webhooks will be rejected");
        }
        let cache = AssignmentCache::new("gateway", Duration::from_secs(config.window_secs));
        Ok(Self {
            config,
            client,
            secret,
            cache,
        })
    }

    /// A rail without credentials, registered so callers get a clear
    /// "not configured" answer.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            config: GatewayConfig::default(),
            client: None,
            secret: None,
            cache: AssignmentCache::new("gateway", DEFAULT_WINDOW),
        }
    }

    fn client(&self) -> Result<&GreenfieldClient> {
        self.client.as_ref().ok_or(RailError::NotConfigured(Rail::Gateway))
    }

    /// Number of live assignments.
    #[must_use]
    pub fn assignments(&self) -> usize {
        self.cache.len()
    }

    async fn mint(
        &self,
        client: &GreenfieldClient,
        request: &RailRequest,
        payment_method: &str,
    ) -> Result<GatewayPayload, GatewayError> {
        let invoice = client
            .create_invoice(&CreateInvoice {
                amount: request.amount_usd,
                currency: "USD".to_owned(),
                metadata: InvoiceMetadata {
                    order_id: request.payment_id.clone(),
                    buyer_email: request.email.clone(),
                    item_code: request.plan.clone(),
                },
                checkout: InvoiceCheckout {
                    payment_methods: vec![payment_method.to_owned()],
                    expiration_minutes: self.config.expiration_minutes,
                },
            })
            .await?;

        let method = client
            .payment_methods(&invoice.id)
            .await?
            .into_iter()
            .find(|m| m.payment_method_id.eq_ignore_ascii_case(payment_method))
            .ok_or_else(|| GatewayError::MissingPaymentMethod {
                invoice_id: invoice.id.clone(),
                payment_method: payment_method.to_owned(),
            })?;
        let destination = method
            .destination
            .filter(|d| !d.is_empty())
            .ok_or_else(|| GatewayError::MissingPaymentMethod {
                invoice_id: invoice.id.clone(),
                payment_method: payment_method.to_owned(),
            })?;
        let amount = method
            .amount
            .ok_or_else(|| GatewayError::InvalidAmount(format!("{} has no amount", invoice.id)))?;

        Ok(GatewayPayload {
            invoice_id: invoice.id,
            network: request.network.clone(),
            payment_method: payment_method.to_owned(),
            destination,
            amount,
            checkout_link: invoice.checkout_link,
            issued_at: invoice.created_time,
            expires_at: invoice.expiration_time,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[async_trait]
impl AssignmentProbe<GatewayPayload> for GatewayRail {
    async fn probe(&self, assignment: &Assignment<GatewayPayload>) -> ProbeOutcome {
        let Some(client) = &self.client else {
            return ProbeOutcome::Unavailable("gateway is not configured".to_owned());
        };
        match client.invoice(&assignment.payload.invoice_id).await {
            Ok(invoice) => match (invoice.status, invoice.additional_status) {
                (InvoiceStatus::New, AdditionalStatus::None) => ProbeOutcome::Unpaid,
                (InvoiceStatus::New | InvoiceStatus::Processing | InvoiceStatus::Settled, _) => ProbeOutcome::Settled,
                (InvoiceStatus::Expired | InvoiceStatus::Invalid, _) => ProbeOutcome::Terminal,
                (InvoiceStatus::Unknown, _) => ProbeOutcome::Unavailable("unrecognized invoice status".to_owned()),
            },
            Err(err) => ProbeOutcome::Unavailable(err.to_string()),
        }
    }
}

#[async_trait]
impl RailAdapter for GatewayRail {
    fn rail(&self) -> Rail {
        Rail::Gateway
    }

    fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    fn supports(&self, method: PaymentMethod, network: &str) -> bool {
        self.is_configured()
            && matches!(
                (method, network),
                (PaymentMethod::Lightning, "lightning") | (PaymentMethod::Liquid, "liquid")
            )
    }

    #[tracing::instrument(name = "railgate.gateway.create", skip_all, fields(payment_id = %request.payment_id, network = %request.network))]
    async fn create_payment(&self, request: &RailRequest) -> Result<RailPayment> {
        let client = self.client()?;
        let payment_method = self
            .config
            .payment_method(&request.network)
            .ok_or_else(|| RailError::UnknownNetwork {
                method: request.method.to_string(),
                network: request.network.clone(),
            })?
            .to_owned();

        let key = AssignmentKey::new(&request.email, &request.plan, &request.network);
        let _guard = self.cache.lock(&key).await;
        let now = UnixTimestamp::now();
        match self.cache.get(&key, request.amount_usd, self).await {
            Reuse::Reused(assignment) if assignment.payload.expires_at > now => {
                return Ok(RailPayment::reused(RailPayload::Gateway(assignment.payload)));
            }
            Reuse::Reused(assignment) => {
                tracing::debug!(invoice_id = %assignment.correlation_id, "cached invoice lapsed, minting new");
                self.cache.evict(&key);
            }
            Reuse::Evicted(..) | Reuse::Miss => {}
        }

        let payload = self.mint(client, request, &payment_method).await?;
        self.cache.put(
            key,
            payload.invoice_id.clone(),
            request.amount_usd,
            payload.clone(),
            payload.issued_at,
        );
        tracing::info!(invoice_id = %payload.invoice_id, %payment_method, amount = %payload.amount, "gateway invoice created");
        Ok(RailPayment::minted(RailPayload::Gateway(payload)))
    }

    async fn check_status(&self, query: &StatusQuery) -> Result<StatusReport> {
        let RailPayload::Gateway(payload) = &query.payload else {
            return Err(RailError::InvalidRequest("not a gateway payload".into()));
        };
        let client = self.client()?;
        let invoice = client.invoice(&payload.invoice_id).await.map_err(GatewayError::from)?;
        let report = StatusReport::new(invoice.settlement());
        let report = match invoice.additional_status {
            AdditionalStatus::None => report,
            other => report.with_detail(format!("{:?}/{other:?}", invoice.status)),
        };
        if report.status != SettlementStatus::Mismatched {
            return Ok(report);
        }

        let paid = match client.payment_methods(&payload.invoice_id).await {
            Ok(methods) => methods
                .into_iter()
                .find(|m| m.payment_method_id == payload.payment_method)
                .and_then(|m| m.total_paid),
            Err(err) => {
                tracing::warn!(invoice_id = %payload.invoice_id, %err, "paid amount unavailable");
                None
            }
        };
        Ok(match paid {
            Some(paid) => {
                let received = format!("{} BTC", paid.normalize());
                let violation = RailError::ToleranceViolation {
                    expected: format!("{} BTC", payload.amount.normalize()),
                    received: received.clone(),
                };
                report.with_received(received).with_detail(violation.to_string())
            }
            None => report,
        })
    }

    async fn mark_used(&self, payload: &RailPayload, _email: Option<&str>) {
        if let Some(invoice_id) = payload.invoice_id() {
            let evicted = self.cache.evict_correlation(invoice_id);
            tracing::debug!(%invoice_id, evicted = evicted.len(), "gateway invoice retired");
        }
    }

    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> Result<Option<SettlementEvent>> {
        webhook::verify_sha256(self.secret.as_ref(), body, signature)?;
        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| RailError::InvalidRequest(format!("gateway webhook body: {e}")))?;

        let status = match event.kind.as_str() {
            "InvoiceSettled" => SettlementStatus::Confirmed,
            "InvoiceExpired" if event.partially_paid => SettlementStatus::Mismatched,
            "InvoiceExpired" => SettlementStatus::Expired,
            "InvoiceInvalid" => SettlementStatus::Failed,
            other => {
                tracing::debug!(kind = other, "gateway webhook ignored");
                return Ok(None);
            }
        };
        let invoice_id = event
            .invoice_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RailError::InvalidRequest("gateway webhook without invoiceId".into()))?;
        if event.is_redelivery {
            tracing::info!(%invoice_id, kind = %event.kind, "gateway webhook redelivery");
        }
        Ok(Some(SettlementEvent {
            lookup: RecordLookup::InvoiceId(invoice_id),
            status,
            transaction_id: None,
            received: None,
            kind: event.kind,
        }))
    }

    fn evict_stale(&self) -> usize {
        self.cache.evict_stale().len()
    }
}
