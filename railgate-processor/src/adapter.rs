//! Hosted crypto processor rail (NOWPayments-style invoices and IPN).

use async_trait::async_trait;
use railgate::adapter::RailAdapter;
use railgate::assignment::{
    Assignment, AssignmentCache, AssignmentKey, AssignmentProbe, DEFAULT_WINDOW, ProbeOutcome, Reuse,
};
use railgate::proto::{
    ProcessorPayload, RailPayload, RailPayment, RailRequest, RecordLookup, SettlementEvent, SettlementStatus,
    StatusQuery, StatusReport,
};
use railgate::tolerance::PAYMENT_EXPIRY_SECS;
use railgate::webhook::{self, WebhookSecret};
use railgate::{PaymentMethod, Rail, RailError, Result, UnixTimestamp};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::client::{self, CreatePayment, Payment, ProcessorClient, ProcessorStatus};
use crate::config::ProcessorConfig;
use crate::error::ProcessorError;

/// Header carrying the IPN signature.
pub const SIGNATURE_HEADER: &str = "x-nowpayments-sig";

#[derive(Debug, Deserialize)]
struct IpnEvent {
    #[serde(deserialize_with = "client::payment_id")]
    payment_id: String,
    payment_status: ProcessorStatus,
    #[serde(default)]
    payin_hash: Option<String>,
    #[serde(default)]
    actually_paid: Option<Decimal>,
    #[serde(default)]
    pay_currency: Option<String>,
}

/// Stablecoin payments through a hosted processor.
///
/// Invoices are priced in USD, the processor quotes the crypto amount, and
/// settlement arrives as signed IPN callbacks.
#[derive(Debug)]
pub struct ProcessorRail {
    config: ProcessorConfig,
    client: Option<ProcessorClient>,
    secret: Option<WebhookSecret>,
    cache: AssignmentCache<ProcessorPayload>,
}

impl ProcessorRail {
    /// Builds the rail. Without an API key it stays unconfigured.
    ///
    /// # Errors
    ///
    /// A malformed URL or an API key that cannot be sent as a header.
    pub fn new(config: ProcessorConfig) -> Result<Self, ProcessorError> {
        let client = match config.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(api_key) => Some(ProcessorClient::try_new(
                &config.url,
                api_key,
                Duration::from_secs(config.timeout_secs),
            )?),
            None => None,
        };
        let secret = config.ipn_secret.clone().and_then(WebhookSecret::new);
        if client.is_some() && secret.is_none() {
            tracing::warn!("processor IPN secret missing, callbacks will be rejected");
        }
        let cache = AssignmentCache::new("processor", Duration::from_secs(config.window_secs));
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
            config: ProcessorConfig::default(),
            client: None,
            secret: None,
            cache: AssignmentCache::new("processor", DEFAULT_WINDOW),
        }
    }

    fn client(&self) -> Result<&ProcessorClient> {
        self.client.as_ref().ok_or(RailError::NotConfigured(Rail::Processor))
    }

    /// Number of live assignments.
    #[must_use]
    pub fn assignments(&self) -> usize {
        self.cache.len()
    }

    async fn mint(&self, client: &ProcessorClient, request: &RailRequest) -> Result<ProcessorPayload, ProcessorError> {
        let payment = client
            .create_payment(&CreatePayment {
                price_amount: request.amount_usd,
                price_currency: "usd".to_owned(),
                pay_currency: request.network.to_ascii_lowercase(),
                order_id: request.payment_id.clone(),
                order_description: format!("{} plan", request.plan),
                ipn_callback_url: self.config.ipn_callback_url.clone(),
            })
            .await?;
        payload(payment, &request.network)
    }
}

fn payload(payment: Payment, network: &str) -> Result<ProcessorPayload, ProcessorError> {
    let missing = |field| ProcessorError::MissingField {
        payment_id: payment.payment_id.clone(),
        field,
    };
    let pay_address = payment
        .pay_address
        .clone()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| missing("pay_address"))?;
    let pay_amount = payment.pay_amount.ok_or_else(|| missing("pay_amount"))?;
    let now = UnixTimestamp::now();
    Ok(ProcessorPayload {
        pay_currency: payment.pay_currency.unwrap_or_else(|| network.to_owned()),
        extra_id: payment.payin_extra_id.filter(|id| !id.is_empty()),
        provider_payment_id: payment.payment_id,
        pay_address,
        pay_amount,
        issued_at: now,
        expires_at: now + PAYMENT_EXPIRY_SECS,
    })
}

#[async_trait]
impl AssignmentProbe<ProcessorPayload> for ProcessorRail {
    async fn probe(&self, assignment: &Assignment<ProcessorPayload>) -> ProbeOutcome {
        let Some(client) = &self.client else {
            return ProbeOutcome::Unavailable("processor is not configured".to_owned());
        };
        match client.payment(&assignment.payload.provider_payment_id).await {
            Ok(payment) => match payment.payment_status {
                ProcessorStatus::Waiting => ProbeOutcome::Unpaid,
                ProcessorStatus::Confirming
                | ProcessorStatus::Confirmed
                | ProcessorStatus::Sending
                | ProcessorStatus::PartiallyPaid
                | ProcessorStatus::Finished => ProbeOutcome::Settled,
                ProcessorStatus::Failed | ProcessorStatus::Refunded | ProcessorStatus::Expired => {
                    ProbeOutcome::Terminal
                }
                ProcessorStatus::Unknown => ProbeOutcome::Unavailable("unrecognized payment status".to_owned()),
            },
            Err(err) => ProbeOutcome::Unavailable(err.to_string()),
        }
    }
}

#[async_trait]
impl RailAdapter for ProcessorRail {
    fn rail(&self) -> Rail {
        Rail::Processor
    }

    fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    fn supports(&self, method: PaymentMethod, network: &str) -> bool {
        method == PaymentMethod::Stablecoin && self.is_configured() && self.config.accepts(network)
    }

    #[tracing::instrument(name = "railgate.processor.create", skip_all, fields(payment_id = %request.payment_id, network = %request.network))]
    async fn create_payment(&self, request: &RailRequest) -> Result<RailPayment> {
        let client = self.client()?;
        if !self.config.accepts(&request.network) {
            return Err(RailError::UnknownNetwork {
                method: request.method.to_string(),
                network: request.network.clone(),
            });
        }

        let key = AssignmentKey::new(&request.email, &request.plan, &request.network);
        let _guard = self.cache.lock(&key).await;
        let now = UnixTimestamp::now();
        match self.cache.get(&key, request.amount_usd, self).await {
            Reuse::Reused(assignment) if assignment.payload.expires_at > now => {
                return Ok(RailPayment::reused(RailPayload::Processor(assignment.payload)));
            }
            Reuse::Reused(assignment) => {
                tracing::debug!(provider_payment_id = %assignment.correlation_id, "cached payment lapsed, minting new");
                self.cache.evict(&key);
            }
            Reuse::Evicted(..) | Reuse::Miss => {}
        }

        let payload = self.mint(client, request).await?;
        self.cache.put(
            key,
            payload.provider_payment_id.clone(),
            request.amount_usd,
            payload.clone(),
            payload.issued_at,
        );
        tracing::info!(
            provider_payment_id = %payload.provider_payment_id,
            pay_currency = %payload.pay_currency,
            pay_amount = %payload.pay_amount,
            "processor payment created"
        );
        Ok(RailPayment::minted(RailPayload::Processor(payload)))
    }

    async fn check_status(&self, query: &StatusQuery) -> Result<StatusReport> {
        let RailPayload::Processor(payload) = &query.payload else {
            return Err(RailError::InvalidRequest("not a processor payload".into()));
        };
        let payment = self
            .client()?
            .payment(&payload.provider_payment_id)
            .await
            .map_err(ProcessorError::from)?;
        let mut report = StatusReport::new(payment.payment_status.settlement());
        if let Some(hash) = payment.payin_hash.filter(|h| !h.is_empty()) {
            report = report.with_txid(hash);
        }
        if payment.payment_status == ProcessorStatus::PartiallyPaid {
            let received = payment.actually_paid.unwrap_or_default();
            report = report
                .with_received(format!("{received} {}", payload.pay_currency))
                .with_detail(
                    RailError::ToleranceViolation {
                        expected: format!("{} {}", payload.pay_amount, payload.pay_currency),
                        received: format!("{received} {}", payload.pay_currency),
                    }
                    .to_string(),
                );
        }
        Ok(report)
    }

    async fn mark_used(&self, payload: &RailPayload, _email: Option<&str>) {
        if let Some(provider_payment_id) = payload.provider_payment_id() {
            let evicted = self.cache.evict_correlation(provider_payment_id);
            tracing::debug!(%provider_payment_id, evicted = evicted.len(), "processor payment retired");
        }
    }

    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> Result<Option<SettlementEvent>> {
        webhook::verify_sha512_sorted_json(self.secret.as_ref(), body, signature)?;
        let event: IpnEvent = serde_json::from_slice(body)
            .map_err(|e| RailError::InvalidRequest(format!("processor IPN body: {e}")))?;

        let status = event.payment_status.settlement();
        if status == SettlementStatus::Pending {
            tracing::debug!(provider_payment_id = %event.payment_id, status = ?event.payment_status, "processor IPN without settlement");
            return Ok(None);
        }
        let received = match (status, event.actually_paid) {
            (SettlementStatus::Mismatched, Some(paid)) => Some(match event.pay_currency.as_deref() {
                Some(currency) => format!("{paid} {currency}"),
                None => paid.to_string(),
            }),
            _ => None,
        };
        Ok(Some(SettlementEvent {
            lookup: RecordLookup::ProviderPaymentId(event.payment_id),
            status,
            transaction_id: event.payin_hash.filter(|h| !h.is_empty()),
            received,
            kind: format!("{:?}", event.payment_status),
        }))
    }

    fn evict_stale(&self) -> usize {
        self.cache.evict_stale().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rail(server: &MockServer) -> ProcessorRail {
        ProcessorRail::new(ProcessorConfig {
            api_key: Some("np-key".to_owned()),
            ipn_secret: Some("ipn-secret".to_owned()),
            url: server.uri(),
            ..ProcessorConfig::default()
        })
        .unwrap()
    }

    fn request(payment_id: &str) -> RailRequest {
        RailRequest {
            payment_id: payment_id.to_owned(),
            email: "a@example.com".to_owned(),
            plan: "monthly".to_owned(),
            method: PaymentMethod::Stablecoin,
            network: "usdttrc20".to_owned(),
            amount_usd: Decimal::from(10),
        }
    }

    async fn mount_create(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/payment"))
            .and(header("x-api-key", "np-key"))
            .and(body_partial_json(json!({"price_currency": "usd", "pay_currency": "usdttrc20"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "payment_id": 4_522_625_843_u64,
                "payment_status": "waiting",
                "pay_address": "TXpayAddr",
                "pay_amount": "10.02",
                "pay_currency": "usdttrc20",
                "order_id": "p1"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn creates_and_reuses_payment() {
        let server = MockServer::start().await;
        mount_create(&server).await;
        let rail = rail(&server);

        let first = rail.create_payment(&request("p1")).await.unwrap();
        let second = rail.create_payment(&request("p2")).await.unwrap();
        assert!(!first.reused);
        assert!(second.reused);
        let RailPayload::Processor(payload) = first.payload else {
            panic!("expected processor payload");
        };
        assert_eq!(payload.provider_payment_id, "4522625843");
        assert_eq!(payload.pay_amount, Decimal::from_str("10.02").unwrap());
        assert_eq!(rail.assignments(), 1);

        rail.mark_used(&second.payload, None).await;
        assert_eq!(rail.assignments(), 0);
    }

    #[tokio::test]
    async fn poll_reports_partial_payment_as_mismatched() {
        let server = MockServer::start().await;
        mount_create(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/payment/4522625843"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment_id": "4522625843",
                "payment_status": "partially_paid",
                "actually_paid": "5",
                "pay_amount": "10.02"
            })))
            .mount(&server)
            .await;
        let rail = rail(&server);
        let payment = rail.create_payment(&request("p1")).await.unwrap();

        let report = rail
            .check_status(&StatusQuery {
                payment_id: "p1".to_owned(),
                created_at: payment.payload.issued_at(),
                payload: payment.payload,
            })
            .await
            .unwrap();
        assert_eq!(report.status, SettlementStatus::Mismatched);
        assert_eq!(report.received.as_deref(), Some("5 usdttrc20"));
    }

    #[test]
    fn verifies_signed_ipn() {
        let rail = ProcessorRail::new(ProcessorConfig {
            api_key: Some("np-key".to_owned()),
            ipn_secret: Some("ipn-secret".to_owned()),
            ..ProcessorConfig::default()
        })
        .unwrap();
        let secret = WebhookSecret::new("ipn-secret").unwrap();

        let finished = json!({
            "payment_status": "finished",
            "payment_id": 4_522_625_843_u64,
            "order_id": "p1",
            "payin_hash": "0xhash",
            "fee": {"depositFee": 0, "currency": "usdttrc20"}
        });
        let signature = webhook::sign_sha512_sorted_json(&secret, &finished);
        let event = rail
            .verify_webhook(Some(&signature), finished.to_string().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(event.lookup, RecordLookup::ProviderPaymentId("4522625843".to_owned()));
        assert_eq!(event.status, SettlementStatus::Confirmed);
        assert_eq!(event.transaction_id.as_deref(), Some("0xhash"));

        let waiting = json!({"payment_status": "waiting", "payment_id": "1"});
        let signature = webhook::sign_sha512_sorted_json(&secret, &waiting);
        assert!(rail
            .verify_webhook(Some(&signature), waiting.to_string().as_bytes())
            .unwrap()
            .is_none());

        assert_eq!(event.received, None);

        let partial = json!({
            "payment_status": "partially_paid",
            "payment_id": 4_522_625_843_u64,
            "actually_paid": 5.5,
            "pay_currency": "usdttrc20"
        });
        let signature = webhook::sign_sha512_sorted_json(&secret, &partial);
        let event = rail
            .verify_webhook(Some(&signature), partial.to_string().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(event.status, SettlementStatus::Mismatched);
        assert_eq!(event.received.as_deref(), Some("5.5 usdttrc20"));

        let signature = webhook::sign_sha512_sorted_json(&secret, &finished);
        let tampered = finished.to_string().replace("finished", "finishes");
        assert!(matches!(
            rail.verify_webhook(Some(&signature), tampered.as_bytes()),
            Err(RailError::SignatureInvalid(_))
        ));
        assert!(matches!(
            rail.verify_webhook(None, finished.to_string().as_bytes()),
            Err(RailError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_without_api_key() {
        let rail = ProcessorRail::new(ProcessorConfig::default()).unwrap();
        assert!(!rail.is_configured());
        assert!(!rail.supports(PaymentMethod::Stablecoin, "usdttrc20"));
        assert!(matches!(
            rail.create_payment(&request("p1")).await,
            Err(RailError::NotConfigured(Rail::Processor))
        ));
    }
}
