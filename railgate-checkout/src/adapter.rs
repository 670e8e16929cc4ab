//! Card checkout rail.
//!
//! One hosted checkout session per buyer and plan. Sessions are reused
//! inside the window, so several records can point at the same session id;
//! webhooks resolve by that id to reach the newest record.

use async_trait::async_trait;
use railgate::adapter::RailAdapter;
use railgate::assignment::{
    Assignment, AssignmentCache, AssignmentKey, AssignmentProbe, DEFAULT_WINDOW, ProbeOutcome, Reuse,
};
use railgate::proto::{
    CheckoutPayload, RailPayload, RailPayment, RailRequest, RecordLookup, SettlementEvent, SettlementStatus,
    StatusQuery, StatusReport,
};
use railgate::tolerance::PAYMENT_EXPIRY_SECS;
use railgate::webhook::{self, WebhookSecret};
use railgate::{PaymentMethod, Rail, RailError, Result, UnixTimestamp};
use serde::Deserialize;
use std::time::Duration;

use crate::client::{CheckoutClient, CreateCheckout};
use crate::config::CheckoutConfig;
use crate::error::CheckoutError;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    /// Checkout session id; shared by every record that reused the session.
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
}

/// Card payments on a hosted checkout page.
#[derive(Debug)]
pub struct CheckoutRail {
    config: CheckoutConfig,
    client: Option<CheckoutClient>,
    secret: Option<WebhookSecret>,
    cache: AssignmentCache<CheckoutPayload>,
}

impl CheckoutRail {
    /// Builds the rail. Without an API key it stays unconfigured.
    ///
    /// # Errors
    ///
    /// A malformed URL or an API key that cannot be sent as a header.
    pub fn new(config: CheckoutConfig) -> Result<Self, CheckoutError> {
        let client = match config.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(api_key) => Some(CheckoutClient::try_new(
                &config.url,
                api_key,
                Duration::from_secs(config.timeout_secs),
            )?),
            None => None,
        };
        let secret = config.webhook_secret.clone().and_then(WebhookSecret::new);
        if client.is_some() && secret.is_none() {
            tracing::warn!("checkout webhook secret missing, webhooks will be rejected");
        }
        let cache = AssignmentCache::new("checkout", Duration::from_secs(config.window_secs));
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
            config: CheckoutConfig::default(),
            client: None,
            secret: None,
            cache: AssignmentCache::new("checkout", DEFAULT_WINDOW),
        }
    }

    fn client(&self) -> Result<&CheckoutClient> {
        self.client.as_ref().ok_or(RailError::NotConfigured(Rail::Checkout))
    }

    async fn mint(&self, client: &CheckoutClient, request: &RailRequest) -> Result<CheckoutPayload, CheckoutError> {
        let product_id = self
            .config
            .product(&request.plan)
            .ok_or_else(|| CheckoutError::UnmappedPlan(request.plan.clone()))?;
        let session = client
            .create_checkout(&CreateCheckout {
                product_id: product_id.to_owned(),
                amount: request.amount_usd,
                currency: "USD".to_owned(),
                customer_email: request.email.clone(),
                reference: request.payment_id.clone(),
                success_url: self.config.success_url.clone(),
            })
            .await?;
        let now = UnixTimestamp::now();
        Ok(CheckoutPayload {
            checkout_id: session.id,
            url: session.url,
            amount_usd: request.amount_usd,
            issued_at: now,
            expires_at: session.expires_at.unwrap_or(now + PAYMENT_EXPIRY_SECS),
        })
    }
}

#[async_trait]
impl AssignmentProbe<CheckoutPayload> for CheckoutRail {
    async fn probe(&self, _assignment: &Assignment<CheckoutPayload>) -> ProbeOutcome {
        // Sessions are never polled; an idle one is replaced.
        ProbeOutcome::Terminal
    }
}

#[async_trait]
impl RailAdapter for CheckoutRail {
    fn rail(&self) -> Rail {
        Rail::Checkout
    }

    fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    fn supports(&self, method: PaymentMethod, network: &str) -> bool {
        method == PaymentMethod::Card && network == "card" && self.is_configured()
    }

    #[tracing::instrument(name = "railgate.checkout.create", skip_all, fields(payment_id = %request.payment_id, plan = %request.plan))]
    async fn create_payment(&self, request: &RailRequest) -> Result<RailPayment> {
        let client = self.client()?;
        let key = AssignmentKey::new(&request.email, &request.plan, &request.network);
        let _guard = self.cache.lock(&key).await;
        let now = UnixTimestamp::now();
        match self.cache.get(&key, request.amount_usd, self).await {
            Reuse::Reused(assignment) if assignment.payload.expires_at > now => {
                return Ok(RailPayment::reused(RailPayload::Checkout(assignment.payload)));
            }
            Reuse::Reused(_) => {
                self.cache.evict(&key);
            }
            Reuse::Evicted(..) | Reuse::Miss => {}
        }

        let payload = self.mint(client, request).await?;
        self.cache.put(
            key,
            payload.checkout_id.clone(),
            request.amount_usd,
            payload.clone(),
            payload.issued_at,
        );
        tracing::info!(checkout_id = %payload.checkout_id, amount_usd = %payload.amount_usd, "checkout session created");
        Ok(RailPayment::minted(RailPayload::Checkout(payload)))
    }

    async fn check_status(&self, query: &StatusQuery) -> Result<StatusReport> {
        if !matches!(query.payload, RailPayload::Checkout(_)) {
            return Err(RailError::InvalidRequest("not a checkout payload".into()));
        }
        Ok(StatusReport::pending().with_detail("awaiting checkout webhook"))
    }

    async fn mark_used(&self, payload: &RailPayload, _email: Option<&str>) {
        if let RailPayload::Checkout(payload) = payload {
            let evicted = self.cache.evict_correlation(&payload.checkout_id);
            tracing::debug!(checkout_id = %payload.checkout_id, evicted = evicted.len(), "checkout session retired");
        }
    }

    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> Result<Option<SettlementEvent>> {
        webhook::verify_sha256(self.secret.as_ref(), body, signature)?;
        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| RailError::InvalidRequest(format!("checkout webhook body: {e}")))?;

        let status = match event.kind.as_str() {
            "checkout.completed" => SettlementStatus::Confirmed,
            "checkout.expired" => SettlementStatus::Expired,
            "checkout.failed" => SettlementStatus::Failed,
            other => {
                tracing::debug!(kind = other, "checkout webhook ignored");
                return Ok(None);
            }
        };
        // The reference names the record that first opened the session; a
        // reused session belongs to the newest record, found by session id.
        let lookup = match (event.data.id, event.data.reference) {
            (Some(id), _) if !id.is_empty() => RecordLookup::ProviderPaymentId(id),
            (_, Some(reference)) if !reference.is_empty() => RecordLookup::PaymentId(reference),
            _ => return Err(RailError::InvalidRequest("checkout webhook without session id or reference".into())),
        };
        Ok(Some(SettlementEvent {
            lookup,
            status,
            transaction_id: event.data.transaction_id,
            received: None,
            kind: event.kind,
        }))
    }

    fn evict_stale(&self) -> usize {
        self.cache.evict_stale().len()
    }
}
