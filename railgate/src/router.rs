//! The provider router: one create/poll/settle contract over every rail.
//!
//! The router owns the [`PaymentRecordStore`] and a registry of
//! [`RailAdapter`]s keyed by [`Rail`]. It resolves prices and rails, dispatches
//! to the adapter, normalizes the rail payload into a [`PaymentResponse`], and
//! applies poll results and webhook events to stored records.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::adapter::RailAdapter;
use crate::assignment::normalize_identity;
use crate::error::{RailError, Result};
use crate::pricing::PlanCatalog;
use crate::proto::{
    CreatePaymentRequest, PaymentResponse, PaymentStatus, PaymentStatusResponse, RailPayload,
    RailPayment, RailRequest, RecordLookup, SettlementStatus, StatusQuery, StatusReport,
};
use crate::rail::{METHOD_CATALOG, MethodDescriptor, Rail};
use crate::store::{PaymentRecord, PaymentRecordStore, PendingFilter, Transition};
use crate::timestamp::UnixTimestamp;

/// What a webhook delivery did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum WebhookOutcome {
    /// The record moved to a new state.
    Applied {
        /// Affected payment.
        #[serde(rename = "paymentId")]
        payment_id: String,
        /// New state.
        status: PaymentStatus,
    },
    /// The record was already terminal; nothing changed.
    Replayed {
        /// Affected payment.
        #[serde(rename = "paymentId")]
        payment_id: String,
        /// Existing state.
        status: PaymentStatus,
    },
    /// An out-of-tolerance payment was noted on a pending record.
    Noted {
        /// Affected payment.
        #[serde(rename = "paymentId")]
        payment_id: String,
    },
    /// Authentic, but nothing to do.
    Ignored,
}

/// Routes payment requests to rail adapters and tracks the resulting records.
pub struct ProviderRouter {
    adapters: HashMap<Rail, Arc<dyn RailAdapter>>,
    plans: PlanCatalog,
    records: PaymentRecordStore,
}

impl Debug for ProviderRouter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut rails: Vec<_> = self.adapters.keys().collect();
        rails.sort();
        f.debug_struct("ProviderRouter")
            .field("rails", &rails)
            .field("plans", &self.plans.len())
            .field("records", &self.records.len())
            .finish()
    }
}

impl ProviderRouter {
    /// A router with no adapters.
    #[must_use]
    pub fn new(plans: PlanCatalog) -> Self {
        Self {
            adapters: HashMap::new(),
            plans,
            records: PaymentRecordStore::new(),
        }
    }

    /// Registers `adapter` for its rail, replacing any previous one.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn RailAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Registers `adapter` for its rail, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn RailAdapter>) -> &mut Self {
        let rail = adapter.rail();
        if !adapter.is_configured() {
            tracing::warn!(%rail, "rail registered without credentials, it stays disabled");
        }
        self.adapters.insert(rail, adapter);
        self
    }

    /// The record store.
    #[must_use]
    pub const fn records(&self) -> &PaymentRecordStore {
        &self.records
    }

    /// The plan catalog.
    #[must_use]
    pub const fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    fn adapter(&self, rail: Rail) -> Result<&Arc<dyn RailAdapter>> {
        self.adapters
            .get(&rail)
            .filter(|adapter| adapter.is_configured())
            .ok_or(RailError::NotConfigured(rail))
    }

    /// Creates, or reuses, a payment for `request`.
    ///
    /// # Errors
    ///
    /// Invalid input, unknown plan or network, an unconfigured rail,
    /// a duplicate payment id, or an upstream failure while minting.
    #[tracing::instrument(skip_all, fields(payment_id = %request.payment_id, method = %request.method))]
    pub async fn create_payment(&self, request: CreatePaymentRequest) -> Result<PaymentResponse> {
        let email = normalize_identity(&request.email);
        if email.is_empty() {
            return Err(RailError::InvalidRequest("email is required".into()));
        }
        let payment_id = request.payment_id.trim().to_owned();
        if payment_id.is_empty() {
            return Err(RailError::InvalidRequest("paymentId is required".into()));
        }
        if self.records.contains(&payment_id) {
            return Err(RailError::DuplicatePayment(payment_id));
        }

        let amount_usd = self.plans.resolve_price(&request.plan, request.amount_override)?;
        let network = request
            .network
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| request.method.default_network())
            .to_ascii_lowercase();

        let adapter = self.adapter(request.method.rail())?;
        if !adapter.supports(request.method, &network) {
            return Err(RailError::UnknownNetwork {
                method: request.method.to_string(),
                network,
            });
        }

        let rail_request = RailRequest {
            payment_id,
            email,
            plan: request.plan,
            method: request.method,
            network,
            amount_usd,
        };
        let payment = adapter.create_payment(&rail_request).await?;
        let response = normalize(&rail_request, &payment);

        let now = UnixTimestamp::now();
        let record = PaymentRecord::new(&rail_request, payment.payload, now);
        if let Err(err) = self.records.insert(record.clone()) {
            // A concurrent request claimed the id after the check above; only
            // a freshly minted assignment is ours to retire.
            if !payment.reused {
                adapter.mark_used(&record.payload, Some(&record.email)).await;
            }
            return Err(err);
        }
        if payment.reused {
            let superseded =
                self.records
                    .supersede(&record, record.payload.correlation_id(), now);
            if !superseded.is_empty() {
                tracing::info!(?superseded, "older pending records superseded by reuse");
            }
        }

        tracing::info!(
            rail = %record.rail,
            correlation_id = %record.payload.correlation_id(),
            reused = payment.reused,
            "payment created"
        );
        Ok(response)
    }

    /// Polls the rail for a stored payload. Never fails: upstream errors and
    /// unconfigured rails read as pending.
    pub async fn check_payment_status(
        &self,
        payment_id: &str,
        rail: Rail,
        payload: &RailPayload,
    ) -> StatusReport {
        if payload.rail() != rail {
            tracing::warn!(payment_id, %rail, payload_rail = %payload.rail(), "payload does not belong to rail");
            return StatusReport::pending();
        }
        let adapter = match self.adapter(rail) {
            Ok(adapter) => adapter,
            Err(err) => {
                tracing::warn!(payment_id, %err, "status check skipped");
                return StatusReport::pending();
            }
        };
        let created_at = self
            .records
            .get(payment_id)
            .map_or_else(|| payload.issued_at(), |record| record.created_at);
        let query = StatusQuery {
            payment_id: payment_id.to_owned(),
            payload: payload.clone(),
            created_at,
        };
        match adapter.check_status(&query).await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(payment_id, %rail, %err, transient = err.is_transient(), "status check failed, reporting pending");
                StatusReport::pending()
            }
        }
    }

    /// Current status of a payment, polling upstream when it is not yet
    /// terminal and writing the result back.
    ///
    /// # Errors
    ///
    /// [`RailError::PaymentNotFound`] for an unknown id.
    #[tracing::instrument(skip(self))]
    pub async fn status(&self, payment_id: &str) -> Result<PaymentStatusResponse> {
        let record = self
            .records
            .get(payment_id)
            .ok_or_else(|| RailError::PaymentNotFound(payment_id.to_owned()))?;
        if record.status.is_terminal() {
            return Ok(status_response(&record, &StatusReport::new(record.status.into())));
        }

        let report = self
            .check_payment_status(payment_id, record.rail, &record.payload)
            .await;
        self.apply_report(&record, &report).await?;
        let current = self.records.get(payment_id).unwrap_or(record);
        Ok(status_response(&current, &report))
    }

    async fn apply_report(&self, record: &PaymentRecord, report: &StatusReport) -> Result<()> {
        let now = UnixTimestamp::now();
        let id = record.payment_id.as_str();
        match report.status.record_status() {
            None if report.status == SettlementStatus::Mismatched => {
                let received = report
                    .received
                    .as_deref()
                    .or(report.detail.as_deref())
                    .unwrap_or("unknown amount");
                tracing::warn!(payment_id = id, received, detail = ?report.detail, "payment received outside tolerance");
                self.records
                    .note_received(id, received, report.txid.as_deref(), now)
            }
            None => self
                .records
                .transition(id, PaymentStatus::Pending, report.txid.as_deref(), now)
                .map(|_| ()),
            Some(status) => {
                let transition =
                    self.records
                        .transition(id, status, report.txid.as_deref(), now)?;
                self.finalize(transition).await;
                Ok(())
            }
        }
    }

    /// Retires the assignment behind a record that just became terminal.
    async fn finalize(&self, transition: Transition) {
        if let Transition::Applied(record) = transition {
            match record.status {
                PaymentStatus::Confirmed => {
                    tracing::info!(payment_id = %record.payment_id, txid = ?record.txid, "payment confirmed");
                }
                status => {
                    tracing::info!(payment_id = %record.payment_id, ?status, "payment closed without settlement");
                }
            }
            if let Ok(adapter) = self.adapter(record.rail) {
                adapter.mark_used(&record.payload, Some(&record.email)).await;
            }
        }
    }

    /// Retires the assignment behind `payload` and marks matching pending
    /// records as used.
    ///
    /// With an email only that caller's records are touched; without one,
    /// only records carrying exactly this payload.
    ///
    /// # Errors
    ///
    /// [`RailError::NotConfigured`] for an unknown rail.
    pub async fn mark_payment_used(
        &self,
        rail: Rail,
        payload: &RailPayload,
        email: Option<&str>,
    ) -> Result<Vec<String>> {
        let adapter = self.adapter(rail)?;
        adapter.mark_used(payload, email).await;

        let email = email.map(normalize_identity);
        let now = UnixTimestamp::now();
        let filter = PendingFilter {
            rail: Some(rail),
            method: None,
        };
        let mut used = Vec::new();
        for record in self.records.pending(filter) {
            let same = match &email {
                Some(email) => {
                    record.email == *email
                        && record.payload.correlation_id() == payload.correlation_id()
                }
                None => record.payload == *payload,
            };
            if same
                && let Transition::Applied(record) =
                    self.records
                        .transition(&record.payment_id, PaymentStatus::Used, None, now)?
            {
                used.push(record.payment_id);
            }
        }
        tracing::info!(%rail, correlation_id = %payload.correlation_id(), ?used, "assignment marked used");
        Ok(used)
    }

    /// [`mark_payment_used`](Self::mark_payment_used) for a stored record.
    ///
    /// # Errors
    ///
    /// [`RailError::PaymentNotFound`] for an unknown id.
    pub async fn mark_used(&self, payment_id: &str) -> Result<Vec<String>> {
        let record = self
            .records
            .get(payment_id)
            .ok_or_else(|| RailError::PaymentNotFound(payment_id.to_owned()))?;
        self.mark_payment_used(record.rail, &record.payload, Some(&record.email))
            .await
    }

    /// Applies an inbound webhook for `rail`. Replays are harmless.
    ///
    /// # Errors
    ///
    /// Signature failures, unsupported rails, and unknown records.
    #[tracing::instrument(skip(self, signature, body), fields(bytes = body.len()))]
    pub async fn handle_webhook(
        &self,
        rail: Rail,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome> {
        let adapter = self.adapter(rail)?;
        let event = match adapter.verify_webhook(signature, body) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(WebhookOutcome::Ignored),
            Err(err) => {
                tracing::warn!(%err, "webhook rejected");
                return Err(err);
            }
        };

        let record = self
            .lookup(&event.lookup)
            .filter(|record| record.rail == rail)
            .ok_or_else(|| RailError::PaymentNotFound(event.lookup.id().to_owned()))?;
        let payment_id = record.payment_id.clone();
        let now = UnixTimestamp::now();
        tracing::info!(%payment_id, kind = %event.kind, status = ?event.status, "webhook event");

        match event.status.record_status() {
            None if event.status == SettlementStatus::Mismatched => {
                let received = match event.received {
                    Some(received) => received,
                    // Events without an amount are resolved by asking the rail.
                    None => self
                        .check_payment_status(&payment_id, rail, &record.payload)
                        .await
                        .received
                        .unwrap_or_else(|| "unknown amount".to_owned()),
                };
                tracing::warn!(%payment_id, %received, kind = %event.kind, "payment received outside tolerance");
                self.records.note_received(
                    &payment_id,
                    &received,
                    event.transaction_id.as_deref(),
                    now,
                )?;
                Ok(WebhookOutcome::Noted { payment_id })
            }
            None => Ok(WebhookOutcome::Ignored),
            Some(status) => match self.records.transition(
                &payment_id,
                status,
                event.transaction_id.as_deref(),
                now,
            )? {
                applied @ Transition::Applied(_) => {
                    self.finalize(applied).await;
                    Ok(WebhookOutcome::Applied { payment_id, status })
                }
                Transition::AlreadyTerminal(existing) => {
                    tracing::info!(%payment_id, status = ?existing.status, "webhook replay ignored");
                    Ok(WebhookOutcome::Replayed {
                        payment_id,
                        status: existing.status,
                    })
                }
                Transition::Unchanged(_) => Ok(WebhookOutcome::Ignored),
            },
        }
    }

    fn lookup(&self, lookup: &RecordLookup) -> Option<PaymentRecord> {
        match lookup {
            RecordLookup::PaymentId(id) => self.records.get(id),
            RecordLookup::InvoiceId(id) => self.records.by_invoice_id(id),
            RecordLookup::ProviderPaymentId(id) => self.records.by_provider_payment_id(id),
            RecordLookup::Address(address) => self.records.by_address(address),
        }
    }

    /// Catalog entries whose rail is configured, in catalog order.
    #[must_use]
    pub fn list_available_methods(&self) -> Vec<MethodDescriptor> {
        METHOD_CATALOG
            .iter()
            .filter(|entry| {
                self.adapters
                    .get(&entry.rail)
                    .is_some_and(|adapter| adapter.supports(entry.method, entry.network))
            })
            .copied()
            .collect()
    }

    /// Runs every adapter's assignment sweep.
    pub fn sweep_assignments(&self) -> usize {
        self.adapters
            .values()
            .map(|adapter| adapter.evict_stale())
            .sum()
    }

    /// Drops expired and lapsed pending records.
    pub fn purge_records(&self) -> usize {
        self.records.purge_expired(UnixTimestamp::now())
    }
}

fn status_response(record: &PaymentRecord, report: &StatusReport) -> PaymentStatusResponse {
    let status = if record.status.is_terminal() {
        record.status.into()
    } else {
        report.status
    };
    PaymentStatusResponse {
        payment_id: record.payment_id.clone(),
        provider: record.rail,
        status,
        txid: report.txid.clone().or_else(|| record.txid.clone()),
        confirmations: report.confirmations,
        detail: report.detail.clone(),
        expires_at: record.expires_at,
    }
}

/// Folds a rail payload into the rail-independent response shape.
fn normalize(request: &RailRequest, payment: &RailPayment) -> PaymentResponse {
    let expected = payment.payload.expected_amount();
    let amount = expected.amount.normalize().to_string();

    let (address, invoice, checkout_url, qr_data) = match &payment.payload {
        RailPayload::Bitcoin(p) => (
            Some(p.address.clone()),
            None,
            None,
            format!("bitcoin:{}?amount={amount}", p.address),
        ),
        RailPayload::Gateway(p) if p.network == "lightning" => (
            None,
            Some(p.destination.clone()),
            p.checkout_link.clone(),
            format!("lightning:{}", p.destination),
        ),
        RailPayload::Gateway(p) => (
            Some(p.destination.clone()),
            None,
            p.checkout_link.clone(),
            p.destination.clone(),
        ),
        RailPayload::Token(p) if p.network == "erc20" => (
            Some(p.address.clone()),
            None,
            None,
            format!(
                "ethereum:{}@1/transfer?address={}&uint256={}",
                p.contract, p.address, p.amount_units
            ),
        ),
        RailPayload::Token(p) => (Some(p.address.clone()), None, None, p.address.clone()),
        RailPayload::Processor(p) => (
            Some(p.pay_address.clone()),
            None,
            None,
            p.pay_address.clone(),
        ),
        RailPayload::Checkout(p) => (None, None, Some(p.url.clone()), p.url.clone()),
    };

    PaymentResponse {
        success: true,
        provider: payment.payload.rail(),
        method: request.method,
        network: request.network.clone(),
        payment_id: request.payment_id.clone(),
        address,
        invoice,
        checkout_url,
        qr_data,
        amount,
        currency: expected.currency,
        amount_usd: request.amount_usd,
        expires_at: payment.payload.expires_at(),
        reused: payment.reused,
    }
}
