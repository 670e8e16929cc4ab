//! End-to-end router behavior over an in-memory gateway rail.

use async_trait::async_trait;
use railgate::adapter::RailAdapter;
use railgate::assignment::{Assignment, AssignmentCache, AssignmentKey, AssignmentProbe, ProbeOutcome, Reuse};
use railgate::pricing::PlanCatalog;
use railgate::proto::{
    CreatePaymentRequest, GatewayPayload, PaymentStatus, RailPayload, RailPayment, RailRequest,
    RecordLookup, SettlementEvent, SettlementStatus, StatusQuery, StatusReport,
};
use railgate::router::WebhookOutcome;
use railgate::sweep::{SweepSchedule, Sweeper};
use railgate::webhook::{self, WebhookSecret};
use railgate::{PaymentMethod, ProviderRouter, Rail, RailError, UnixTimestamp};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WINDOW: Duration = Duration::from_secs(30 * 60);

struct InMemoryGateway {
    rail: Rail,
    configured: bool,
    cache: AssignmentCache<RailPayload>,
    minted: AtomicUsize,
    probe: Mutex<ProbeOutcome>,
    poll: Mutex<Option<StatusReport>>,
    secret: WebhookSecret,
}

impl InMemoryGateway {
    fn new(rail: Rail, configured: bool) -> Self {
        Self {
            rail,
            configured,
            cache: AssignmentCache::new("in-memory", WINDOW),
            minted: AtomicUsize::new(0),
            probe: Mutex::new(ProbeOutcome::Unpaid),
            poll: Mutex::new(Some(StatusReport::pending())),
            secret: secret(),
        }
    }

    fn set_poll(&self, report: Option<StatusReport>) {
        *self.poll.lock().unwrap() = report;
    }
}

fn secret() -> WebhookSecret {
    WebhookSecret::new("hook-secret").unwrap()
}

#[async_trait]
impl AssignmentProbe<RailPayload> for InMemoryGateway {
    async fn probe(&self, _assignment: &Assignment<RailPayload>) -> ProbeOutcome {
        self.probe.lock().unwrap().clone()
    }
}

#[async_trait]
impl RailAdapter for InMemoryGateway {
    fn rail(&self) -> Rail {
        self.rail
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn supports(&self, method: PaymentMethod, network: &str) -> bool {
        self.configured && method.rail() == self.rail && (network == "lightning" || network == "liquid" || network == "trc20")
    }

    async fn create_payment(&self, request: &RailRequest) -> railgate::Result<RailPayment> {
        let key = AssignmentKey::new(&request.email, &request.plan, &request.network);
        let _guard = self.cache.lock(&key).await;
        if let Reuse::Reused(assignment) = self.cache.get(&key, request.amount_usd, self).await {
            return Ok(RailPayment::reused(assignment.payload));
        }

        // Stands in for the upstream round trip; lets concurrent callers interleave.
        tokio::task::yield_now().await;
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        let now = UnixTimestamp::now();
        let payload = RailPayload::Gateway(GatewayPayload {
            invoice_id: format!("inv-{n}"),
            network: request.network.clone(),
            payment_method: "BTC-LN".into(),
            destination: format!("lnbc{n}"),
            amount: Decimal::new(10_000, 8),
            checkout_link: None,
            issued_at: now,
            expires_at: now + 900,
        });
        self.cache.put(key, payload.correlation_id(), request.amount_usd, payload.clone(), now);
        Ok(RailPayment::minted(payload))
    }

    async fn check_status(&self, _query: &StatusQuery) -> railgate::Result<StatusReport> {
        self.poll
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RailError::transient(self.rail, "operation timed out"))
    }

    async fn mark_used(&self, payload: &RailPayload, _email: Option<&str>) {
        self.cache.evict_correlation(payload.correlation_id());
    }

    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> railgate::Result<Option<SettlementEvent>> {
        webhook::verify_sha256(Some(&self.secret), body, signature)?;
        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
        let status = match value["type"].as_str() {
            Some("InvoiceSettled") => SettlementStatus::Confirmed,
            Some("InvoiceExpired") => SettlementStatus::Expired,
            Some("InvoicePartial") => SettlementStatus::Mismatched,
            _ => return Ok(None),
        };
        Ok(Some(SettlementEvent {
            lookup: RecordLookup::InvoiceId(value["invoiceId"].as_str().unwrap().to_owned()),
            status,
            transaction_id: None,
            received: value["received"].as_str().map(str::to_owned),
            kind: value["type"].as_str().unwrap().to_owned(),
        }))
    }

    fn evict_stale(&self) -> usize {
        self.cache.evict_stale().len()
    }
}

fn router_with(gateway: Arc<InMemoryGateway>) -> ProviderRouter {
    let plans = PlanCatalog::default().with_plan("pro", "Pro", Decimal::from(29));
    ProviderRouter::new(plans).with_adapter(gateway)
}

fn request(payment_id: &str) -> CreatePaymentRequest {
    CreatePaymentRequest {
        method: PaymentMethod::Lightning,
        network: None,
        plan: "pro".into(),
        email: "alice@example.com".into(),
        payment_id: payment_id.into(),
        amount_override: None,
    }
}

fn signed(event: &serde_json::Value) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(event).unwrap();
    let sig = format!("sha256={}", webhook::sign_sha256(&secret(), &body));
    (body, sig)
}

#[tokio::test]
async fn repeated_requests_reuse_invoice() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));

    let first = router.create_payment(request("p1")).await.unwrap();
    let second = router.create_payment(request("p2")).await.unwrap();

    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(first.invoice, second.invoice);
    assert_eq!(second.qr_data, "lightning:lnbc1");
    assert_eq!(gateway.minted.load(Ordering::SeqCst), 1);

    // Only the newest record stays pending.
    assert_eq!(router.records().get("p1").unwrap().status, PaymentStatus::Expired);
    assert_eq!(router.records().get("p2").unwrap().status, PaymentStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn unpaid_invoice_reused_past_window() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));

    let first = router.create_payment(request("p1")).await.unwrap();
    tokio::time::advance(WINDOW + Duration::from_secs(60)).await;
    let second = router.create_payment(request("p2")).await.unwrap();
    assert_eq!(first.invoice, second.invoice);
    assert!(second.reused);

    *gateway.probe.lock().unwrap() = ProbeOutcome::Settled;
    tokio::time::advance(WINDOW + Duration::from_secs(60)).await;
    let third = router.create_payment(request("p3")).await.unwrap();
    assert_ne!(third.invoice, first.invoice);
    assert!(!third.reused);
}

#[tokio::test]
async fn settled_invoice_is_never_served_again_and_replays_are_harmless() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));
    router.create_payment(request("p1")).await.unwrap();

    let (body, sig) = signed(&json!({"type": "InvoiceSettled", "invoiceId": "inv-1"}));
    let outcome = router.handle_webhook(Rail::Gateway, Some(&sig), &body).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            payment_id: "p1".into(),
            status: PaymentStatus::Confirmed
        }
    );

    let replay = router.handle_webhook(Rail::Gateway, Some(&sig), &body).await.unwrap();
    assert!(matches!(replay, WebhookOutcome::Replayed { status: PaymentStatus::Confirmed, .. }));

    let (expired, expired_sig) = signed(&json!({"type": "InvoiceExpired", "invoiceId": "inv-1"}));
    router.handle_webhook(Rail::Gateway, Some(&expired_sig), &expired).await.unwrap();
    assert_eq!(router.records().get("p1").unwrap().status, PaymentStatus::Confirmed);

    let next = router.create_payment(request("p2")).await.unwrap();
    assert_eq!(next.invoice.as_deref(), Some("lnbc2"));
    assert!(!next.reused);
}

#[tokio::test]
async fn expired_webhook_retires_the_invoice() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));
    router.create_payment(request("p1")).await.unwrap();

    let (body, sig) = signed(&json!({"type": "InvoiceExpired", "invoiceId": "inv-1"}));
    let outcome = router.handle_webhook(Rail::Gateway, Some(&sig), &body).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            payment_id: "p1".into(),
            status: PaymentStatus::Expired
        }
    );
    assert!(gateway.cache.is_empty());

    let next = router.create_payment(request("p2")).await.unwrap();
    assert!(!next.reused);
    assert_eq!(next.invoice.as_deref(), Some("lnbc2"));
}

#[tokio::test]
async fn tampered_webhook_rejected() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(gateway);
    router.create_payment(request("p1")).await.unwrap();

    let (mut body, sig) = signed(&json!({"type": "InvoiceSettled", "invoiceId": "inv-1"}));
    body[3] ^= 0x20;
    assert!(matches!(
        router.handle_webhook(Rail::Gateway, Some(&sig), &body).await,
        Err(RailError::SignatureInvalid(_))
    ));
    assert_eq!(router.records().get("p1").unwrap().status, PaymentStatus::Pending);
}

#[tokio::test]
async fn unconfigured_rails_are_hidden_and_rejected() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let token = Arc::new(InMemoryGateway::new(Rail::Token, false));
    let router = router_with(gateway).with_adapter(token);

    let methods: Vec<_> = router
        .list_available_methods()
        .into_iter()
        .map(|m| (m.method, m.network))
        .collect();
    assert_eq!(
        methods,
        [(PaymentMethod::Lightning, "lightning"), (PaymentMethod::Liquid, "liquid")]
    );

    let mut usdt = request("p1");
    usdt.method = PaymentMethod::Usdt;
    assert!(matches!(
        router.create_payment(usdt).await,
        Err(RailError::NotConfigured(Rail::Token))
    ));
    let mut card = request("p2");
    card.method = PaymentMethod::Card;
    assert!(matches!(
        router.create_payment(card).await,
        Err(RailError::NotConfigured(Rail::Checkout))
    ));
}

#[tokio::test]
async fn request_validation() {
    let router = router_with(Arc::new(InMemoryGateway::new(Rail::Gateway, true)));
    router.create_payment(request("p1")).await.unwrap();
    assert!(matches!(
        router.create_payment(request("p1")).await,
        Err(RailError::DuplicatePayment(_))
    ));

    let mut unknown_plan = request("p2");
    unknown_plan.plan = "platinum".into();
    assert!(matches!(
        router.create_payment(unknown_plan).await,
        Err(RailError::UnknownPlan(_))
    ));

    let mut bad_network = request("p3");
    bad_network.network = Some("onchain".into());
    assert!(matches!(
        router.create_payment(bad_network).await,
        Err(RailError::UnknownNetwork { .. })
    ));

    let mut free = request("p4");
    free.amount_override = Some(Decimal::ZERO);
    assert!(matches!(
        router.create_payment(free).await,
        Err(RailError::InvalidAmount(_))
    ));
}

#[tokio::test]
async fn upstream_failure_reports_pending() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));
    router.create_payment(request("p1")).await.unwrap();

    gateway.set_poll(None);
    let status = router.status("p1").await.unwrap();
    assert_eq!(status.status, SettlementStatus::Pending);

    gateway.set_poll(Some(StatusReport::confirmed("tx-1")));
    let status = router.status("p1").await.unwrap();
    assert_eq!(status.status, SettlementStatus::Confirmed);
    assert_eq!(status.txid.as_deref(), Some("tx-1"));

    // Terminal records answer from the store.
    gateway.set_poll(None);
    assert_eq!(router.status("p1").await.unwrap().status, SettlementStatus::Confirmed);
    assert!(matches!(router.status("nope").await, Err(RailError::PaymentNotFound(_))));
}

#[tokio::test]
async fn mismatched_poll_keeps_record_pending() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));
    router.create_payment(request("p1")).await.unwrap();

    gateway.set_poll(Some(
        StatusReport::new(SettlementStatus::Mismatched)
            .with_txid("tx-short")
            .with_received("0.00009 BTC"),
    ));
    let status = router.status("p1").await.unwrap();
    assert_eq!(status.status, SettlementStatus::Mismatched);

    let record = router.records().get("p1").unwrap();
    assert_eq!(record.status, PaymentStatus::Pending);
    assert_eq!(record.received.as_deref(), Some("0.00009 BTC"));
}

#[tokio::test]
async fn mark_used_retires_assignment_and_record() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));
    router.create_payment(request("p1")).await.unwrap();

    let used = router.mark_used("p1").await.unwrap();
    assert_eq!(used, ["p1"]);
    assert_eq!(router.records().get("p1").unwrap().status, PaymentStatus::Used);
    assert!(gateway.cache.is_empty());

    let next = router.create_payment(request("p2")).await.unwrap();
    assert!(!next.reused);
}

#[tokio::test(start_paused = true)]
async fn sweeper_evicts_untouched_assignments() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = Arc::new(router_with(Arc::clone(&gateway)));
    router.create_payment(request("p1")).await.unwrap();
    assert_eq!(gateway.cache.len(), 1);

    let token = CancellationToken::new();
    let sweeper = Sweeper::start(Arc::clone(&router), SweepSchedule::default(), token);

    tokio::time::advance(Duration::from_secs(50 * 60)).await;
    tokio::task::yield_now().await;
    assert_eq!(gateway.cache.len(), 1);

    tokio::time::advance(Duration::from_secs(10 * 60)).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert!(gateway.cache.is_empty());

    sweeper.shutdown().await;
}

#[tokio::test]
async fn partial_payment_webhook_records_received_amount() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));
    router.create_payment(request("p1")).await.unwrap();

    let (body, sig) = signed(&json!({"type": "InvoicePartial", "invoiceId": "inv-1", "received": "0.00005 BTC"}));
    let outcome = router.handle_webhook(Rail::Gateway, Some(&sig), &body).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Noted { payment_id: "p1".into() });
    let record = router.records().get("p1").unwrap();
    assert_eq!(record.status, PaymentStatus::Pending);
    assert_eq!(record.received.as_deref(), Some("0.00005 BTC"));

    // Without an amount in the event, the rail is asked for it.
    gateway.set_poll(Some(
        StatusReport::new(SettlementStatus::Mismatched).with_received("0.00007 BTC"),
    ));
    let (body, sig) = signed(&json!({"type": "InvoicePartial", "invoiceId": "inv-1"}));
    router.handle_webhook(Rail::Gateway, Some(&sig), &body).await.unwrap();
    assert_eq!(router.records().get("p1").unwrap().received.as_deref(), Some("0.00007 BTC"));
}

#[tokio::test]
async fn concurrent_requests_mint_one_invoice() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));

    let (a, b) = tokio::join!(router.create_payment(request("p1")), router.create_payment(request("p2")));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.invoice, b.invoice);
    assert!(a.reused ^ b.reused);
    assert_eq!(gateway.minted.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.cache.len(), 1);
}

#[tokio::test]
async fn losing_a_payment_id_race_retires_the_minted_invoice() {
    let gateway = Arc::new(InMemoryGateway::new(Rail::Gateway, true));
    let router = router_with(Arc::clone(&gateway));

    let mut other = request("p1");
    other.email = "bob@example.com".into();
    let (a, b) = tokio::join!(router.create_payment(request("p1")), router.create_payment(other));

    let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
    assert!(winner.is_ok());
    assert!(matches!(loser, Err(RailError::DuplicatePayment(id)) if id == "p1"));
    assert_eq!(gateway.minted.load(Ordering::SeqCst), 2);

    // Only the stored record's invoice stays assignable.
    let record = router.records().get("p1").unwrap();
    assert_eq!(gateway.cache.len(), 1);
    assert!(gateway.cache.contains_correlation(record.payload.correlation_id()));
}
