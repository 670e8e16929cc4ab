//! Checkout sessions routed through the provider router.

use railgate::pricing::{Plan, PlanCatalog};
use railgate::proto::{CreatePaymentRequest, PaymentStatus};
use railgate::router::WebhookOutcome;
use railgate::webhook::{self, WebhookSecret};
use railgate::{PaymentMethod, ProviderRouter, Rail};
use railgate_checkout::{CheckoutConfig, CheckoutRail};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn checkout_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkouts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chk_1",
            "url": "https://pay.example.com/chk_1"
        })))
        .expect(1)
        .mount(&server)
        .await;
    server
}

fn router(server: &MockServer) -> ProviderRouter {
    let plans = HashMap::from([(
        "monthly".to_owned(),
        Plan {
            name: "Monthly".to_owned(),
            price_usd: Decimal::from(29),
        },
    )]);
    let rail = CheckoutRail::new(CheckoutConfig {
        api_key: Some("sk_test".to_owned()),
        webhook_secret: Some("whsec".to_owned()),
        url: server.uri(),
        products: [("monthly".to_owned(), "prod_monthly".to_owned())].into(),
        ..CheckoutConfig::default()
    })
    .unwrap();
    ProviderRouter::new(PlanCatalog::new(plans)).with_adapter(Arc::new(rail))
}

fn request(payment_id: &str) -> CreatePaymentRequest {
    CreatePaymentRequest {
        method: PaymentMethod::Card,
        network: None,
        plan: "monthly".to_owned(),
        email: "buyer@example.com".to_owned(),
        payment_id: payment_id.to_owned(),
        amount_override: None,
    }
}

#[tokio::test]
async fn completed_reused_session_confirms_the_live_record() {
    let server = checkout_server().await;
    let router = router(&server);

    let first = router.create_payment(request("p1")).await.unwrap();
    let second = router.create_payment(request("p2")).await.unwrap();
    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(second.checkout_url.as_deref(), Some("https://pay.example.com/chk_1"));
    assert_eq!(router.records().get("p1").unwrap().status, PaymentStatus::Expired);

    let secret = WebhookSecret::new("whsec").unwrap();
    let body = json!({
        "type": "checkout.completed",
        "data": {"id": "chk_1", "reference": "p1", "transaction_id": "ch_9"}
    })
    .to_string();
    let signature = webhook::sign_sha256(&secret, body.as_bytes());
    let outcome = router
        .handle_webhook(Rail::Checkout, Some(&signature), body.as_bytes())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            payment_id: "p2".to_owned(),
            status: PaymentStatus::Confirmed,
        }
    );

    let live = router.records().get("p2").unwrap();
    assert_eq!(live.status, PaymentStatus::Confirmed);
    assert_eq!(live.txid.as_deref(), Some("ch_9"));
    assert_eq!(router.records().get("p1").unwrap().status, PaymentStatus::Expired);
}

#[tokio::test]
async fn concurrent_requests_share_one_session() {
    let server = checkout_server().await;
    let router = router(&server);

    let (a, b) = tokio::join!(router.create_payment(request("p1")), router.create_payment(request("p2")));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.checkout_url, b.checkout_url);
    assert!(a.reused ^ b.reused);
    let pending = [a.payment_id, b.payment_id]
        .iter()
        .filter(|id| router.records().get(id).unwrap().status == PaymentStatus::Pending)
        .count();
    assert_eq!(pending, 1);
}
