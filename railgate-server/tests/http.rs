//! Full HTTP round trips against a server backed by a mocked processor.

use railgate::webhook::{self, WebhookSecret};
use railgate_server::app_router;
use railgate_server::config::ServerConfig;
use railgate_server::rails::build_router;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_server(processor_url: &str) -> SocketAddr {
    let config = ServerConfig::parse(&format!(
        r#"
        [plans.monthly]
        name = "Monthly"
        price_usd = "10"

        [processor]
        api_key = "np-key"
        ipn_secret = "ipn-secret"
        url = "{processor_url}"
        "#
    ))
    .unwrap();
    let app = app_router(Arc::new(build_router(&config)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

async fn mock_processor() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "payment_id": 5_077_125_051_u64,
            "payment_status": "waiting",
            "pay_address": "TXpayAddr",
            "pay_amount": "10.02",
            "pay_currency": "usdttrc20"
        })))
        .expect(1)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn lists_only_configured_methods() {
    let processor = mock_processor().await;
    let addr = spawn_server(&processor.uri()).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let methods: Value = client
        .get(format!("http://{addr}/methods"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let methods = methods.as_array().unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0]["method"], "stablecoin");
}

#[tokio::test]
async fn payment_lifecycle_over_http() {
    let processor = mock_processor().await;
    let addr = spawn_server(&processor.uri()).await;
    let client = reqwest::Client::new();
    let payments = format!("http://{addr}/payments");

    let request = json!({
        "method": "stablecoin",
        "plan": "monthly",
        "email": "Buyer@Example.com",
        "paymentId": "p1"
    });
    let response = client.post(&payments).json(&request).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["provider"], "processor");
    assert_eq!(created["address"], "TXpayAddr");
    assert_eq!(created["reused"], false);

    let duplicate = client.post(&payments).json(&request).send().await.unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let lightning = json!({"method": "lightning", "plan": "monthly", "email": "a@example.com", "paymentId": "p2"});
    let response = client.post(&payments).json(&lightning).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    let garbage = client.post(&payments).body("{not json").send().await.unwrap();
    assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);

    let unknown = client.get(format!("{payments}/nope")).send().await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let ipn = json!({
        "payment_id": 5_077_125_051_u64,
        "payment_status": "finished",
        "order_id": "p1",
        "payin_hash": "0xfeed"
    });
    let hook = format!("http://{addr}/webhooks/processor");
    let forged = client
        .post(&hook)
        .header("x-nowpayments-sig", "00")
        .body(ipn.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

    let secret = WebhookSecret::new("ipn-secret").unwrap();
    let signature = webhook::sign_sha512_sorted_json(&secret, &ipn);
    let outcome: Value = client
        .post(&hook)
        .header("x-nowpayments-sig", signature)
        .body(ipn.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome, json!({"outcome": "applied", "paymentId": "p1", "status": "confirmed"}));

    let status: Value = client
        .get(format!("{payments}/p1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "confirmed");
    assert_eq!(status["txid"], "0xfeed");

    let listed: Value = client
        .get(format!("{payments}?email=buyer@example.com"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
}
