//! Axum route handlers.
//!
//! Endpoints:
//! - `GET /health`
//! - `GET /methods`: configured payment methods, in catalog order
//! - `POST /payments`: create or reuse a payment
//! - `GET /payments?email=`: a caller's payments, newest first
//! - `GET /payments/{id}`: current status, polling the rail when pending
//! - `POST /payments/{id}/used`: retire the assignment behind a payment
//! - `POST /webhooks/{gateway,processor,checkout}`: signed provider callbacks

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use railgate::proto::{CreatePaymentRequest, PaymentResponse, PaymentStatusResponse};
use railgate::rail::MethodDescriptor;
use railgate::router::WebhookOutcome;
use railgate::store::PaymentRecord;
use railgate::{ProviderRouter, Rail};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state.
pub type AppState = Arc<ProviderRouter>;

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /methods`
pub async fn get_methods(State(router): State<AppState>) -> Json<Vec<MethodDescriptor>> {
    Json(router.list_available_methods())
}

/// `POST /payments`
///
/// # Errors
///
/// 400 on bad input, 503 for an unconfigured rail, 502 when the rail's
/// upstream fails while minting.
pub async fn post_payment(State(router): State<AppState>, body: Bytes) -> Result<Json<PaymentResponse>, ApiError> {
    let request: CreatePaymentRequest = serde_json::from_slice(&body)?;
    Ok(Json(router.create_payment(request).await?))
}

/// `GET /payments/{id}`
///
/// # Errors
///
/// 404 for an unknown payment.
pub async fn get_payment(
    State(router): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    Ok(Json(router.status(&payment_id).await?))
}

/// Query of `GET /payments`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Caller identity.
    pub email: String,
}

/// `GET /payments?email=`
pub async fn list_payments(State(router): State<AppState>, Query(query): Query<ListQuery>) -> Json<Vec<PaymentRecord>> {
    Json(router.records().list_by_email(&query.email))
}

/// Answer of `POST /payments/{id}/used`.
#[derive(Debug, Serialize)]
pub struct UsedResponse {
    /// Always `true`; failures are errors.
    pub success: bool,
    /// Payments moved to `used`.
    pub used: Vec<String>,
}

/// `POST /payments/{id}/used`
///
/// # Errors
///
/// 404 for an unknown payment, 503 for an unconfigured rail.
pub async fn post_used(
    State(router): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<UsedResponse>, ApiError> {
    let used = router.mark_used(&payment_id).await?;
    Ok(Json(UsedResponse { success: true, used }))
}

async fn webhook(
    router: &ProviderRouter,
    rail: Rail,
    header: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    let signature = headers.get(header).and_then(|v| v.to_str().ok());
    Ok(Json(router.handle_webhook(rail, signature, body).await?))
}

/// `POST /webhooks/gateway`
///
/// # Errors
///
/// 401 for a bad signature, 404 for an unknown invoice.
pub async fn post_gateway_webhook(
    State(router): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    webhook(&router, Rail::Gateway, railgate_gateway::SIGNATURE_HEADER, &headers, &body).await
}

/// `POST /webhooks/processor`
///
/// # Errors
///
/// 401 for a bad signature, 404 for an unknown payment.
pub async fn post_processor_webhook(
    State(router): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    webhook(&router, Rail::Processor, railgate_processor::SIGNATURE_HEADER, &headers, &body).await
}

/// `POST /webhooks/checkout`
///
/// # Errors
///
/// 401 for a bad signature, 404 for an unknown payment.
pub async fn post_checkout_webhook(
    State(router): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    webhook(&router, Rail::Checkout, railgate_checkout::SIGNATURE_HEADER, &headers, &body).await
}

/// Creates an Axum [`axum::Router`] with every endpoint.
pub fn app_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/methods", get(get_methods))
        .route("/payments", post(post_payment).get(list_payments))
        .route("/payments/{id}", get(get_payment))
        .route("/payments/{id}/used", post(post_used))
        .route("/webhooks/gateway", post(post_gateway_webhook))
        .route("/webhooks/processor", post(post_processor_webhook))
        .route("/webhooks/checkout", post(post_checkout_webhook))
        .with_state(state)
}
