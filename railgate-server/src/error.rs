//! HTTP mapping of router errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use railgate::RailError;

/// Errors returned by the route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Anything the router reports.
    #[error(transparent)]
    Rail(#[from] RailError),

    /// The request body did not parse.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

impl ApiError {
    /// Status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Rail(err) => match err {
                RailError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                RailError::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
                RailError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
                RailError::DuplicatePayment(_) | RailError::DoubleCredit(_) => StatusCode::CONFLICT,
                RailError::Unsupported { .. } => StatusCode::METHOD_NOT_ALLOWED,
                RailError::Upstream { .. } => StatusCode::BAD_GATEWAY,
                RailError::UnknownMethod(_)
                | RailError::UnknownNetwork { .. }
                | RailError::UnknownPlan(_)
                | RailError::InvalidAmount(_)
                | RailError::InvalidRequest(_)
                | RailError::AmountMismatch { .. }
                | RailError::ToleranceViolation { .. } => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, %status, "request failed");
        }
        let body = serde_json::json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railgate::Rail;

    #[test]
    fn maps_errors_to_statuses() {
        let cases = [
            (RailError::NotConfigured(Rail::Bitcoin), StatusCode::SERVICE_UNAVAILABLE),
            (RailError::SignatureInvalid("bad".into()), StatusCode::UNAUTHORIZED),
            (RailError::PaymentNotFound("p1".into()), StatusCode::NOT_FOUND),
            (RailError::UnknownPlan("gold".into()), StatusCode::BAD_REQUEST),
            (RailError::transient(Rail::Gateway, "timeout"), StatusCode::BAD_GATEWAY),
            (RailError::DuplicatePayment("p1".into()), StatusCode::CONFLICT),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }
}
