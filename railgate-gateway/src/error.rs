use railgate::{Rail, RailError};
use railgate_http::RestClientError;

/// Failures specific to the gateway rail.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The invoice offers no destination for the requested payment method.
    #[error("invoice {invoice_id} has no {payment_method} destination")]
    MissingPaymentMethod {
        /// Invoice asked.
        invoice_id: String,
        /// Payment method id looked for.
        payment_method: String,
    },

    /// The gateway returned an amount we could not read.
    #[error("invalid amount from gateway: {0}")]
    InvalidAmount(String),

    /// Greenfield API failure.
    #[error(transparent)]
    Http(#[from] RestClientError),
}

impl From<GatewayError> for RailError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Http(e) => e.into_rail(Rail::Gateway),
            other => Self::upstream(Rail::Gateway, other),
        }
    }
}
