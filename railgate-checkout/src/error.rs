use railgate::{Rail, RailError};
use railgate_http::RestClientError;

/// Failures specific to the checkout rail.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// No product is mapped for the plan.
    #[error("no checkout product for plan {0}")]
    UnmappedPlan(String),

    /// Checkout API failure.
    #[error(transparent)]
    Http(#[from] RestClientError),
}

impl From<CheckoutError> for RailError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::UnmappedPlan(plan) => Self::UnknownPlan(plan),
            CheckoutError::Http(e) => e.into_rail(Rail::Checkout),
        }
    }
}
