use railgate::{Rail, RailError};
use railgate_http::RestClientError;

/// Failures specific to the processor rail.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The processor answered without a field we need.
    #[error("processor payment {payment_id} has no {field}")]
    MissingField {
        /// Provider payment id.
        payment_id: String,
        /// Missing field name.
        field: &'static str,
    },

    /// Processor API failure.
    #[error(transparent)]
    Http(#[from] RestClientError),
}

impl From<ProcessorError> for RailError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Http(e) => e.into_rail(Rail::Processor),
            other => Self::upstream(Rail::Processor, other),
        }
    }
}
