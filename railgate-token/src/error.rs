use railgate::{Rail, RailError};
use railgate_http::RestClientError;

/// Failures specific to the token rail.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// A configured address does not parse for its network.
    #[error("invalid {network} address {address}: {reason}")]
    InvalidAddress {
        /// `trc20` or `erc20`.
        network: &'static str,
        /// Address as configured.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The explorer reported an error in-band.
    #[error("explorer error: {0}")]
    Explorer(String),

    /// A transfer value is not an integer.
    #[error("unreadable transfer value: {0}")]
    InvalidValue(String),

    /// Explorer API failure.
    #[error(transparent)]
    Http(#[from] RestClientError),
}

impl From<TokenError> for RailError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Http(e) => e.into_rail(Rail::Token),
            other => Self::upstream(Rail::Token, other),
        }
    }
}
