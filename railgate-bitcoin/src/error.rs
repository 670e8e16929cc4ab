use railgate::{Rail, RailError};
use railgate_http::RestClientError;

/// Failures specific to the Bitcoin rail.
#[derive(Debug, thiserror::Error)]
pub enum BitcoinError {
    /// The extended public key could not be decoded.
    #[error("invalid extended public key: {0}")]
    InvalidXpub(String),

    /// The configured network name is unknown.
    #[error("unknown bitcoin network: {0}")]
    InvalidNetwork(String),

    /// Child key derivation failed.
    #[error("derivation failed: {0}")]
    Derivation(#[from] bitcoin::bip32::Error),

    /// Every address within the gap limit is funded or leased.
    #[error("no free address within gap limit {0}")]
    GapLimit(u32),

    /// The explorer returned a tip height that is not a number.
    #[error("invalid tip height: {0}")]
    InvalidTip(String),

    /// The price is zero or negative.
    #[error("invalid BTC price: {0}")]
    InvalidPrice(String),

    /// Explorer or price API failure.
    #[error(transparent)]
    Http(#[from] RestClientError),
}

impl From<BitcoinError> for RailError {
    fn from(err: BitcoinError) -> Self {
        match err {
            BitcoinError::Http(e) => e.into_rail(Rail::Bitcoin),
            BitcoinError::InvalidPrice(price) => Self::InvalidAmount(price),
            other => Self::upstream(Rail::Bitcoin, other),
        }
    }
}
