//! Error taxonomy shared by every rail.
//!
//! Rail crates keep their own error enums for transport and parsing detail
//! and convert into [`RailError`] at the adapter seam.

use rust_decimal::Decimal;
use std::fmt::Display;

use crate::rail::Rail;

/// Result alias used throughout the core crate.
pub type Result<T, E = RailError> = std::result::Result<T, E>;

/// Everything that can go wrong while creating, polling, or settling a payment.
#[derive(Debug, thiserror::Error)]
pub enum RailError {
    /// The rail has no adapter, or its adapter lacks credentials.
    #[error("{0} rail is not configured")]
    NotConfigured(Rail),

    /// The rail's upstream API failed.
    ///
    /// `transient` marks timeouts and connection errors; polls treat those as
    /// "still pending", never as "not paid".
    #[error("{rail} upstream error: {message}")]
    Upstream {
        /// Rail whose upstream failed.
        rail: Rail,
        /// Upstream detail.
        message: String,
        /// Whether retrying later may succeed.
        transient: bool,
    },

    /// A cached assignment was quoted for a different amount.
    #[error("assigned amount {assigned} does not match requested amount {requested}")]
    AmountMismatch {
        /// Amount the assignment was minted for.
        assigned: Decimal,
        /// Amount the caller asked for now.
        requested: Decimal,
    },

    /// A transfer arrived but its amount falls outside the rail tolerance.
    #[error("received {received}, expected {expected}")]
    ToleranceViolation {
        /// Expected amount with unit.
        expected: String,
        /// Received amount with unit.
        received: String,
    },

    /// Webhook signature missing, malformed, or wrong.
    #[error("webhook signature rejected: {0}")]
    SignatureInvalid(String),

    /// The transaction was already credited to another payment.
    #[error("transaction {0} already credited to another payment")]
    DoubleCredit(String),

    /// Method name not in the catalog.
    #[error("unknown payment method: {0}")]
    UnknownMethod(String),

    /// Method exists but not on this network.
    #[error("payment method {method} is not offered on network {network}")]
    UnknownNetwork {
        /// Requested method.
        method: String,
        /// Requested network.
        network: String,
    },

    /// Plan id without a configured price.
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// Non-positive or unparseable amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// No record with this id or correlation id.
    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    /// A record with this payment id already exists.
    #[error("payment {0} already exists")]
    DuplicatePayment(String),

    /// Malformed caller input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The rail cannot perform this operation.
    #[error("{rail} rail does not support {operation}")]
    Unsupported {
        /// Rail asked.
        rail: Rail,
        /// Operation name.
        operation: &'static str,
    },
}

impl RailError {
    /// Permanent upstream failure (bad response, rejected request).
    pub fn upstream(rail: Rail, message: impl Display) -> Self {
        Self::Upstream {
            rail,
            message: message.to_string(),
            transient: false,
        }
    }

    /// Transient upstream failure (timeout, connection reset).
    pub fn transient(rail: Rail, message: impl Display) -> Self {
        Self::Upstream {
            rail,
            message: message.to_string(),
            transient: true,
        }
    }

    /// Whether a later retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream { transient: true, .. })
    }

    /// Whether the caller supplied something invalid, as opposed to a
    /// failure on our side or upstream.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownMethod(_)
                | Self::UnknownNetwork { .. }
                | Self::UnknownPlan(_)
                | Self::InvalidAmount(_)
                | Self::DuplicatePayment(_)
                | Self::InvalidRequest(_)
        )
    }
}
