//! Greenfield payment-gateway rail for `railgate`.
//!
//! Lightning (`BTC-LN`) and Liquid (`LBTC-CHAIN`) invoices are created in one
//! store, priced in USD. Settlement arrives by `BTCPay-Sig` signed webhook or
//! by polling the invoice.

mod adapter;
pub mod client;
pub mod config;
mod error;

pub use adapter::{GatewayRail, SIGNATURE_HEADER};
pub use config::GatewayConfig;
pub use error::GatewayError;
