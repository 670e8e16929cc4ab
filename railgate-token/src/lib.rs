//! USDT rail for `railgate`.
//!
//! Payments go straight to a fixed merchant address on TRON (TRC20) or
//! Ethereum (ERC20). Incoming transfers are read from TronGrid and Etherscan
//! and matched by amount within one cent.

pub mod address;
mod adapter;
pub mod config;
mod error;
pub mod source;

pub use adapter::{TokenRail, USDT_DECIMALS};
pub use config::{TokenConfig, TokenNetworkConfig};
pub use error::TokenError;
