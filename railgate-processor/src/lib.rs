//! Stablecoin payment-processor rail for `railgate`.
//!
//! The processor quotes the crypto amount for a USD price and hands out a
//! deposit address. Settlement arrives as IPN callbacks signed with
//! HMAC-SHA512 over the key-sorted JSON body; polling covers missed ones.

mod adapter;
pub mod client;
pub mod config;
mod error;

pub use adapter::{ProcessorRail, SIGNATURE_HEADER};
pub use config::ProcessorConfig;
pub use error::ProcessorError;
