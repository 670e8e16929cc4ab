//! Hosted card-checkout rail for `railgate`.
//!
//! Each plan maps to an external product. A checkout session gives the payer
//! a hosted URL; settlement is push-only through `X-Signature` signed
//! webhooks carrying our payment id as reference.

mod adapter;
pub mod client;
pub mod config;
mod error;

pub use adapter::{CheckoutRail, SIGNATURE_HEADER};
pub use config::CheckoutConfig;
pub use error::CheckoutError;
