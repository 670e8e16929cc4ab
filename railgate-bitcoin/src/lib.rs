//! On-chain Bitcoin rail for `railgate`.
//!
//! - [`derivation`]: receive addresses from an account extended key, and an
//!   allocator that leases them so concurrent callers never share one.
//! - [`explorer`]: an Esplora client for address activity and incoming
//!   transfers.
//! - [`price`]: a TTL-cached USD/BTC quote that degrades to a stale price
//!   rather than failing.
//! - [`BitcoinRail`]: the [`RailAdapter`](railgate::RailAdapter) tying them
//!   together.

mod adapter;
pub mod config;
pub mod derivation;
mod error;
pub mod explorer;
pub mod price;

pub use adapter::BitcoinRail;
pub use config::BitcoinConfig;
pub use error::BitcoinError;
