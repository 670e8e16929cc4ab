//! Multi-rail payment assignment, matching, and routing.
//!
//! `railgate` sells plans through several independent payment rails while
//! presenting one create/poll/settle contract:
//!
//! - [`assignment`]: reuse of addresses and invoices per caller, with a
//!   reuse window, staleness probes, and a hard age bound.
//! - [`tolerance`]: matching of explorer transfers against expected amounts,
//!   with a used-transaction set against double credit.
//! - [`router`]: the [`ProviderRouter`](router::ProviderRouter), which
//!   dispatches to [`RailAdapter`](adapter::RailAdapter)s, normalizes their
//!   payloads, and owns the [`PaymentRecordStore`](store::PaymentRecordStore).
//! - [`webhook`]: HMAC signature checks for push rails.
//! - [`sweep`]: periodic eviction and purge tasks.
//!
//! Rail implementations live in sibling crates.

pub mod adapter;
pub mod amount;
pub mod assignment;
pub mod error;
pub mod pricing;
pub mod proto;
pub mod rail;
pub mod router;
pub mod store;
pub mod sweep;
pub mod timestamp;
pub mod tolerance;
pub mod webhook;

pub use adapter::RailAdapter;
pub use error::{RailError, Result};
pub use rail::{PaymentMethod, Rail};
pub use router::ProviderRouter;
pub use timestamp::UnixTimestamp;
