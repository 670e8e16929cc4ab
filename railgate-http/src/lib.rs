//! JSON REST client shared by the railgate rail adapters.
//!
//! Every rail talks to some upstream over JSON HTTP: block explorers,
//! payment gateways, processors. [`RestClient`] centralizes the plumbing:
//!
//! - a base URL with relative endpoint resolution and query building
//! - default headers (API keys) and a per-request timeout
//! - status checking with the response body kept for diagnostics
//! - `otel.status_code` / `error.message` recorded on the request span
//!
//! [`RestClientError`] distinguishes transient failures (timeouts, connection
//! errors, 5xx, 429) from permanent ones and converts into
//! [`railgate::RailError::Upstream`] via [`RestClientError::into_rail`].

mod client;
mod error;

pub use client::RestClient;
pub use error::RestClientError;
