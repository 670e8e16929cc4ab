//! HTTP boundary for the `railgate` router.
//!
//! # Modules
//!
//! - [`config`]: TOML configuration with environment variable expansion
//! - [`rails`]: adapter construction from configuration
//! - [`handlers`]: Axum route handlers and router builder
//! - [`error`]: HTTP status mapping of router errors
//! - [`telemetry`]: log subscriber and optional OTLP export
//! - [`util`]: shutdown signal handling

pub mod config;
pub mod error;
pub mod handlers;
pub mod rails;
pub mod telemetry;
pub mod util;

pub use handlers::{AppState, app_router};
