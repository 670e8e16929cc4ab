//! Multi-rail payment server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p railgate-server --release
//!
//! # Run with custom config path
//! railgate-server --config /etc/railgate/config.toml
//!
//! # Configure logging level
//! RUST_LOG=railgate=debug,info railgate-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path to the TOML configuration file (default: `config.toml`)
//! - `HOST`: override bind address (default: `0.0.0.0`)
//! - `PORT`: override port (default: `8080`)
//! - `RUST_LOG`: log filter (default: `info`)
//! - `OTEL_EXPORTER_OTLP_*`: enable OTLP export (with the `telemetry` feature)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use railgate::sweep::Sweeper;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use railgate_server::app_router;
use railgate_server::config::ServerConfig;
use railgate_server::rails::build_router;
use railgate_server::telemetry::Telemetry;
use railgate_server::util::SigDown;

#[tokio::main]
async fn main() {
    let telemetry = Telemetry::init();

    if let Err(e) = run().await {
        tracing::error!("server failed: {e}");
        drop(telemetry);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load()?;
    tracing::info!(host = %config.host, port = config.port, plans = config.plans.len(), "loaded configuration");

    if config.plans.is_empty() {
        tracing::warn!("no plans configured, only amount overrides can be charged");
    }

    let router = Arc::new(build_router(&config));

    let sig_down = SigDown::try_new()?;
    let sweeper = Sweeper::start(Arc::clone(&router), config.sweeps.into(), sig_down.cancellation_token());

    let app = app_router(Arc::clone(&router))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{addr}");

    let token = sig_down.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    sig_down.recv().await;
    sweeper.join().await;
    tracing::info!("shut down gracefully");
    Ok(())
}
