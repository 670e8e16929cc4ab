//! Builds the router and its adapters from configuration.
//!
//! A rail whose section is broken (bad key, malformed URL, invalid address)
//! is logged and registered unconfigured; the process still starts.

use std::fmt::Display;
use std::sync::Arc;

use railgate::{ProviderRouter, Rail};
use railgate_bitcoin::BitcoinRail;
use railgate_checkout::CheckoutRail;
use railgate_gateway::GatewayRail;
use railgate_processor::ProcessorRail;
use railgate_token::TokenRail;

use crate::config::ServerConfig;

fn or_unconfigured<T, E: Display>(rail: Rail, built: Result<T, E>, fallback: fn() -> T) -> T {
    built.unwrap_or_else(|err| {
        tracing::warn!(%rail, %err, "rail disabled by configuration error");
        fallback()
    })
}

/// Creates the router with every rail registered.
#[must_use]
pub fn build_router(config: &ServerConfig) -> ProviderRouter {
    let bitcoin = or_unconfigured(Rail::Bitcoin, BitcoinRail::new(&config.bitcoin), BitcoinRail::unconfigured);
    let gateway = or_unconfigured(
        Rail::Gateway,
        GatewayRail::new(config.gateway.clone()),
        GatewayRail::unconfigured,
    );
    let token = or_unconfigured(Rail::Token, TokenRail::new(&config.token), TokenRail::unconfigured);
    let processor = or_unconfigured(
        Rail::Processor,
        ProcessorRail::new(config.processor.clone()),
        ProcessorRail::unconfigured,
    );
    let checkout = or_unconfigured(
        Rail::Checkout,
        CheckoutRail::new(config.checkout.clone()),
        CheckoutRail::unconfigured,
    );

    let router = ProviderRouter::new(config.plan_catalog())
        .with_adapter(Arc::new(bitcoin))
        .with_adapter(Arc::new(gateway))
        .with_adapter(Arc::new(token))
        .with_adapter(Arc::new(processor))
        .with_adapter(Arc::new(checkout));
    tracing::info!(
        plans = config.plans.len(),
        methods = router.list_available_methods().len(),
        "router ready"
    );
    router
}
