//! `[bitcoin]` configuration section.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// On-chain Bitcoin rail settings.
///
/// ```toml
/// [bitcoin]
/// xpub = "$BTC_XPUB"
/// network = "bitcoin"
/// explorer_url = "https://mempool.space/api"
/// ```
///
/// Without `xpub` the rail stays registered but unconfigured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinConfig {
    /// Account-level extended public key (`xpub`/`zpub`/`tpub`/`vpub`).
    #[serde(default)]
    pub xpub: Option<String>,

    /// `bitcoin`, `testnet`, `signet`, or `regtest`.
    #[serde(default = "default_network")]
    pub network: String,

    /// Esplora-compatible explorer API.
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,

    /// Price endpoint returning JSON with a `USD` field.
    #[serde(default = "default_price_url")]
    pub price_url: String,

    /// How long a fetched price stays fresh.
    #[serde(default = "default_price_ttl_secs")]
    pub price_ttl_secs: u64,

    /// Price used when no price has ever been fetched.
    #[serde(default = "default_fallback_usd_per_btc")]
    pub fallback_usd_per_btc: Decimal,

    /// Consecutive addresses scanned before allocation gives up.
    #[serde(default = "default_gap_limit")]
    pub gap_limit: u32,

    /// Confirmations required before a transfer settles a payment.
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u64,

    /// Assignment reuse window.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Outbound request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            xpub: None,
            network: default_network(),
            explorer_url: default_explorer_url(),
            price_url: default_price_url(),
            price_ttl_secs: default_price_ttl_secs(),
            fallback_usd_per_btc: default_fallback_usd_per_btc(),
            gap_limit: default_gap_limit(),
            min_confirmations: default_min_confirmations(),
            window_secs: default_window_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_network() -> String {
    "bitcoin".to_owned()
}

fn default_explorer_url() -> String {
    "https://mempool.space/api".to_owned()
}

fn default_price_url() -> String {
    "https://mempool.space/api/v1/prices".to_owned()
}

const fn default_price_ttl_secs() -> u64 {
    5 * 60
}

fn default_fallback_usd_per_btc() -> Decimal {
    Decimal::from(50_000)
}

const fn default_gap_limit() -> u32 {
    50
}

const fn default_min_confirmations() -> u64 {
    1
}

const fn default_window_secs() -> u64 {
    30 * 60
}

const fn default_timeout_secs() -> u64 {
    15
}
