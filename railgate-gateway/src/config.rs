//! `[gateway]` configuration section.

use serde::{Deserialize, Serialize};

/// Greenfield gateway settings.
///
/// ```toml
/// [gateway]
/// url = "https://pay.example.com"
/// api_key = "$GATEWAY_API_KEY"
/// store_id = "$GATEWAY_STORE_ID"
/// webhook_secret = "$GATEWAY_WEBHOOK_SECRET"
/// ```
///
/// The rail is configured only when `url`, `api_key` and `store_id` are all
/// present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL (without `/api/v1`).
    #[serde(default)]
    pub url: Option<String>,

    /// Greenfield API key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Store the invoices are created in.
    #[serde(default)]
    pub store_id: Option<String>,

    /// Secret for the `BTCPay-Sig` webhook header.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Payment method id offered on the `lightning` network.
    #[serde(default = "default_lightning_method")]
    pub lightning_method: String,

    /// Payment method id offered on the `liquid` network.
    #[serde(default = "default_liquid_method")]
    pub liquid_method: String,

    /// Invoice lifetime.
    #[serde(default = "default_expiration_minutes")]
    pub expiration_minutes: u64,

    /// Assignment reuse window.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Outbound request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            store_id: None,
            webhook_secret: None,
            lightning_method: default_lightning_method(),
            liquid_method: default_liquid_method(),
            expiration_minutes: default_expiration_minutes(),
            window_secs: default_window_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    /// Gateway payment method id for `network`.
    #[must_use]
    pub fn payment_method(&self, network: &str) -> Option<&str> {
        match network {
            "lightning" => Some(&self.lightning_method),
            "liquid" => Some(&self.liquid_method),
            _ => None,
        }
    }
}

fn default_lightning_method() -> String {
    "BTC-LN".to_owned()
}

fn default_liquid_method() -> String {
    "LBTC-CHAIN".to_owned()
}

const fn default_expiration_minutes() -> u64 {
    30
}

const fn default_window_secs() -> u64 {
    30 * 60
}

const fn default_timeout_secs() -> u64 {
    15
}
