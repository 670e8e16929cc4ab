//! `[token.trc20]` and `[token.erc20]` configuration sections.

use serde::{Deserialize, Serialize};

/// USDT settings per network.
///
/// ```toml
/// [token.trc20]
/// address = "$USDT_TRC20_ADDRESS"
/// api_key = "$TRONGRID_API_KEY"
///
/// [token.erc20]
/// address = "$USDT_ERC20_ADDRESS"
/// api_key = "$ETHERSCAN_API_KEY"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// TRON network.
    #[serde(default)]
    pub trc20: TokenNetworkConfig,
    /// Ethereum network.
    #[serde(default)]
    pub erc20: TokenNetworkConfig,
    /// Assignment reuse window, shared by both networks.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Outbound request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// One token network. A network without `address` is not offered.
///
/// `api_url` and `contract` default to the public explorer and the USDT
/// contract of the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenNetworkConfig {
    /// Merchant receiving address.
    #[serde(default)]
    pub address: Option<String>,
    /// Explorer API base URL.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Explorer API key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Token contract address.
    #[serde(default)]
    pub contract: Option<String>,
    /// EVM chain id (ERC20 only).
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            trc20: TokenNetworkConfig::default(),
            erc20: TokenNetworkConfig::default(),
            window_secs: default_window_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

const fn default_window_secs() -> u64 {
    30 * 60
}

const fn default_timeout_secs() -> u64 {
    15
}
