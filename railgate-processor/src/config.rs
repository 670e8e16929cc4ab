//! `[processor]` configuration section.

use serde::{Deserialize, Serialize};

/// Payment processor settings.
///
/// ```toml
/// [processor]
/// api_key = "$PROCESSOR_API_KEY"
/// ipn_secret = "$PROCESSOR_IPN_SECRET"
/// ipn_callback_url = "https://api.example.com/webhooks/processor"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// API key sent as `x-api-key`. The rail is unconfigured without it.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Secret for the `x-nowpayments-sig` IPN header.
    #[serde(default)]
    pub ipn_secret: Option<String>,

    /// Where the processor should deliver IPN callbacks.
    #[serde(default)]
    pub ipn_callback_url: Option<String>,

    /// API base URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Currencies the payer may send, also used as network names.
    #[serde(default = "default_pay_currencies")]
    pub pay_currencies: Vec<String>,

    /// Assignment reuse window.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Outbound request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            ipn_secret: None,
            ipn_callback_url: None,
            url: default_url(),
            pay_currencies: default_pay_currencies(),
            window_secs: default_window_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProcessorConfig {
    /// Whether `network` names one of the accepted pay currencies.
    #[must_use]
    pub fn accepts(&self, network: &str) -> bool {
        self.pay_currencies
            .iter()
            .any(|currency| currency.eq_ignore_ascii_case(network))
    }
}

fn default_url() -> String {
    "https://api.nowpayments.io".to_owned()
}

fn default_pay_currencies() -> Vec<String> {
    vec!["usdttrc20".to_owned()]
}

const fn default_window_secs() -> u64 {
    30 * 60
}

const fn default_timeout_secs() -> u64 {
    15
}
