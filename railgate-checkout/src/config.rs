//! `[checkout]` configuration section.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hosted checkout settings.
///
/// ```toml
/// [checkout]
/// api_key = "$CHECKOUT_API_KEY"
/// webhook_secret = "$CHECKOUT_WEBHOOK_SECRET"
/// success_url = "https://example.com/thanks"
///
/// [checkout.products]
/// monthly = "prod_monthly"
/// ```
///
/// Plans may also name their product with `checkout_product` under
/// `[plans.<id>]`; the server merges those into `products`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Bearer token. The rail is unconfigured without it.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Secret for the `X-Signature` webhook header.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// API base URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Where the payer lands after paying.
    #[serde(default)]
    pub success_url: Option<String>,

    /// Plan id to external product id.
    #[serde(default)]
    pub products: HashMap<String, String>,

    /// Product used for plans without a mapping, e.g. custom-priced ones.
    #[serde(default)]
    pub default_product: Option<String>,

    /// Assignment reuse window.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Outbound request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            webhook_secret: None,
            url: default_url(),
            success_url: None,
            products: HashMap::new(),
            default_product: None,
            window_secs: default_window_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CheckoutConfig {
    /// External product sold for `plan`.
    #[must_use]
    pub fn product(&self, plan: &str) -> Option<&str> {
        self.products
            .get(plan)
            .or(self.default_product.as_ref())
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}

fn default_url() -> String {
    "https://api.checkout.example.com".to_owned()
}

const fn default_window_secs() -> u64 {
    30 * 60
}

const fn default_timeout_secs() -> u64 {
    15
}
