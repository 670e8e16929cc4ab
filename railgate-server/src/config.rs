//! Server configuration.
//!
//! Loads a TOML file with `$VAR` / `${VAR}` references expanded from the
//! environment before parsing. A `.env` file, if present, is loaded first.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//!
//! [plans.monthly]
//! name = "Monthly"
//! price_usd = "10"
//! checkout_product = "prod_monthly"
//!
//! [bitcoin]
//! xpub = "$BTC_XPUB"
//!
//! [token.trc20]
//! address = "${USDT_TRC20_ADDRESS}"
//!
//! [sweeps]
//! assignments_secs = 600
//! records_secs = 1800
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path to the configuration file (default: `config.toml`)
//! - `HOST`: override the bind address
//! - `PORT`: override the port

use clap::Parser;
use railgate::pricing::{Plan, PlanCatalog};
use railgate::sweep::SweepSchedule;
use railgate_bitcoin::BitcoinConfig;
use railgate_checkout::CheckoutConfig;
use railgate_gateway::GatewayConfig;
use railgate_processor::ProcessorConfig;
use railgate_token::TokenConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "railgate-server")]
#[command(about = "Multi-rail payment server")]
struct CliArgs {
    /// Path to the TOML configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

/// Failures while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`ServerConfig`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port (default: `8080`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Sellable plans keyed by plan id.
    #[serde(default)]
    pub plans: HashMap<String, PlanConfig>,

    /// On-chain Bitcoin rail.
    #[serde(default)]
    pub bitcoin: BitcoinConfig,

    /// Lightning and Liquid through the payment gateway.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// USDT to fixed merchant addresses.
    #[serde(default)]
    pub token: TokenConfig,

    /// Stablecoin payment processor.
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Hosted card checkout.
    #[serde(default)]
    pub checkout: CheckoutConfig,

    /// Background sweep periods.
    #[serde(default)]
    pub sweeps: SweepConfig,
}

/// One `[plans.<id>]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Price in USD.
    pub price_usd: Decimal,
    /// Product sold through the hosted checkout for this plan.
    #[serde(default)]
    pub checkout_product: Option<String>,
}

/// `[sweeps]` periods in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Assignment eviction period.
    #[serde(default = "default_assignment_sweep_secs")]
    pub assignments_secs: u64,
    /// Record purge period.
    #[serde(default = "default_record_sweep_secs")]
    pub records_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            assignments_secs: default_assignment_sweep_secs(),
            records_secs: default_record_sweep_secs(),
        }
    }
}

impl From<SweepConfig> for SweepSchedule {
    fn from(config: SweepConfig) -> Self {
        Self {
            assignments: Duration::from_secs(config.assignments_secs.max(1)),
            records: Duration::from_secs(config.records_secs.max(1)),
        }
    }
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    8080
}

const fn default_assignment_sweep_secs() -> u64 {
    10 * 60
}

const fn default_record_sweep_secs() -> u64 {
    30 * 60
}

impl ServerConfig {
    /// Loads `.env`, then the file named by `--config` / `CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        let args = CliArgs::parse();
        Self::load_from(&args.config)
    }

    /// Loads configuration from `path`. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?
        } else {
            tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
            String::new()
        };
        let mut config = Self::parse(&content)?;

        if let Some(host) = std::env::var("HOST").ok().and_then(|h| h.parse().ok()) {
            config.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        Ok(config)
    }

    /// Parses TOML text after expanding environment references.
    ///
    /// # Errors
    ///
    /// Returns an error if the expanded text is not a valid configuration.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(&expand_env_vars(content))?;
        config.scrub_unresolved();
        config.merge_checkout_products();
        Ok(config)
    }

    /// The plan catalog handed to the router.
    #[must_use]
    pub fn plan_catalog(&self) -> PlanCatalog {
        PlanCatalog::new(
            self.plans
                .iter()
                .map(|(id, plan)| {
                    let entry = Plan {
                        name: plan.name.clone(),
                        price_usd: plan.price_usd,
                    };
                    (id.clone(), entry)
                })
                .collect::<HashMap<_, _>>(),
        )
    }

    fn merge_checkout_products(&mut self) {
        for (id, plan) in &self.plans {
            if let Some(product) = plan.checkout_product.as_ref().filter(|p| !p.is_empty()) {
                self.checkout
                    .products
                    .entry(id.clone())
                    .or_insert_with(|| product.clone());
            }
        }
    }

    /// Credentials left as `$VAR` mean the variable was not set; treat them
    /// as absent so the rail comes up unconfigured.
    fn scrub_unresolved(&mut self) {
        for value in [
            &mut self.bitcoin.xpub,
            &mut self.gateway.url,
            &mut self.gateway.api_key,
            &mut self.gateway.store_id,
            &mut self.gateway.webhook_secret,
            &mut self.token.trc20.address,
            &mut self.token.trc20.api_key,
            &mut self.token.erc20.address,
            &mut self.token.erc20.api_key,
            &mut self.processor.api_key,
            &mut self.processor.ipn_secret,
            &mut self.checkout.api_key,
            &mut self.checkout.webhook_secret,
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty() || v.starts_with('$')) {
                *value = None;
            }
        }
    }
}

/// Expands `$VAR` and `${VAR}` patterns from the environment.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.next_if_eq(&'{').is_some();

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        match std::env::var(&var_name) {
            Ok(value) if !var_name.is_empty() => result.push_str(&value),
            _ => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced && !var_name.is_empty() {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_unknown_variables_and_lone_dollars() {
        assert_eq!(
            expand_env_vars("a = \"$RAILGATE_SURELY_UNSET\" b = \"${RAILGATE_SURELY_UNSET}\" c = \"5$\""),
            "a = \"$RAILGATE_SURELY_UNSET\" b = \"${RAILGATE_SURELY_UNSET}\" c = \"5$\""
        );
    }

    #[test]
    fn expands_known_variables() {
        let path = std::env::var("PATH").unwrap();
        assert_eq!(expand_env_vars("p = \"$PATH\""), format!("p = \"{path}\""));
        assert_eq!(expand_env_vars("p = \"${PATH}/bin\""), format!("p = \"{path}/bin\""));
    }

    #[test]
    fn parses_sections_and_disables_unresolved_credentials() {
        let config = ServerConfig::parse(
            r#"
            port = 9000

            [plans.monthly]
            name = "Monthly"
            price_usd = "10"
            checkout_product = "prod_monthly"

            [plans.yearly]
            price_usd = 100

            [bitcoin]
            xpub = "$RAILGATE_SURELY_UNSET"

            [gateway]
            url = "https://pay.example.com"
            api_key = "key"
            store_id = "store"

            [token.trc20]
            address = "TA4Y62o6YC2Zsck9rZVGTvqW1AQ7X9zTnj"

            [sweeps]
            assignments_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.bitcoin.xpub, None);
        assert_eq!(config.gateway.api_key.as_deref(), Some("key"));
        assert_eq!(config.checkout.product("monthly"), Some("prod_monthly"));
        assert_eq!(config.checkout.product("yearly"), None);
        assert_eq!(config.token.window_secs, 1800);
        assert_eq!(config.sweeps.records_secs, 1800);
        assert_eq!(
            SweepSchedule::from(config.sweeps).assignments,
            Duration::from_secs(60)
        );

        let catalog = config.plan_catalog();
        assert_eq!(catalog.resolve_price("yearly", None).unwrap(), Decimal::from(100));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.plans.is_empty());
        assert_eq!(config.processor.pay_currencies, vec!["usdttrc20".to_owned()]);
    }
}
