//! USDT transfers on TRON and Ethereum, watched through public explorers.

use async_trait::async_trait;
use railgate::adapter::RailAdapter;
use railgate::amount::{from_minor_units, to_minor_units};
use railgate::assignment::{
    Assignment, AssignmentCache, AssignmentKey, AssignmentProbe, ProbeOutcome, Reuse, normalize_identity,
};
use railgate::proto::{
    RailPayload, RailPayment, RailRequest, SettlementStatus, StatusQuery, StatusReport, TokenPayload,
};
use railgate::tolerance::{
    CLOCK_SKEW_SECS, MatchContext, MatchOutcome, PAYMENT_EXPIRY_SECS, Tolerance, Transfer, TransferMatcher,
    UsedTransactions,
};
use railgate::{PaymentMethod, Rail, RailError, Result, UnixTimestamp};
use railgate_http::RestClient;
use std::sync::Arc;
use std::time::Duration;

use crate::address::{validate_ethereum, validate_tron};
use crate::config::{TokenConfig, TokenNetworkConfig};
use crate::error::TokenError;
use crate::source::{EtherscanSource, TransferSource, TronGridSource};

/// USDT decimals on both networks.
pub const USDT_DECIMALS: u32 = 6;

const TRONGRID_URL: &str = "https://api.trongrid.io";
const TRC20_USDT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
const ETHERSCAN_URL: &str = "https://api.etherscan.io/v2";
const ERC20_USDT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

/// One token network: its receiving address, explorer, cache and
/// used-transaction set.
#[derive(Debug)]
struct TokenNetwork {
    name: &'static str,
    address: String,
    contract: String,
    source: Arc<dyn TransferSource>,
    cache: AssignmentCache<TokenPayload>,
    used: UsedTransactions,
    matcher: TransferMatcher,
}

impl TokenNetwork {
    fn trc20(config: &TokenNetworkConfig, address: &str, window: Duration, timeout: Duration) -> Result<Self, TokenError> {
        let address = validate_tron(address)?;
        let contract = validate_tron(config.contract.as_deref().unwrap_or(TRC20_USDT))?;
        let mut client = RestClient::try_new(Rail::Token, config.api_url.as_deref().unwrap_or(TRONGRID_URL))?
            .with_timeout(timeout);
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            client = client.with_header("TRON-PRO-API-KEY", key)?;
        }
        Ok(Self::new(
            "trc20",
            address,
            contract.clone(),
            Arc::new(TronGridSource::new(client, contract)),
            window,
        ))
    }

    fn erc20(config: &TokenNetworkConfig, address: &str, window: Duration, timeout: Duration) -> Result<Self, TokenError> {
        let address = validate_ethereum(address)?;
        let contract = validate_ethereum(config.contract.as_deref().unwrap_or(ERC20_USDT))?;
        let client = RestClient::try_new(Rail::Token, config.api_url.as_deref().unwrap_or(ETHERSCAN_URL))?
            .with_timeout(timeout);
        let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
        let source = EtherscanSource::new(client, contract.clone(), config.chain_id.unwrap_or(1), api_key);
        Ok(Self::new("erc20", address, contract, Arc::new(source), window))
    }

    fn new(
        name: &'static str,
        address: String,
        contract: String,
        source: Arc<dyn TransferSource>,
        window: Duration,
    ) -> Self {
        Self {
            name,
            address,
            contract,
            source,
            cache: AssignmentCache::new(name, window),
            used: UsedTransactions::new(),
            matcher: TransferMatcher::new(Tolerance::STABLECOIN),
        }
    }

    async fn transfers(&self, since: UnixTimestamp) -> Result<Vec<Transfer>, TokenError> {
        self.source.incoming(&self.address, since - CLOCK_SKEW_SECS).await
    }
}

#[async_trait]
impl AssignmentProbe<TokenPayload> for TokenNetwork {
    async fn probe(&self, assignment: &Assignment<TokenPayload>) -> ProbeOutcome {
        let payload = &assignment.payload;
        let transfers = match self.transfers(payload.issued_at).await {
            Ok(transfers) => transfers,
            Err(err) => return ProbeOutcome::Unavailable(err.to_string()),
        };
        // Expiry is not the probe's concern: measure it from now.
        let now = UnixTimestamp::now();
        let ctx = MatchContext::new(assignment.key.identity(), payload.amount_units, now, now)
            .with_window_start(payload.issued_at);
        match self.matcher.peek(&transfers, &ctx, &self.used) {
            MatchOutcome::Confirmed(_) => ProbeOutcome::Settled,
            MatchOutcome::Expired => ProbeOutcome::Terminal,
            MatchOutcome::Mismatched(_) | MatchOutcome::Pending => ProbeOutcome::Unpaid,
        }
    }
}

/// USDT sent straight to a fixed merchant address on TRC20 or ERC20.
///
/// The address is shared by every caller, so a payment is told apart only by
/// its amount and time window.
#[derive(Debug)]
pub struct TokenRail {
    trc20: Option<TokenNetwork>,
    erc20: Option<TokenNetwork>,
}

impl TokenRail {
    /// Builds the rail. Networks without an address are not offered.
    ///
    /// # Errors
    ///
    /// An invalid receiving or contract address, or a malformed URL.
    pub fn new(config: &TokenConfig) -> Result<Self, TokenError> {
        let window = Duration::from_secs(config.window_secs);
        let timeout = Duration::from_secs(config.timeout_secs);
        let trc20 = match non_blank(config.trc20.address.as_deref()) {
            Some(address) => Some(TokenNetwork::trc20(&config.trc20, address, window, timeout)?),
            None => None,
        };
        let erc20 = match non_blank(config.erc20.address.as_deref()) {
            Some(address) => Some(TokenNetwork::erc20(&config.erc20, address, window, timeout)?),
            None => None,
        };
        Ok(Self { trc20, erc20 })
    }

    /// A rail offering no network.
    #[must_use]
    pub const fn unconfigured() -> Self {
        Self {
            trc20: None,
            erc20: None,
        }
    }

    fn network(&self, name: &str) -> Option<&TokenNetwork> {
        match name {
            "trc20" => self.trc20.as_ref(),
            "erc20" => self.erc20.as_ref(),
            _ => None,
        }
    }

    fn networks(&self) -> impl Iterator<Item = &TokenNetwork> {
        self.trc20.iter().chain(self.erc20.iter())
    }

    /// Used-transaction set of `network`.
    #[must_use]
    pub fn used_transactions(&self, network: &str) -> Option<&UsedTransactions> {
        self.network(network).map(|n| &n.used)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[async_trait]
impl RailAdapter for TokenRail {
    fn rail(&self) -> Rail {
        Rail::Token
    }

    fn is_configured(&self) -> bool {
        self.trc20.is_some() || self.erc20.is_some()
    }

    fn supports(&self, method: PaymentMethod, network: &str) -> bool {
        method == PaymentMethod::Usdt && self.network(network).is_some()
    }

    #[tracing::instrument(name = "railgate.token.create", skip_all, fields(payment_id = %request.payment_id, network = %request.network))]
    async fn create_payment(&self, request: &RailRequest) -> Result<RailPayment> {
        let network = self.network(&request.network).ok_or_else(|| RailError::UnknownNetwork {
            method: request.method.to_string(),
            network: request.network.clone(),
        })?;
        let amount_units = to_minor_units(request.amount_usd, USDT_DECIMALS)?;
        let amount = from_minor_units(amount_units, USDT_DECIMALS)?;
        let now = UnixTimestamp::now();

        let key = AssignmentKey::new(&request.email, &request.plan, &request.network);
        let _guard = network.cache.lock(&key).await;
        if let Reuse::Reused(assignment) = network.cache.get(&key, amount, network).await {
            let mut payload = assignment.payload;
            payload.expires_at = now + PAYMENT_EXPIRY_SECS;
            return Ok(RailPayment::reused(RailPayload::Token(payload)));
        }

        let payload = TokenPayload {
            network: network.name.to_owned(),
            address: network.address.clone(),
            contract: network.contract.clone(),
            amount_units,
            decimals: USDT_DECIMALS,
            issued_at: now,
            expires_at: now + PAYMENT_EXPIRY_SECS,
        };
        network
            .cache
            .put(key, network.address.clone(), amount, payload.clone(), now);
        tracing::info!(network = network.name, amount_units, "usdt quote issued");
        Ok(RailPayment::minted(RailPayload::Token(payload)))
    }

    #[tracing::instrument(name = "railgate.token.status", skip_all, fields(payment_id = %query.payment_id))]
    async fn check_status(&self, query: &StatusQuery) -> Result<StatusReport> {
        let RailPayload::Token(payload) = &query.payload else {
            return Err(RailError::InvalidRequest("not a token payload".into()));
        };
        let network = self
            .network(&payload.network)
            .ok_or(RailError::NotConfigured(Rail::Token))?;
        let now = UnixTimestamp::now();
        let ctx = MatchContext::new(&query.payment_id, payload.amount_units, query.created_at, now)
            .with_window_start(payload.issued_at);
        let transfers = network.transfers(ctx.since).await?;

        Ok(match network.matcher.settle(&transfers, &ctx, &network.used) {
            MatchOutcome::Confirmed(transfer) => {
                tracing::info!(network = network.name, txid = %transfer.transaction_id, units = transfer.amount, "usdt payment confirmed");
                StatusReport::confirmed(transfer.transaction_id).with_confirmations(transfer.confirmations)
            }
            MatchOutcome::Mismatched(transfer) => {
                let expected = from_minor_units(payload.amount_units, payload.decimals)?;
                let received = from_minor_units(transfer.amount, payload.decimals)?;
                let violation = RailError::ToleranceViolation {
                    expected: format!("{expected} USDT"),
                    received: format!("{received} USDT"),
                };
                StatusReport::new(SettlementStatus::Mismatched)
                    .with_txid(transfer.transaction_id)
                    .with_received(format!("{received} USDT"))
                    .with_detail(violation.to_string())
            }
            MatchOutcome::Pending => StatusReport::pending(),
            MatchOutcome::Expired => StatusReport::new(SettlementStatus::Expired),
        })
    }

    async fn mark_used(&self, payload: &RailPayload, email: Option<&str>) {
        let RailPayload::Token(payload) = payload else {
            return;
        };
        let Some(network) = self.network(&payload.network) else {
            return;
        };
        let identity = email.map(normalize_identity);
        let evicted = network.cache.evict_if(|assignment| {
            assignment.payload.issued_at == payload.issued_at
                && assignment.payload.amount_units == payload.amount_units
                && identity
                    .as_deref()
                    .is_none_or(|identity| assignment.key.identity() == identity)
        });
        tracing::debug!(network = network.name, evicted = evicted.len(), "usdt quote retired");
    }

    fn evict_stale(&self) -> usize {
        self.networks().map(|n| n.cache.evict_stale().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TRON: &str = "TA4Y62o6YC2Zsck9rZVGTvqW1AQ7X9zTnj";
    const ETH: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";

    fn config(server: &MockServer) -> TokenConfig {
        TokenConfig {
            trc20: TokenNetworkConfig {
                address: Some(TRON.to_owned()),
                api_url: Some(server.uri()),
                api_key: Some("tron-key".to_owned()),
                ..TokenNetworkConfig::default()
            },
            erc20: TokenNetworkConfig {
                address: Some(ETH.to_ascii_lowercase()),
                api_url: Some(format!("{}/v2", server.uri())),
                ..TokenNetworkConfig::default()
            },
            window_secs: 1800,
            timeout_secs: 5,
        }
    }

    fn request(payment_id: &str, email: &str, network: &str, usd: i64) -> RailRequest {
        RailRequest {
            payment_id: payment_id.to_owned(),
            email: email.to_owned(),
            plan: "monthly".to_owned(),
            method: PaymentMethod::Usdt,
            network: network.to_owned(),
            amount_usd: Decimal::from(usd),
        }
    }

    async fn tron_transfers(server: &MockServer, transfers: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/accounts/{TRON}/transactions/trc20")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": transfers})))
            .mount(server)
            .await;
    }

    fn query(payment_id: &str, payment: &RailPayment) -> StatusQuery {
        StatusQuery {
            payment_id: payment_id.to_owned(),
            payload: payment.payload.clone(),
            created_at: payment.payload.issued_at(),
        }
    }

    #[tokio::test]
    async fn quotes_reuse_per_caller_and_network() {
        let server = MockServer::start().await;
        let rail = TokenRail::new(&config(&server)).unwrap();
        assert!(rail.supports(PaymentMethod::Usdt, "trc20"));
        assert!(rail.supports(PaymentMethod::Usdt, "erc20"));
        assert!(!rail.supports(PaymentMethod::Usdt, "bep20"));

        let first = rail.create_payment(&request("p1", "a@example.com", "trc20", 10)).await.unwrap();
        let again = rail.create_payment(&request("p2", "a@example.com", "trc20", 10)).await.unwrap();
        let erc = rail.create_payment(&request("p3", "a@example.com", "erc20", 10)).await.unwrap();
        assert!(!first.reused);
        assert!(again.reused);
        assert!(!erc.reused);
        let RailPayload::Token(erc) = erc.payload else {
            panic!("expected token payload");
        };
        assert_eq!(erc.address, ETH);
        assert_eq!(erc.amount_units, 10_000_000);
    }

    #[tokio::test]
    async fn one_cent_tolerance_and_single_credit() {
        let server = MockServer::start().await;
        let now_ms = UnixTimestamp::now().as_secs() * 1000;
        tron_transfers(
            &server,
            json!([{"transaction_id": "t1", "block_timestamp": now_ms, "to": TRON, "value": "9990000"}]),
        )
        .await;
        let rail = TokenRail::new(&config(&server)).unwrap();

        let a = rail.create_payment(&request("p1", "a@example.com", "trc20", 10)).await.unwrap();
        let b = rail.create_payment(&request("p2", "b@example.com", "trc20", 10)).await.unwrap();

        let report = rail.check_status(&query("p1", &a)).await.unwrap();
        assert_eq!(report.status, SettlementStatus::Confirmed);
        assert_eq!(report.txid.as_deref(), Some("t1"));

        let second = rail.check_status(&query("p2", &b)).await.unwrap();
        assert_eq!(second.status, SettlementStatus::Pending);
        assert_eq!(
            rail.used_transactions("trc20").unwrap().claimant("t1").as_deref(),
            Some("p1")
        );
    }

    #[tokio::test]
    async fn short_transfer_is_mismatched() {
        let server = MockServer::start().await;
        let now_ms = UnixTimestamp::now().as_secs() * 1000;
        tron_transfers(
            &server,
            json!([{"transaction_id": "t1", "block_timestamp": now_ms, "to": TRON, "value": "9989999"}]),
        )
        .await;
        let rail = TokenRail::new(&config(&server)).unwrap();
        let payment = rail.create_payment(&request("p1", "a@example.com", "trc20", 10)).await.unwrap();

        let report = rail.check_status(&query("p1", &payment)).await.unwrap();
        assert_eq!(report.status, SettlementStatus::Mismatched);
        assert_eq!(report.received.as_deref(), Some("9.989999 USDT"));
    }

    #[tokio::test]
    async fn mark_used_retires_only_that_callers_quote() {
        let server = MockServer::start().await;
        let rail = TokenRail::new(&config(&server)).unwrap();
        let a = rail.create_payment(&request("p1", "a@example.com", "trc20", 10)).await.unwrap();
        rail.create_payment(&request("p2", "b@example.com", "trc20", 10)).await.unwrap();

        rail.mark_used(&a.payload, Some("a@example.com")).await;
        let b_again = rail.create_payment(&request("p3", "b@example.com", "trc20", 10)).await.unwrap();
        assert!(b_again.reused);
        let a_again = rail.create_payment(&request("p4", "a@example.com", "trc20", 10)).await.unwrap();
        assert!(!a_again.reused);
    }

    #[test]
    fn validates_addresses_at_construction() {
        let mut config = TokenConfig::default();
        config.trc20.address = Some("TA4Y62o6YC2Zsck9rZVGTvqW1AQ7X9zTnk".to_owned());
        assert!(matches!(
            TokenRail::new(&config),
            Err(TokenError::InvalidAddress { network: "trc20", .. })
        ));

        let empty = TokenRail::new(&TokenConfig::default()).unwrap();
        assert!(!empty.is_configured());
    }
}
