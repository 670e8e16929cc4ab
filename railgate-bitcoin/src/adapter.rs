//! On-chain bitcoin rail.
//!
//! Each buyer gets a freshly derived receive address, leased for the
//! reuse window and released once its record settles or is dropped.
//! Settlement polls Esplora for transfers to that address and requires
//! `min_confirmations` before a match counts as paid.

use async_trait::async_trait;
use railgate::adapter::RailAdapter;
use railgate::amount::from_minor_units;
use railgate::assignment::{Assignment, AssignmentCache, AssignmentKey, AssignmentProbe, ProbeOutcome, Reuse};
use railgate::proto::{
    BitcoinPayload, RailPayload, RailPayment, RailRequest, SettlementStatus, StatusQuery, StatusReport,
};
use railgate::tolerance::{
    MatchContext, MatchOutcome, PAYMENT_EXPIRY_SECS, Tolerance, Transfer, TransferMatcher, UsedTransactions,
};
use railgate::{PaymentMethod, Rail, RailError, Result, UnixTimestamp};
use railgate_http::RestClient;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::BitcoinConfig;
use crate::derivation::{AddressAllocator, AddressDeriver};
use crate::error::BitcoinError;
use crate::explorer::{AddressActivity, EsploraClient};
use crate::price::{PriceCache, usd_to_sats};

/// Reused quotes may drift this far from a fresh one before a new address is
/// minted.
const REUSE_DRIFT_BASIS_POINTS: u32 = 100;

/// Live wallet state, present only when an extended key is configured.
#[derive(Debug)]
struct Wallet {
    allocator: AddressAllocator,
    explorer: Arc<EsploraClient>,
    prices: PriceCache,
}

/// On-chain Bitcoin rail.
///
/// Each assignment leases one HD-derived address; payment is detected by
/// polling the explorer for outputs paying that address.
#[derive(Debug)]
pub struct BitcoinRail {
    wallet: Option<Wallet>,
    cache: AssignmentCache<BitcoinPayload>,
    used: UsedTransactions,
    matcher: TransferMatcher,
    min_confirmations: u64,
}

impl BitcoinRail {
    /// Builds the rail from configuration. Without an `xpub` the rail is
    /// unconfigured.
    ///
    /// # Errors
    ///
    /// An undecodable key, unknown network, or malformed URL.
    pub fn new(config: &BitcoinConfig) -> Result<Self, BitcoinError> {
        let wallet = match config.xpub.as_deref().map(str::trim).filter(|x| !x.is_empty()) {
            Some(xpub) => Some(Self::wallet(config, xpub)?),
            None => None,
        };
        Ok(Self {
            wallet,
            cache: AssignmentCache::new("bitcoin", Duration::from_secs(config.window_secs))
                .with_drift_basis_points(REUSE_DRIFT_BASIS_POINTS),
            used: UsedTransactions::new(),
            matcher: TransferMatcher::new(Tolerance::BITCOIN),
            min_confirmations: config.min_confirmations,
        })
    }

    /// A rail that reports itself unconfigured.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            wallet: None,
            cache: AssignmentCache::new("bitcoin", railgate::assignment::DEFAULT_WINDOW),
            used: UsedTransactions::new(),
            matcher: TransferMatcher::new(Tolerance::BITCOIN),
            min_confirmations: 1,
        }
    }

    fn wallet(config: &BitcoinConfig, xpub: &str) -> Result<Wallet, BitcoinError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let deriver = AddressDeriver::new(xpub, &config.network)?;
        let explorer = Arc::new(EsploraClient::new(
            RestClient::try_new(Rail::Bitcoin, &config.explorer_url)?.with_timeout(timeout),
        ));
        let price_url = Url::parse(&config.price_url).map_err(|source| railgate_http::RestClientError::UrlParse {
            context: "Failed to parse price url",
            source,
        })?;
        let prices = PriceCache::new(
            RestClient::try_new(Rail::Bitcoin, &config.price_url)?.with_timeout(timeout),
            price_url,
            Duration::from_secs(config.price_ttl_secs),
            config.fallback_usd_per_btc,
        );
        let activity: Arc<dyn AddressActivity> = explorer.clone();
        Ok(Wallet {
            allocator: AddressAllocator::new(deriver, activity, config.gap_limit),
            explorer,
            prices,
        })
    }

    fn configured(&self) -> Result<&Wallet> {
        self.wallet.as_ref().ok_or(RailError::NotConfigured(Rail::Bitcoin))
    }

    /// Used-transaction set of this rail.
    #[must_use]
    pub const fn used_transactions(&self) -> &UsedTransactions {
        &self.used
    }

    /// Number of live assignments.
    #[must_use]
    pub fn assignments(&self) -> usize {
        self.cache.len()
    }

    fn release(&self, address: &str) {
        if let Some(wallet) = &self.wallet {
            wallet.allocator.release(address);
        }
    }
}

#[async_trait]
impl AssignmentProbe<BitcoinPayload> for BitcoinRail {
    async fn probe(&self, assignment: &Assignment<BitcoinPayload>) -> ProbeOutcome {
        let Some(wallet) = &self.wallet else {
            return ProbeOutcome::Unavailable("bitcoin rail is not configured".to_owned());
        };
        match wallet.explorer.has_received(&assignment.payload.address).await {
            Ok(true) => ProbeOutcome::Settled,
            Ok(false) => ProbeOutcome::Unpaid,
            Err(err) => ProbeOutcome::Unavailable(err.to_string()),
        }
    }
}

#[async_trait]
impl RailAdapter for BitcoinRail {
    fn rail(&self) -> Rail {
        Rail::Bitcoin
    }

    fn is_configured(&self) -> bool {
        self.wallet.is_some()
    }

    fn supports(&self, method: PaymentMethod, network: &str) -> bool {
        method == PaymentMethod::Bitcoin && network == method.default_network() && self.is_configured()
    }

    #[tracing::instrument(name = "railgate.bitcoin.create", skip_all, fields(payment_id = %request.payment_id))]
    async fn create_payment(&self, request: &RailRequest) -> Result<RailPayment> {
        let wallet = self.configured()?;
        let quote = wallet.prices.quote().await;
        let amount_sats = usd_to_sats(request.amount_usd, quote.usd_per_btc)?;
        let amount_btc = from_minor_units(amount_sats, 8)?;
        let now = UnixTimestamp::now();

        let key = AssignmentKey::new(&request.email, &request.plan, &request.network);
        let _guard = self.cache.lock(&key).await;
        match self.cache.get(&key, amount_btc, self).await {
            Reuse::Reused(assignment) => {
                let mut payload = assignment.payload;
                payload.expires_at = now + PAYMENT_EXPIRY_SECS;
                return Ok(RailPayment::reused(RailPayload::Bitcoin(payload)));
            }
            Reuse::Evicted(assignment, _) => self.release(&assignment.correlation_id),
            Reuse::Miss => {}
        }

        let (derivation_index, address) = wallet.allocator.allocate().await?;
        let payload = BitcoinPayload {
            address: address.clone(),
            derivation_index,
            amount_sats,
            usd_per_btc: quote.usd_per_btc,
            price_stale: quote.stale,
            issued_at: now,
            expires_at: now + PAYMENT_EXPIRY_SECS,
        };
        self.cache.put(key, address.clone(), amount_btc, payload.clone(), now);
        tracing::info!(%address, derivation_index, amount_sats, price_stale = quote.stale, "bitcoin address assigned");
        Ok(RailPayment::minted(RailPayload::Bitcoin(payload)))
    }

    #[tracing::instrument(name = "railgate.bitcoin.status", skip_all, fields(payment_id = %query.payment_id))]
    async fn check_status(&self, query: &StatusQuery) -> Result<StatusReport> {
        let RailPayload::Bitcoin(payload) = &query.payload else {
            return Err(RailError::InvalidRequest("not a bitcoin payload".into()));
        };
        let wallet = self.configured()?;
        let now = UnixTimestamp::now();
        let transfers = wallet.explorer.transfers_to(&payload.address, now).await?;
        let ctx = MatchContext::new(&query.payment_id, payload.amount_sats, query.created_at, now)
            .with_window_start(payload.issued_at);

        // A deep enough match wins even when a shallower one is listed first.
        let deep: Vec<Transfer> = transfers
            .iter()
            .filter(|t| t.confirmations.unwrap_or(0) >= self.min_confirmations)
            .cloned()
            .collect();
        if let MatchOutcome::Confirmed(transfer) = self.matcher.settle(&deep, &ctx, &self.used) {
            tracing::info!(address = %payload.address, txid = %transfer.transaction_id, sats = transfer.amount, "bitcoin payment confirmed");
            return Ok(StatusReport::confirmed(transfer.transaction_id).with_confirmations(transfer.confirmations));
        }

        Ok(match self.matcher.peek(&transfers, &ctx, &self.used) {
            MatchOutcome::Confirmed(transfer) => {
                let confirmations = transfer.confirmations.unwrap_or(0);
                tracing::debug!(txid = %transfer.transaction_id, confirmations, "awaiting confirmations");
                StatusReport::pending()
                    .with_txid(transfer.transaction_id)
                    .with_confirmations(Some(confirmations))
            }
            MatchOutcome::Mismatched(transfer) => {
                let violation = RailError::ToleranceViolation {
                    expected: format!("{} sats", payload.amount_sats),
                    received: format!("{} sats", transfer.amount),
                };
                let received = from_minor_units(transfer.amount, 8)?;
                StatusReport::new(SettlementStatus::Mismatched)
                    .with_txid(transfer.transaction_id)
                    .with_confirmations(transfer.confirmations)
                    .with_received(format!("{received} BTC"))
                    .with_detail(violation.to_string())
            }
            MatchOutcome::Pending => StatusReport::pending(),
            MatchOutcome::Expired => StatusReport::new(SettlementStatus::Expired),
        })
    }

    async fn mark_used(&self, payload: &RailPayload, _email: Option<&str>) {
        if let RailPayload::Bitcoin(payload) = payload {
            let evicted = self.cache.evict_correlation(&payload.address);
            self.release(&payload.address);
            tracing::debug!(address = %payload.address, evicted = evicted.len(), "bitcoin address retired");
        }
    }

    fn evict_stale(&self) -> usize {
        let evicted = self.cache.evict_stale();
        for assignment in &evicted {
            self.release(&assignment.correlation_id);
        }
        evicted.len()
    }
}
