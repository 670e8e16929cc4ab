//! USD/BTC price quotes with a single-slot TTL cache.
//!
//! A quote never fails: when the upstream is down the last known price is
//! returned marked stale, and before any successful fetch a configured
//! fallback floor is used instead.

use railgate::amount::SATS_PER_BTC;
use railgate_http::RestClient;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use url::Url;

use crate::error::BitcoinError;

/// A price to quote with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    /// US dollars per bitcoin.
    pub usd_per_btc: Decimal,
    /// Whether the price came from an expired cache entry or the fallback.
    pub stale: bool,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(rename = "USD")]
    usd: Decimal,
}

/// Cached price state.
#[derive(Clone, Copy, Debug)]
struct PriceCacheState {
    usd_per_btc: Decimal,
    fetched_at: Instant,
}

/// Fetches and caches the USD/BTC price.
#[derive(Debug)]
pub struct PriceCache {
    client: RestClient,
    url: Url,
    ttl: Duration,
    fallback: Decimal,
    state: RwLock<Option<PriceCacheState>>,
}

impl PriceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(client: RestClient, url: Url, ttl: Duration, fallback: Decimal) -> Self {
        Self {
            client,
            url,
            ttl,
            fallback,
            state: RwLock::new(None),
        }
    }

    /// The current price, fetching when the cached one has expired.
    pub async fn quote(&self) -> PriceQuote {
        let cached = *self.state.read().await;
        if let Some(state) = cached
            && state.fetched_at.elapsed() < self.ttl
        {
            return PriceQuote {
                usd_per_btc: state.usd_per_btc,
                stale: false,
            };
        }

        match self.fetch().await {
            Ok(usd_per_btc) => {
                *self.state.write().await = Some(PriceCacheState {
                    usd_per_btc,
                    fetched_at: Instant::now(),
                });
                tracing::debug!(%usd_per_btc, "btc price refreshed");
                PriceQuote {
                    usd_per_btc,
                    stale: false,
                }
            }
            Err(err) => {
                let usd_per_btc = cached.map_or(self.fallback, |state| state.usd_per_btc);
                tracing::warn!(%err, %usd_per_btc, "btc price fetch failed, quoting stale price");
                PriceQuote {
                    usd_per_btc,
                    stale: true,
                }
            }
        }
    }

    async fn fetch(&self) -> Result<Decimal, BitcoinError> {
        let response: PriceResponse = self.client.get_json(&self.url, "GET prices").await?;
        if response.usd <= Decimal::ZERO {
            return Err(BitcoinError::InvalidPrice(response.usd.to_string()));
        }
        Ok(response.usd)
    }
}

/// Satoshis needed to pay `usd` at `usd_per_btc`, rounded up.
///
/// # Errors
///
/// [`BitcoinError::InvalidPrice`] for a non-positive price or an amount
/// that does not fit in `u64` satoshis.
pub fn usd_to_sats(usd: Decimal, usd_per_btc: Decimal) -> Result<u64, BitcoinError> {
    if usd_per_btc <= Decimal::ZERO {
        return Err(BitcoinError::InvalidPrice(usd_per_btc.to_string()));
    }
    usd.checked_mul(Decimal::from(SATS_PER_BTC))
        .and_then(|scaled| scaled.checked_div(usd_per_btc))
        .map(|sats| sats.ceil())
        .and_then(|sats| sats.to_u64())
        .ok_or_else(|| BitcoinError::InvalidPrice(format!("{usd} USD at {usd_per_btc}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use railgate::Rail;
    use serde_json::json;
    use std::str::FromStr;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cache(server: &MockServer, ttl: Duration) -> PriceCache {
        let client = RestClient::try_new(Rail::Bitcoin, &server.uri()).unwrap();
        let url = Url::parse(&format!("{}/v1/prices", server.uri())).unwrap();
        PriceCache::new(client, url, ttl, Decimal::from(50_000))
    }

    #[test]
    fn ten_dollars_at_hundred_thousand_is_ten_thousand_sats() {
        let sats = usd_to_sats(Decimal::from(10), Decimal::from(100_000)).unwrap();
        assert_eq!(sats, 10_000);

        let odd = usd_to_sats(Decimal::from(29), Decimal::from_str("65432.10").unwrap()).unwrap();
        assert_eq!(odd, 44_321);
        assert!(usd_to_sats(Decimal::TEN, Decimal::ZERO).is_err());
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"time": 1, "USD": 100_000, "EUR": 92_000})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache(&server, Duration::from_secs(300));
        let first = cache.quote().await;
        let second = cache.quote().await;
        assert_eq!(first.usd_per_btc, Decimal::from(100_000));
        assert!(!first.stale);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failure_returns_last_price_marked_stale() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"USD": 64_000})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/prices"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let cache = cache(&server, Duration::ZERO);
        assert!(!cache.quote().await.stale);
        let quote = cache.quote().await;
        assert!(quote.stale);
        assert_eq!(quote.usd_per_btc, Decimal::from(64_000));
    }

    #[tokio::test]
    async fn first_failure_returns_fallback_floor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/prices"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let quote = cache(&server, Duration::from_secs(300)).quote().await;
        assert!(quote.stale);
        assert_eq!(quote.usd_per_btc, Decimal::from(50_000));
    }
}
