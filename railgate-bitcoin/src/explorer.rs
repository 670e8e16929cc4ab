//! Esplora block explorer client.
//!
//! Endpoints used:
//!
//! - `GET /address/{address}`: funded totals (chain and mempool)
//! - `GET /address/{address}/txs`: recent transactions touching the address
//! - `GET /blocks/tip/height`: plain-text tip height

use async_trait::async_trait;
use railgate::UnixTimestamp;
use railgate::tolerance::Transfer;
use railgate_http::RestClient;
use serde::Deserialize;

use crate::error::BitcoinError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
struct FundingStats {
    #[serde(default)]
    funded_txo_sum: u64,
    #[serde(default)]
    tx_count: u64,
}

/// Address summary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressInfo {
    /// Address queried.
    pub address: String,
    #[serde(default)]
    chain_stats: FundingStats,
    #[serde(default)]
    mempool_stats: FundingStats,
}

impl AddressInfo {
    /// Satoshis ever received, confirmed or not.
    #[must_use]
    pub const fn total_received(&self) -> u64 {
        self.chain_stats
            .funded_txo_sum
            .saturating_add(self.mempool_stats.funded_txo_sum)
    }

    /// Whether the address has any history at all.
    #[must_use]
    pub const fn has_history(&self) -> bool {
        self.chain_stats.tx_count > 0 || self.mempool_stats.tx_count > 0
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TxStatus {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
    #[serde(default)]
    block_time: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TxOut {
    #[serde(default)]
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct Tx {
    txid: String,
    status: TxStatus,
    vout: Vec<TxOut>,
}

/// Something that can tell whether an address was ever paid.
#[async_trait]
pub trait AddressActivity: Send + Sync {
    /// Whether `address` has received any funds.
    ///
    /// # Errors
    ///
    /// Upstream failures.
    async fn has_received(&self, address: &str) -> Result<bool, BitcoinError>;
}

/// Esplora REST client.
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: RestClient,
}

impl EsploraClient {
    /// Wraps a client whose base URL is the Esplora API root.
    #[must_use]
    pub const fn new(client: RestClient) -> Self {
        Self { client }
    }

    /// Address summary.
    ///
    /// # Errors
    ///
    /// Upstream failures.
    pub async fn address(&self, address: &str) -> Result<AddressInfo, BitcoinError> {
        let url = self.client.url(&format!("address/{address}"))?;
        Ok(self.client.get_json(&url, "GET /address").await?)
    }

    /// Current chain tip height.
    ///
    /// # Errors
    ///
    /// Upstream failures or a non-numeric body.
    pub async fn tip_height(&self) -> Result<u64, BitcoinError> {
        let url = self.client.url("blocks/tip/height")?;
        let body = self.client.get_text(&url, "GET /blocks/tip/height").await?;
        body.trim()
            .parse()
            .map_err(|_| BitcoinError::InvalidTip(body.trim().to_owned()))
    }

    /// Incoming transfers to `address`, one per transaction, summing every
    /// output that pays it.
    ///
    /// Unconfirmed transactions are stamped with `now` and zero
    /// confirmations.
    ///
    /// # Errors
    ///
    /// Upstream failures.
    pub async fn transfers_to(&self, address: &str, now: UnixTimestamp) -> Result<Vec<Transfer>, BitcoinError> {
        let url = self.client.url(&format!("address/{address}/txs"))?;
        let txs: Vec<Tx> = self.client.get_json(&url, "GET /address/txs").await?;
        let needs_tip = txs.iter().any(|tx| tx.status.confirmed);
        let tip = if needs_tip { Some(self.tip_height().await?) } else { None };

        Ok(txs
            .into_iter()
            .filter_map(|tx| {
                let amount: u64 = tx
                    .vout
                    .iter()
                    .filter(|out| out.scriptpubkey_address.as_deref() == Some(address))
                    .map(|out| out.value)
                    .sum();
                if amount == 0 {
                    return None;
                }
                let (timestamp, confirmations) = match (tx.status.confirmed, tx.status.block_height, tip) {
                    (true, Some(height), Some(tip)) => (
                        tx.status.block_time.map_or(now, UnixTimestamp::from_secs),
                        tip.saturating_sub(height) + 1,
                    ),
                    _ => (now, 0),
                };
                Some(Transfer {
                    transaction_id: tx.txid,
                    amount,
                    timestamp,
                    confirmations: Some(confirmations),
                })
            })
            .collect())
    }
}

#[async_trait]
impl AddressActivity for EsploraClient {
    async fn has_received(&self, address: &str) -> Result<bool, BitcoinError> {
        let info = self.address(address).await?;
        Ok(info.total_received() > 0 || info.has_history())
    }
}
