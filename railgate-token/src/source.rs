//! Token transfer sources: TronGrid for TRC20, Etherscan for ERC20.

use async_trait::async_trait;
use railgate::UnixTimestamp;
use railgate::amount::parse_minor_units;
use railgate::tolerance::Transfer;
use railgate_http::RestClient;
use serde::Deserialize;
use serde_json::Value;
use serde_with::{VecSkipError, serde_as};
use std::fmt::Debug;

use crate::error::TokenError;

/// Something that lists token transfers received by an address.
#[async_trait]
pub trait TransferSource: Debug + Send + Sync {
    /// Incoming transfers of the configured token to `address`, at or after
    /// `since` where the explorer supports filtering.
    ///
    /// # Errors
    ///
    /// Explorer failures.
    async fn incoming(&self, address: &str, since: UnixTimestamp) -> Result<Vec<Transfer>, TokenError>;
}

fn minor_units(raw: &str) -> Result<u64, TokenError> {
    parse_minor_units(raw).map_err(|_| TokenError::InvalidValue(raw.to_owned()))
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct TronGridPage {
    // Entries TronGrid returns without a value or recipient are not transfers we can match.
    #[serde(default)]
    #[serde_as(as = "VecSkipError<_>")]
    data: Vec<TronGridTransfer>,
}

#[derive(Debug, Deserialize)]
struct TronGridTransfer {
    transaction_id: String,
    block_timestamp: u64,
    to: String,
    value: String,
}

/// TronGrid `v1/accounts/{address}/transactions/trc20`.
#[derive(Debug, Clone)]
pub struct TronGridSource {
    client: RestClient,
    contract: String,
}

impl TronGridSource {
    /// Creates a source for TRC20 `contract`.
    #[must_use]
    pub fn new(client: RestClient, contract: impl Into<String>) -> Self {
        Self {
            client,
            contract: contract.into(),
        }
    }
}

#[async_trait]
impl TransferSource for TronGridSource {
    async fn incoming(&self, address: &str, since: UnixTimestamp) -> Result<Vec<Transfer>, TokenError> {
        let min_timestamp = (since.as_secs() * 1000).to_string();
        let url = self.client.url_with_query(
            &format!("v1/accounts/{address}/transactions/trc20"),
            &[
                ("only_to", "true"),
                ("only_confirmed", "true"),
                ("limit", "50"),
                ("contract_address", &self.contract),
                ("min_timestamp", &min_timestamp),
            ],
        )?;
        let page: TronGridPage = self.client.get_json(&url, "GET trc20 transfers").await?;
        page.data
            .into_iter()
            .filter(|t| t.to == address)
            .map(|t| {
                Ok(Transfer {
                    amount: minor_units(&t.value)?,
                    transaction_id: t.transaction_id,
                    timestamp: UnixTimestamp::from_millis(t.block_timestamp),
                    confirmations: None,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtherscanTransfer {
    hash: String,
    time_stamp: UnixTimestamp,
    to: String,
    value: String,
    #[serde(default)]
    confirmations: Option<String>,
}

/// Etherscan v2 `api?module=account&action=tokentx`, relative to a base
/// such as `https://api.etherscan.io/v2`.
#[derive(Debug, Clone)]
pub struct EtherscanSource {
    client: RestClient,
    contract: String,
    chain_id: u64,
    api_key: Option<String>,
}

impl EtherscanSource {
    /// Creates a source for ERC20 `contract` on `chain_id`.
    #[must_use]
    pub fn new(client: RestClient, contract: impl Into<String>, chain_id: u64, api_key: Option<String>) -> Self {
        Self {
            client,
            contract: contract.into(),
            chain_id,
            api_key,
        }
    }
}

#[async_trait]
impl TransferSource for EtherscanSource {
    async fn incoming(&self, address: &str, _since: UnixTimestamp) -> Result<Vec<Transfer>, TokenError> {
        let chain_id = self.chain_id.to_string();
        let mut query = vec![
            ("chainid", chain_id.as_str()),
            ("module", "account"),
            ("action", "tokentx"),
            ("contractaddress", self.contract.as_str()),
            ("address", address),
            ("page", "1"),
            ("offset", "100"),
            ("sort", "desc"),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }
        let url = self.client.url_with_query("api", &query)?;
        let response: EtherscanResponse = self.client.get_json(&url, "GET tokentx").await?;

        if response.status != "1" {
            if response.message.starts_with("No transactions found") {
                return Ok(Vec::new());
            }
            let detail = response.result.as_str().unwrap_or_default();
            return Err(TokenError::Explorer(format!("{} {detail}", response.message).trim().to_owned()));
        }

        let transfers: Vec<EtherscanTransfer> = serde_json::from_value(response.result)
            .map_err(|e| TokenError::Explorer(e.to_string()))?;
        transfers
            .into_iter()
            .filter(|t| t.to.eq_ignore_ascii_case(address))
            .map(|t| {
                let confirmations = t.confirmations.as_deref().and_then(|c| c.parse().ok());
                Ok(Transfer {
                    amount: minor_units(&t.value)?,
                    transaction_id: t.hash,
                    timestamp: t.time_stamp,
                    confirmations,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railgate::Rail;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TRON: &str = "TA4Y62o6YC2Zsck9rZVGTvqW1AQ7X9zTnj";
    const TRON_USDT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
    const ETH: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";

    #[tokio::test]
    async fn trongrid_filters_and_converts_millis() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/accounts/{TRON}/transactions/trc20")))
            .and(query_param("only_to", "true"))
            .and(query_param("contract_address", TRON_USDT))
            .and(query_param("min_timestamp", "1700000000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [
                    {"transaction_id": "t1", "block_timestamp": 1_700_000_123_000_u64, "to": TRON, "value": "10000000",
                     "token_info": {"symbol": "USDT", "decimals": 6}},
                    {"transaction_id": "t2", "block_timestamp": 1_700_000_200_000_u64, "to": "TOther", "value": "5"},
                    {"transaction_id": "t3", "block_timestamp": 1_700_000_300_000_u64, "type": "Approval"}
                ]
            })))
            .mount(&server)
            .await;

        let source = TronGridSource::new(RestClient::try_new(Rail::Token, &server.uri()).unwrap(), TRON_USDT);
        let transfers = source
            .incoming(TRON, UnixTimestamp::from_secs(1_700_000_000))
            .await
            .unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount, 10_000_000);
        assert_eq!(transfers[0].timestamp, UnixTimestamp::from_secs(1_700_000_123));
    }

    #[tokio::test]
    async fn etherscan_reads_transfers_and_empty_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/api"))
            .and(query_param("action", "tokentx"))
            .and(query_param("address", ETH))
            .and(query_param("apikey", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1",
                "message": "OK",
                "result": [
                    {"hash": "0xabc", "timeStamp": "1700000100", "to": ETH.to_ascii_lowercase(),
                     "value": "9995000", "confirmations": "12"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/api"))
            .and(query_param("address", "0x0000000000000000000000000000000000000001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0", "message": "No transactions found", "result": []
            })))
            .mount(&server)
            .await;

        let client = RestClient::try_new(Rail::Token, &format!("{}/v2", server.uri())).unwrap();
        let source = EtherscanSource::new(client, "0xdAC17F958D2ee523a2206206994597C13D831ec7", 1, Some("k".to_owned()));
        let since = UnixTimestamp::from_secs(0);
        let transfers = source.incoming(ETH, since).await.unwrap();
        assert_eq!(transfers[0].amount, 9_995_000);
        assert_eq!(transfers[0].confirmations, Some(12));
        assert_eq!(transfers[0].timestamp, UnixTimestamp::from_secs(1_700_000_100));

        let empty = source
            .incoming("0x0000000000000000000000000000000000000001", since)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn etherscan_in_band_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0", "message": "NOTOK", "result": "Invalid API Key"
            })))
            .mount(&server)
            .await;
        let client = RestClient::try_new(Rail::Token, &server.uri()).unwrap();
        let source = EtherscanSource::new(client, "0xdAC17F958D2ee523a2206206994597C13D831ec7", 1, None);
        let err = source.incoming(ETH, UnixTimestamp::from_secs(0)).await.unwrap_err();
        assert!(err.to_string().contains("Invalid API Key"));
    }
}
