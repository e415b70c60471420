//! Block-explorer HTTP client: paginated history and contract metadata.
//!
//! Speaks the Etherscan-compatible API every supported chain exposes. Pages
//! are keyed by an opaque continuation token minted here; callers never see
//! the underlying page numbers.

use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::chain::Chain;
use crate::error::Error;
use crate::types::{self, Page};

/// Which history stream to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxRecordKind {
    /// Plain (external) transactions.
    #[serde(rename = "normal")]
    Normal,
    /// ERC-20 token transfer records.
    #[serde(rename = "erc20")]
    Erc20,
}

/// Query bounds for a history fetch.
#[derive(Debug, Clone, Copy)]
pub struct HistoryQuery {
    /// Inclusive lower block bound.
    pub start_block: Option<u64>,
    /// Inclusive upper block bound.
    pub end_block: Option<u64>,
    /// Oldest-first when true.
    pub sort_ascending: bool,
    /// Page size.
    pub limit: u32,
    /// Stream to fetch.
    pub tx_kind: TxRecordKind,
}

/// One transaction record out of the explorer.
#[derive(Debug, Clone)]
pub struct ExplorerTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient; `None` for contract creation.
    pub to: Option<Address>,
    /// Native value (normal records) or token amount (ERC-20 records).
    pub value: U256,
    /// Calldata, when the API returns it.
    pub input: Vec<u8>,
    /// Account nonce.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas consumed by the transaction.
    pub gas_used: u64,
    /// Block the transaction landed in.
    pub block_number: u64,
    /// Whether execution failed.
    pub failed: bool,
    /// Token contract, for ERC-20 records.
    pub token_address: Option<Address>,
}

/// Verified-contract metadata.
#[derive(Debug, Clone)]
pub struct ContractInfo {
    /// Contract name as verified.
    pub name: String,
    /// Parsed ABI, when the source is verified.
    pub abi: Option<JsonAbi>,
    /// Whether the explorer has verified source for this address.
    pub is_verified: bool,
}

/// Explorer operations the service depends on.
#[async_trait]
pub trait BlockExplorer: Send + Sync {
    /// Fetch one page of transaction history for `address`.
    async fn transaction_history(
        &self,
        address: Address,
        query: HistoryQuery,
        continuation: Option<&str>,
    ) -> Result<Page<ExplorerTransaction>, Error>;

    /// Fetch contract metadata (name, ABI, verification state).
    async fn contract(&self, address: Address) -> Result<ContractInfo, Error>;
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryCursor {
    page: u32,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResponse<T> {
    status: String,
    message: String,
    result: T,
}

/// Raw history record; every field arrives as a string.
#[derive(Debug, Deserialize)]
struct RawHistoryRecord {
    #[serde(rename = "blockNumber")]
    block_number: String,
    hash: String,
    #[serde(default)]
    nonce: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    #[serde(rename = "gasPrice", default)]
    gas_price: String,
    #[serde(rename = "gasUsed", default)]
    gas_used: String,
    #[serde(rename = "isError", default)]
    is_error: String,
    #[serde(default)]
    input: String,
    #[serde(rename = "contractAddress", default)]
    contract_address: String,
}

fn parse_record(raw: &RawHistoryRecord, kind: TxRecordKind) -> Result<ExplorerTransaction, Error> {
    let hash = B256::from_str(&raw.hash)
        .map_err(|_| Error::Blockchain(format!("explorer returned bad hash {}", raw.hash)))?;
    let from = Address::from_str(&raw.from)
        .map_err(|_| Error::Blockchain(format!("explorer returned bad sender {}", raw.from)))?;
    let to = if raw.to.is_empty() {
        None
    } else {
        Some(Address::from_str(&raw.to).map_err(|_| {
            Error::Blockchain(format!("explorer returned bad recipient {}", raw.to))
        })?)
    };
    let token_address = match kind {
        TxRecordKind::Erc20 => Some(Address::from_str(&raw.contract_address).map_err(|_| {
            Error::Blockchain(format!(
                "explorer returned bad token address {}",
                raw.contract_address
            ))
        })?),
        TxRecordKind::Normal => None,
    };
    let input = raw
        .input
        .strip_prefix("0x")
        .map(alloy::hex::decode)
        .transpose()
        .ok()
        .flatten()
        .unwrap_or_default();
    Ok(ExplorerTransaction {
        hash,
        from,
        to,
        value: U256::from_str(&raw.value).unwrap_or(U256::ZERO),
        input,
        nonce: raw.nonce.parse().unwrap_or(0),
        gas_price: raw.gas_price.parse().unwrap_or(0),
        gas_used: raw.gas_used.parse().unwrap_or(0),
        block_number: raw.block_number.parse().unwrap_or(0),
        failed: raw.is_error == "1",
        token_address,
    })
}

#[derive(Debug, Deserialize)]
struct RawContractRecord {
    #[serde(rename = "ContractName", default)]
    contract_name: String,
    #[serde(rename = "ABI", default)]
    abi: String,
}

/// Etherscan-compatible [`BlockExplorer`].
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    http: reqwest::Client,
    chain: Chain,
}

impl EtherscanClient {
    /// Build a client for the chain's configured explorer endpoint.
    pub fn new(chain: Chain) -> Self {
        Self {
            http: reqwest::Client::new(),
            chain,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        params: &[(&str, String)],
    ) -> Result<EnvelopeResponse<T>, Error> {
        let mut url = self.chain.explorer_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            if let Some(api_key) = &self.chain.explorer_api_key {
                pairs.append_pair("apikey", api_key);
            }
        }
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Blockchain(format!("explorer request failed: {e}")))?;
        response
            .error_for_status()
            .map_err(|e| Error::Blockchain(format!("explorer returned {e}")))?
            .json::<EnvelopeResponse<T>>()
            .await
            .map_err(|e| Error::Blockchain(format!("explorer payload malformed: {e}")))
    }
}

#[async_trait]
impl BlockExplorer for EtherscanClient {
    async fn transaction_history(
        &self,
        address: Address,
        query: HistoryQuery,
        continuation: Option<&str>,
    ) -> Result<Page<ExplorerTransaction>, Error> {
        let page = match continuation {
            Some(token) => types::decode_token::<HistoryCursor>(token)?.page,
            None => 1,
        };
        let action = match query.tx_kind {
            TxRecordKind::Normal => "txlist",
            TxRecordKind::Erc20 => "tokentx",
        };
        let limit = query.limit.clamp(1, 10_000);
        let params = [
            ("module", "account".to_string()),
            ("action", action.to_string()),
            ("address", address.to_string()),
            (
                "startblock",
                query.start_block.unwrap_or(0).to_string(),
            ),
            (
                "endblock",
                query.end_block.unwrap_or(99_999_999).to_string(),
            ),
            ("page", page.to_string()),
            ("offset", limit.to_string()),
            (
                "sort",
                if query.sort_ascending { "asc" } else { "desc" }.to_string(),
            ),
        ];
        let envelope: EnvelopeResponse<serde_json::Value> = self.get_json(&params).await?;
        // Etherscan reports "no transactions found" as status 0.
        if envelope.status != "1" {
            if envelope.message.contains("No transactions found") {
                return Ok(Page::empty());
            }
            return Err(Error::Blockchain(format!(
                "explorer error: {}",
                envelope.message
            )));
        }
        let raw: Vec<RawHistoryRecord> = serde_json::from_value(envelope.result)
            .map_err(|e| Error::Blockchain(format!("explorer payload malformed: {e}")))?;
        let items = raw
            .iter()
            .map(|record| parse_record(record, query.tx_kind))
            .collect::<Result<Vec<_>, _>>()?;
        let next_token = if items.len() == limit as usize {
            Some(types::encode_token(&HistoryCursor { page: page + 1 }))
        } else {
            None
        };
        Ok(Page { items, next_token })
    }

    async fn contract(&self, address: Address) -> Result<ContractInfo, Error> {
        let params = [
            ("module", "contract".to_string()),
            ("action", "getsourcecode".to_string()),
            ("address", address.to_string()),
        ];
        let envelope: EnvelopeResponse<Vec<RawContractRecord>> = self.get_json(&params).await?;
        if envelope.status != "1" {
            return Err(Error::Blockchain(format!(
                "explorer error: {}",
                envelope.message
            )));
        }
        let record = envelope
            .result
            .into_iter()
            .next()
            .ok_or_else(|| Error::Blockchain("explorer returned no contract record".to_string()))?;
        let is_verified =
            !record.abi.is_empty() && record.abi != "Contract source code not verified";
        let abi = if is_verified {
            serde_json::from_str::<JsonAbi>(&record.abi).ok()
        } else {
            None
        };
        Ok(ContractInfo {
            name: record.contract_name,
            abi,
            is_verified,
        })
    }
}

/// Hands out the [`BlockExplorer`] for a chain.
pub trait ExplorerProvider: Send + Sync {
    /// Fetch the explorer client for `chain_type`.
    fn explorer(
        &self,
        chain_type: crate::chain::ChainType,
    ) -> Result<std::sync::Arc<dyn BlockExplorer>, Error>;
}

/// Per-chain explorer pool, lazily initialized and reused.
pub struct ExplorerPool {
    registry: crate::chain::ChainRegistry,
    clients: std::sync::RwLock<
        std::collections::HashMap<crate::chain::ChainType, std::sync::Arc<dyn BlockExplorer>>,
    >,
}

impl ExplorerPool {
    /// Build an empty pool over the configured chains.
    pub fn new(registry: crate::chain::ChainRegistry) -> Self {
        Self {
            registry,
            clients: std::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl ExplorerProvider for ExplorerPool {
    fn explorer(
        &self,
        chain_type: crate::chain::ChainType,
    ) -> Result<std::sync::Arc<dyn BlockExplorer>, Error> {
        if let Some(client) = self
            .clients
            .read()
            .expect("explorer pool lock poisoned")
            .get(&chain_type)
        {
            return Ok(std::sync::Arc::clone(client));
        }
        let chain = self.registry.get(chain_type)?.clone();
        let mut clients = self.clients.write().expect("explorer pool lock poisoned");
        let client = clients.entry(chain_type).or_insert_with(|| {
            std::sync::Arc::new(EtherscanClient::new(chain)) as std::sync::Arc<dyn BlockExplorer>
        });
        Ok(std::sync::Arc::clone(client))
    }
}
