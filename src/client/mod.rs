//! Thin JSON-RPC abstraction over EVM chains.
//!
//! The [`BlockchainClient`] trait is the seam between the service and the
//! chain: broadcast, receipt and transaction lookup, `eth_call`, logs, and a
//! poll-based new-head subscription. The [`ClientPool`] lazily initializes
//! one client per configured chain and reuses it.

pub mod explorer;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, TransactionRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chain::{Chain, ChainRegistry, ChainType};
use crate::error::Error;

/// Interval between head polls for the new-head stream.
const HEAD_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Buffered heads before the poller awaits the consumer.
const HEAD_CHANNEL_CAPACITY: usize = 64;

/// A block header as the monitor needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Block timestamp, seconds since the epoch.
    pub timestamp: u64,
}

/// A transaction as observed on-chain.
#[derive(Debug, Clone)]
pub struct ChainTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Recipient; `None` for contract creation.
    pub to: Option<Address>,
    /// Native value in wei.
    pub value: U256,
    /// Calldata.
    pub input: Vec<u8>,
    /// Account nonce.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Block the transaction landed in, if mined.
    pub block_number: Option<u64>,
}

/// A mined block together with its transactions.
#[derive(Debug, Clone)]
pub struct BlockWithTransactions {
    /// The header.
    pub header: BlockHeader,
    /// Full transaction objects.
    pub transactions: Vec<ChainTransaction>,
}

/// One log entry out of a receipt or `eth_getLogs`.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Unindexed data.
    pub data: Vec<u8>,
}

/// A transaction receipt reduced to the fields the service consumes.
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Whether execution succeeded.
    pub success: bool,
    /// Block the transaction landed in.
    pub block_number: Option<u64>,
    /// Gas consumed.
    pub gas_used: u64,
    /// Price actually paid per gas unit.
    pub effective_gas_price: u128,
    /// Deployed contract address, for creation transactions.
    pub contract_address: Option<Address>,
    /// Logs emitted during execution.
    pub logs: Vec<LogEntry>,
}

/// Parameters for a log query.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Restrict to one emitting contract.
    pub address: Option<Address>,
    /// Inclusive lower block bound.
    pub from_block: Option<u64>,
    /// Inclusive upper block bound.
    pub to_block: Option<u64>,
    /// Restrict to one event signature (topic0).
    pub event_topic: Option<B256>,
}

/// JSON-RPC operations the service depends on.
#[async_trait]
pub trait BlockchainClient: Send + Sync {
    /// Chain this client talks to.
    fn chain_type(&self) -> ChainType;

    /// `eth_sendRawTransaction`. Returns the transaction hash.
    async fn broadcast_transaction(&self, raw: &[u8]) -> Result<B256, Error>;

    /// `eth_getTransactionByHash`.
    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<ChainTransaction>, Error>;

    /// `eth_getTransactionReceipt`.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, Error>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, Error>;

    /// `eth_getLogs`.
    async fn logs(&self, query: LogQuery) -> Result<Vec<LogEntry>, Error>;

    /// Current chain head number.
    async fn block_number(&self) -> Result<u64, Error>;

    /// Fetch a block with full transaction objects.
    async fn block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<BlockWithTransactions>, Error>;

    /// Current account nonce (latest).
    async fn nonce(&self, address: Address) -> Result<u64, Error>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, Error>;

    /// Stream new block headers until `cancel` fires.
    ///
    /// Implemented by polling the head number; consumers must tolerate gaps
    /// being filled by explorer replay.
    async fn subscribe_heads(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<BlockHeader>, Error>;
}

/// [`BlockchainClient`] over an Alloy HTTP provider.
#[derive(Debug, Clone)]
pub struct EvmRpcClient {
    provider: Arc<RootProvider>,
    chain: Chain,
}

impl EvmRpcClient {
    /// Connect to the chain's configured RPC endpoint.
    pub fn connect(chain: Chain) -> Self {
        let provider = RootProvider::new_http(chain.rpc_url.clone());
        Self {
            provider: Arc::new(provider),
            chain,
        }
    }

    fn map_rpc_error(&self, context: &str, error: impl std::fmt::Display) -> Error {
        Error::Blockchain(format!("{} {context}: {error}", self.chain.chain_type))
    }
}

fn convert_transaction(tx: alloy::rpc::types::Transaction) -> ChainTransaction {
    use alloy::consensus::Transaction as _;
    let block_number = tx.block_number;
    let from = tx.inner.signer();
    let inner = tx.inner.inner();
    ChainTransaction {
        hash: *inner.tx_hash(),
        from,
        to: inner.to(),
        value: inner.value(),
        input: inner.input().to_vec(),
        nonce: inner.nonce(),
        gas_price: inner.gas_price().unwrap_or(inner.max_fee_per_gas()),
        gas_limit: inner.gas_limit(),
        block_number,
    }
}

fn convert_log(log: &alloy::rpc::types::Log) -> LogEntry {
    LogEntry {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.to_vec(),
    }
}

#[async_trait]
impl BlockchainClient for EvmRpcClient {
    fn chain_type(&self) -> ChainType {
        self.chain.chain_type
    }

    async fn broadcast_transaction(&self, raw: &[u8]) -> Result<B256, Error> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.map_rpc_error("broadcast", e))?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<ChainTransaction>, Error> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| self.map_rpc_error("get transaction", e))?;
        Ok(tx.map(convert_transaction))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, Error> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| self.map_rpc_error("get receipt", e))?;
        Ok(receipt.map(|receipt| Receipt {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            contract_address: receipt.contract_address,
            logs: receipt.inner.logs().iter().map(convert_log).collect(),
        }))
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        let request = TransactionRequest::default()
            .with_to(to)
            .with_input(data);
        let output = self
            .provider
            .call(request)
            .await
            .map_err(|e| self.map_rpc_error("eth_call", e))?;
        Ok(output.to_vec())
    }

    async fn logs(&self, query: LogQuery) -> Result<Vec<LogEntry>, Error> {
        let mut filter = Filter::new();
        if let Some(address) = query.address {
            filter = filter.address(address);
        }
        if let Some(from_block) = query.from_block {
            filter = filter.from_block(from_block);
        }
        if let Some(to_block) = query.to_block {
            filter = filter.to_block(to_block);
        }
        if let Some(topic) = query.event_topic {
            filter = filter.event_signature(topic);
        }
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| self.map_rpc_error("eth_getLogs", e))?;
        Ok(logs.iter().map(convert_log).collect())
    }

    async fn block_number(&self) -> Result<u64, Error> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| self.map_rpc_error("get block number", e))
    }

    async fn block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<BlockWithTransactions>, Error> {
        let block = self
            .provider
            .get_block_by_number(number.into())
            .full()
            .await
            .map_err(|e| self.map_rpc_error("get block", e))?;
        Ok(block.map(|block| {
            let header = BlockHeader {
                number: block.header.number,
                hash: block.header.hash,
                timestamp: block.header.timestamp,
            };
            let transactions = block
                .transactions
                .into_transactions()
                .map(convert_transaction)
                .collect();
            BlockWithTransactions {
                header,
                transactions,
            }
        }))
    }

    async fn nonce(&self, address: Address) -> Result<u64, Error> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(|e| self.map_rpc_error("get nonce", e))
    }

    async fn gas_price(&self) -> Result<u128, Error> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.map_rpc_error("get gas price", e))
    }

    async fn subscribe_heads(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<BlockHeader>, Error> {
        let (sender, receiver) = mpsc::channel(HEAD_CHANNEL_CAPACITY);
        let client = self.clone();
        let mut last_seen = client.block_number().await?;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEAD_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let head = match client.block_number().await {
                    Ok(head) => head,
                    Err(error) => {
                        tracing::warn!(chain = %client.chain.chain_type, %error, "head poll failed");
                        continue;
                    }
                };
                while last_seen < head {
                    let next = last_seen + 1;
                    match client.block_with_transactions(next).await {
                        Ok(Some(block)) => {
                            if sender.send(block.header).await.is_err() {
                                return;
                            }
                            last_seen = next;
                        }
                        Ok(None) => break,
                        Err(error) => {
                            tracing::warn!(
                                chain = %client.chain.chain_type,
                                block = next,
                                %error,
                                "block fetch failed"
                            );
                            break;
                        }
                    }
                }
            }
        });
        Ok(receiver)
    }
}

/// Hands out the [`BlockchainClient`] for a chain.
///
/// The monitor and the polling jobs depend on this seam instead of the
/// concrete pool so tests can substitute scripted clients.
pub trait ClientProvider: Send + Sync {
    /// Fetch the client for `chain_type`.
    fn client(&self, chain_type: ChainType) -> Result<Arc<dyn BlockchainClient>, Error>;
}

/// Per-chain client pool, lazily initialized and reused.
pub struct ClientPool {
    registry: ChainRegistry,
    clients: RwLock<HashMap<ChainType, Arc<dyn BlockchainClient>>>,
}

impl ClientPool {
    /// Build an empty pool over the configured chains.
    pub fn new(registry: ChainRegistry) -> Self {
        Self {
            registry,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch (connecting on first use) the client for a chain.
    ///
    /// # Errors
    /// [`Error::ChainNotSupported`] for chains missing from the registry.
    pub fn get(&self, chain_type: ChainType) -> Result<Arc<dyn BlockchainClient>, Error> {
        if let Some(client) = self
            .clients
            .read()
            .expect("client pool lock poisoned")
            .get(&chain_type)
        {
            return Ok(Arc::clone(client));
        }
        let chain = self.registry.get(chain_type)?.clone();
        let mut clients = self.clients.write().expect("client pool lock poisoned");
        // Another task may have connected while we waited for the lock.
        let client = clients
            .entry(chain_type)
            .or_insert_with(|| Arc::new(EvmRpcClient::connect(chain)) as Arc<dyn BlockchainClient>);
        Ok(Arc::clone(client))
    }
}

impl ClientProvider for ClientPool {
    fn client(&self, chain_type: ChainType) -> Result<Arc<dyn BlockchainClient>, Error> {
        self.get(chain_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainType;

    fn registry() -> ChainRegistry {
        ChainRegistry::new([Chain {
            chain_type: ChainType::Base,
            chain_id: 8453,
            name: "base".to_string(),
            symbol: "ETH".to_string(),
            rpc_url: "http://localhost:8545".parse().expect("url"),
            explorer_url: "https://api.basescan.org/api".parse().expect("url"),
            explorer_api_key: None,
            default_gas_price: 1_000_000_000,
            default_gas_limit: 21_000,
        }])
    }

    #[test]
    fn pool_reuses_clients_and_rejects_unknown_chains() {
        let pool = ClientPool::new(registry());
        let first = pool.get(ChainType::Base).expect("client");
        let second = pool.get(ChainType::Base).expect("client");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            pool.get(ChainType::Polygon),
            Err(Error::ChainNotSupported(_))
        ));
    }
}
