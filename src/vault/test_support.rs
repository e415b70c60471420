//! Shared fixtures for the vault service and polling-job tests: a scripted
//! chain (client + explorer), a funded operator key, and an on-disk multisig
//! artifact.

use alloy::primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::json;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chain::{Chain, ChainRegistry, ChainType};
use crate::client::explorer::{
    BlockExplorer, ContractInfo, ExplorerProvider, ExplorerTransaction, HistoryQuery,
};
use crate::client::{
    BlockHeader, BlockWithTransactions, BlockchainClient, ChainTransaction, ClientProvider,
    LogEntry, LogQuery, Receipt,
};
use crate::error::Error;
use crate::keystore::encryptor::Encryptor;
use crate::keystore::{Curve, KeyFamily, Keystore};
use crate::types::{Page, Tags};

pub(crate) const SIGNER_A: &str = "0x1000000000000000000000000000000000000001";
pub(crate) const SIGNER_B: &str = "0x2000000000000000000000000000000000000002";
pub(crate) const SIGNER_C: &str = "0x3000000000000000000000000000000000000003";
const DEPLOYED_CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

static ARTIFACTS: Lazy<TempDir> = Lazy::new(|| {
    let dir = tempfile::tempdir().expect("artifact tempdir");
    let contract_dir = dir.path().join("MultiSigVault");
    std::fs::create_dir_all(&contract_dir).expect("mkdir");
    let artifact = json!({
        "abi": [
            {
                "type": "constructor",
                "inputs": [
                    { "name": "signers", "type": "address[]" },
                    { "name": "quorum", "type": "uint256" },
                    { "name": "recoveryAddress", "type": "address" },
                    { "name": "whitelistedTokens", "type": "address[]" }
                ],
                "stateMutability": "nonpayable"
            },
            { "type": "function", "name": "requestRecovery", "inputs": [], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": "cancelRecovery", "inputs": [], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": "executeRecovery", "inputs": [], "outputs": [], "stateMutability": "nonpayable" }
        ],
        "bytecode": "0x60806040526000"
    });
    std::fs::write(
        contract_dir.join("MultiSigVault.json"),
        serde_json::to_string(&artifact).expect("serialize"),
    )
    .expect("write artifact");
    dir
});

/// Artifacts root holding a deployable `MultiSigVault`.
pub(crate) fn multisig_artifact_dir() -> PathBuf {
    ARTIFACTS.path().to_path_buf()
}

#[derive(Default)]
struct ScriptedClient {
    broadcasts: Mutex<Vec<Vec<u8>>>,
    receipts: Mutex<std::collections::HashMap<B256, Receipt>>,
}

#[async_trait]
impl BlockchainClient for ScriptedClient {
    fn chain_type(&self) -> ChainType {
        ChainType::Ethereum
    }
    async fn broadcast_transaction(&self, raw: &[u8]) -> Result<B256, Error> {
        self.broadcasts.lock().expect("lock").push(raw.to_vec());
        Ok(keccak256(raw))
    }
    async fn transaction_by_hash(&self, _hash: B256) -> Result<Option<ChainTransaction>, Error> {
        Ok(None)
    }
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, Error> {
        Ok(self.receipts.lock().expect("lock").get(&hash).cloned())
    }
    async fn call(&self, _to: Address, _data: Vec<u8>) -> Result<Vec<u8>, Error> {
        Ok(Vec::new())
    }
    async fn logs(&self, _query: LogQuery) -> Result<Vec<LogEntry>, Error> {
        Ok(Vec::new())
    }
    async fn block_number(&self) -> Result<u64, Error> {
        Ok(0)
    }
    async fn block_with_transactions(
        &self,
        _number: u64,
    ) -> Result<Option<BlockWithTransactions>, Error> {
        Ok(None)
    }
    async fn nonce(&self, _address: Address) -> Result<u64, Error> {
        Ok(0)
    }
    async fn gas_price(&self) -> Result<u128, Error> {
        Ok(1_000_000_000)
    }
    async fn subscribe_heads(
        &self,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<BlockHeader>, Error> {
        let (_sender, receiver) = mpsc::channel(1);
        Ok(receiver)
    }
}

struct NoExplorer;

#[async_trait]
impl BlockExplorer for NoExplorer {
    async fn transaction_history(
        &self,
        _address: Address,
        _query: HistoryQuery,
        _continuation: Option<&str>,
    ) -> Result<Page<ExplorerTransaction>, Error> {
        Ok(Page::empty())
    }
    async fn contract(&self, _address: Address) -> Result<ContractInfo, Error> {
        Err(Error::Blockchain("not scripted".to_string()))
    }
}

struct FixedClientProvider(Arc<ScriptedClient>);

impl ClientProvider for FixedClientProvider {
    fn client(&self, _chain: ChainType) -> Result<Arc<dyn BlockchainClient>, Error> {
        Ok(Arc::clone(&self.0) as Arc<dyn BlockchainClient>)
    }
}

struct FixedExplorerProvider;

impl ExplorerProvider for FixedExplorerProvider {
    fn explorer(&self, _chain: ChainType) -> Result<Arc<dyn BlockExplorer>, Error> {
        Ok(Arc::new(NoExplorer) as Arc<dyn BlockExplorer>)
    }
}

/// A scripted chain backend plus the operator keystore.
pub(crate) struct ScriptedChain {
    keystore: Arc<Keystore>,
    key_id: String,
    client: Arc<ScriptedClient>,
}

impl ScriptedChain {
    pub(crate) async fn new(pool: SqlitePool) -> Self {
        let keystore = Arc::new(Keystore::new(
            pool,
            Encryptor::new(&[0x55u8; 32]).expect("master key"),
        ));
        let key = keystore
            .create("vault-operator", KeyFamily::Ecdsa, Some(Curve::Secp256k1), Tags::new())
            .await
            .expect("operator key");
        Self {
            keystore,
            key_id: key.id,
            client: Arc::new(ScriptedClient::default()),
        }
    }

    pub(crate) fn keystore(&self) -> Arc<Keystore> {
        Arc::clone(&self.keystore)
    }

    pub(crate) fn owner_key_id(&self) -> String {
        self.key_id.clone()
    }

    pub(crate) async fn owner_address(&self) -> String {
        let key = self
            .keystore
            .get_public_key(&self.key_id)
            .await
            .expect("operator key");
        crate::evm::address::derive_address(key.public_key.as_deref().expect("public half"))
            .expect("derive")
    }

    pub(crate) fn registry(&self) -> ChainRegistry {
        ChainRegistry::new([Chain {
            chain_type: ChainType::Ethereum,
            chain_id: 1,
            name: "ethereum".to_string(),
            symbol: "ETH".to_string(),
            rpc_url: "http://localhost:8545".parse().expect("url"),
            explorer_url: "https://api.etherscan.io/api".parse().expect("url"),
            explorer_api_key: None,
            default_gas_price: 20_000_000_000,
            default_gas_limit: 21_000,
        }])
    }

    pub(crate) fn client_provider(&self) -> Arc<dyn ClientProvider> {
        Arc::new(FixedClientProvider(Arc::clone(&self.client)))
    }

    pub(crate) fn explorer_provider(&self) -> Arc<dyn ExplorerProvider> {
        Arc::new(FixedExplorerProvider)
    }

    pub(crate) fn broadcast_count(&self) -> usize {
        self.client.broadcasts.lock().expect("lock").len()
    }

    pub(crate) fn deployed_contract_address(&self) -> String {
        DEPLOYED_CONTRACT.to_string()
    }

    /// Script the receipt the deployment monitor will find for `tx_hash`.
    pub(crate) fn script_receipt(&self, tx_hash: B256, success: bool) {
        self.client.receipts.lock().expect("lock").insert(
            tx_hash,
            Receipt {
                tx_hash,
                success,
                block_number: Some(120),
                gas_used: 900_000,
                effective_gas_price: 1_000_000_000,
                contract_address: Some(
                    DEPLOYED_CONTRACT.parse().expect("contract address"),
                ),
                logs: vec![],
            },
        );
    }

    /// Value kept around so tests can assert gas math when they need to.
    #[allow(dead_code)]
    pub(crate) fn scripted_deployment_cost(&self) -> U256 {
        U256::from(900_000u64) * U256::from(1_000_000_000u64)
    }
}
