//! Contract manager: artifact deployment and method calls.
//!
//! Deploys go out as contract-creation transactions signed by the operator
//! wallet; reads go through `eth_call`. When a caller has no ABI at hand the
//! manager falls back to the block explorer's verified-source lookup.

pub mod artifact;

use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, B256, U256};
use std::path::PathBuf;
use std::sync::Arc;

use crate::client::explorer::BlockExplorer;
use crate::client::BlockchainClient;
use crate::error::Error;
use crate::evm::address as evm_address;
use crate::evm::tx::TransactionOptions;
use crate::evm::wallet::EvmWallet;
pub use artifact::Artifact;

/// Outcome of a mined deployment, derived from its receipt.
#[derive(Debug, Clone)]
pub struct DeploymentResult {
    /// Address the contract landed at.
    pub contract_address: Address,
    /// Block the deployment was mined in.
    pub block_number: u64,
    /// Gas consumed.
    pub gas_used: u64,
    /// `gas_used × effective_gas_price`, in wei.
    pub deployment_cost: U256,
}

/// Deploys artifacts and drives contract methods on one chain.
pub struct ContractManager {
    artifacts_root: PathBuf,
    wallet: EvmWallet,
    client: Arc<dyn BlockchainClient>,
    explorer: Arc<dyn BlockExplorer>,
}

impl ContractManager {
    /// Wire a manager to its chain client, explorer, and operator wallet.
    pub fn new(
        artifacts_root: PathBuf,
        wallet: EvmWallet,
        client: Arc<dyn BlockchainClient>,
        explorer: Arc<dyn BlockExplorer>,
    ) -> Self {
        Self {
            artifacts_root,
            wallet,
            client,
            explorer,
        }
    }

    /// Load `<artifacts-root>/<name>/<name>.json`.
    pub fn load_artifact(&self, name: &str) -> Result<Artifact, Error> {
        artifact::load(&self.artifacts_root, name)
    }

    /// ABI-pack `args` for the constructor, append to the bytecode, and
    /// broadcast a creation transaction. Returns the deploy tx hash; the
    /// full result is available via [`ContractManager::deployment`].
    pub async fn deploy(
        &self,
        artifact: &Artifact,
        args: &[DynSolValue],
        options: TransactionOptions,
    ) -> Result<B256, Error> {
        let mut data = artifact.bytecode.clone();
        match artifact.abi.constructor() {
            Some(constructor) => {
                let encoded = constructor
                    .abi_encode_input(args)
                    .map_err(|e| Error::InvalidInput(format!("constructor arguments: {e}")))?;
                data.extend_from_slice(&encoded);
            }
            None if !args.is_empty() => {
                return Err(Error::InvalidInput(format!(
                    "{} has no constructor but {} arguments were given",
                    artifact.name,
                    args.len()
                )));
            }
            None => {}
        }

        let options = self.fill_nonce(options).await?;
        let mut tx = self.wallet.create_native_transaction(
            &evm_address::checksum(Address::ZERO),
            U256::ZERO,
            options,
        )?;
        tx.data = data;
        let signed = self.wallet.sign_transaction(&tx).await?;
        let hash = self.client.broadcast_transaction(&signed.raw).await?;
        tracing::info!(artifact = %artifact.name, tx = %hash, "deployment broadcast");
        Ok(hash)
    }

    /// Fetch the outcome of a deploy transaction.
    ///
    /// # Errors
    /// [`Error::TransactionNotFound`] when the chain knows nothing about the
    /// hash, [`Error::OperationFailed`] while it is still pending, and
    /// [`Error::TransactionFailed`] when the receipt reports a revert.
    pub async fn deployment(&self, tx_hash: B256) -> Result<DeploymentResult, Error> {
        let receipt = match self.client.transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => {
                return match self.client.transaction_by_hash(tx_hash).await? {
                    Some(_) => Err(Error::OperationFailed(format!(
                        "deployment {tx_hash} is not yet mined"
                    ))),
                    None => Err(Error::TransactionNotFound(tx_hash.to_string())),
                };
            }
        };
        if !receipt.success {
            return Err(Error::TransactionFailed(format!(
                "deployment {tx_hash} reverted"
            )));
        }
        let contract_address = receipt.contract_address.ok_or_else(|| {
            Error::OperationFailed(format!("receipt for {tx_hash} has no contract address"))
        })?;
        Ok(DeploymentResult {
            contract_address,
            block_number: receipt.block_number.unwrap_or(0),
            gas_used: receipt.gas_used,
            deployment_cost: U256::from(receipt.gas_used)
                * U256::from(receipt.effective_gas_price),
        })
    }

    /// `eth_call` a read method and decode its outputs.
    ///
    /// With no ABI supplied, the explorer's verified ABI is used.
    pub async fn call_method(
        &self,
        address: Address,
        abi: Option<&JsonAbi>,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, Error> {
        let resolved;
        let abi = match abi {
            Some(abi) => abi,
            None => {
                resolved = self.fetch_abi(address).await?;
                &resolved
            }
        };
        let function = abi
            .function(method)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| Error::MethodNotFound(method.to_string()))?;
        let input = function
            .abi_encode_input(args)
            .map_err(|e| Error::InvalidInput(format!("arguments for {method}: {e}")))?;
        let output = self.client.call(address, input).await?;
        function
            .abi_decode_output(&output)
            .map_err(|e| Error::Blockchain(format!("{method} returned undecodable data: {e}")))
    }

    /// Sign and broadcast a state-changing method call. Returns the tx hash.
    pub async fn execute_method(
        &self,
        address: Address,
        abi: Option<&JsonAbi>,
        method: &str,
        options: TransactionOptions,
        args: &[DynSolValue],
    ) -> Result<B256, Error> {
        let resolved;
        let abi = match abi {
            Some(abi) => abi,
            None => {
                resolved = self.fetch_abi(address).await?;
                &resolved
            }
        };
        let options = self.fill_nonce(options).await?;
        let tx = self.wallet.create_contract_call_transaction(
            &evm_address::checksum(address),
            U256::ZERO,
            abi,
            method,
            args,
            options,
        )?;
        let signed = self.wallet.sign_transaction(&tx).await?;
        let hash = self.client.broadcast_transaction(&signed.raw).await?;
        tracing::info!(contract = %address, method, tx = %hash, "method executed");
        Ok(hash)
    }

    async fn fetch_abi(&self, address: Address) -> Result<JsonAbi, Error> {
        let info = self.explorer.contract(address).await?;
        info.abi.ok_or_else(|| {
            Error::InvalidContract(format!("no verified ABI for {address}"))
        })
    }

    async fn fill_nonce(&self, options: TransactionOptions) -> Result<TransactionOptions, Error> {
        if options.nonce.is_some() {
            return Ok(options);
        }
        let sender = self.wallet.derive_address().await?;
        let sender = evm_address::parse_address(&sender)?;
        let nonce = self.client.nonce(sender).await?;
        Ok(TransactionOptions {
            nonce: Some(nonce),
            ..options
        })
    }
}
