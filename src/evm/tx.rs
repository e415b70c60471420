//! Canonical transaction model shared by the wallet, decoder, and monitor.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::chain::ChainType;
use crate::error::Error;

/// Metadata key carrying the owning wallet id once a transaction is matched.
pub const METADATA_WALLET_ID: &str = "wallet_id";

/// Where a transaction stands on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Broadcast but not yet mined.
    #[serde(rename = "pending")]
    Pending,
    /// Mined and succeeded.
    #[serde(rename = "success")]
    Success,
    /// Mined and reverted.
    #[serde(rename = "failed")]
    Failed,
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Success => write!(f, "success"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown tx status {other}"))),
        }
    }
}

/// What kind of transfer a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// Plain native-currency transfer.
    #[serde(rename = "native")]
    Native,
    /// ERC-20 `transfer` call.
    #[serde(rename = "erc20_transfer")]
    Erc20Transfer,
    /// Any other contract call.
    #[serde(rename = "contract_call")]
    ContractCall,
    /// Contract creation.
    #[serde(rename = "deployment")]
    Deployment,
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Native => write!(f, "native"),
            TransactionType::Erc20Transfer => write!(f, "erc20_transfer"),
            TransactionType::ContractCall => write!(f, "contract_call"),
            TransactionType::Deployment => write!(f, "deployment"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(TransactionType::Native),
            "erc20_transfer" => Ok(TransactionType::Erc20Transfer),
            "contract_call" => Ok(TransactionType::ContractCall),
            "deployment" => Ok(TransactionType::Deployment),
            other => Err(Error::InvalidInput(format!("unknown tx type {other}"))),
        }
    }
}

/// Caller-adjustable knobs when building a transaction.
///
/// Missing gas values fall back to the chain defaults; a missing nonce is
/// filled in from the chain right before signing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    /// Gas price in wei.
    pub gas_price: Option<u128>,
    /// Gas limit.
    pub gas_limit: Option<u64>,
    /// Account nonce.
    pub nonce: Option<u64>,
}

/// Canonical transaction form used across the service.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    /// Transaction hash; set once signed or observed on-chain.
    pub hash: Option<B256>,
    /// Chain the transaction belongs to.
    pub chain_type: ChainType,
    /// Sender.
    pub from: Address,
    /// Recipient; `None` for contract creation.
    pub to: Option<Address>,
    /// Native value in wei.
    pub value: U256,
    /// Calldata.
    pub data: Vec<u8>,
    /// Account nonce.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas actually consumed; zero until mined.
    pub gas_used: u64,
    /// Block the transaction landed in, if mined.
    pub block_number: Option<u64>,
    /// On-chain status.
    pub status: TransactionStatus,
    /// Classification.
    pub tx_type: TransactionType,
    /// Token contract for `Erc20Transfer` transactions.
    pub token_address: Option<Address>,
    /// Correlation metadata; carries `wallet_id` once matched.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Transaction {
    /// The owning wallet id, when the monitor has matched this transaction.
    pub fn wallet_id(&self) -> Option<i64> {
        self.metadata.get(METADATA_WALLET_ID).and_then(|v| v.as_i64())
    }

    /// Record the owning wallet id.
    pub fn set_wallet_id(&mut self, wallet_id: i64) {
        self.metadata
            .insert(METADATA_WALLET_ID.to_string(), wallet_id.into());
    }

    /// Total gas cost in wei (`gas_used × gas_price`).
    pub fn gas_cost(&self) -> U256 {
        U256::from(self.gas_used) * U256::from(self.gas_price)
    }
}
