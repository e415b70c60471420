//! Transaction classification and ERC-20 transfer extraction.
//!
//! Raw calldata and receipt logs come in; canonical [`Transaction`]s and
//! [`Erc20Transfer`]s come out. Multisig vault methods are recognized by
//! selector so the monitor can label vault traffic.

use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use serde_json::json;
use std::collections::HashMap;

use crate::chain::ChainType;
use crate::client::{ChainTransaction, Receipt};
use crate::evm::erc20;
use crate::evm::tx::{Transaction, TransactionStatus, TransactionType};

sol! {
    /// The multisig vault surface the decoder recognizes.
    interface IMultiSigVault {
        function requestRecovery() external;
        function cancelRecovery() external;
        function executeRecovery() external;
        function addSupportedToken(address token) external;
        function removeSupportedToken(address token) external;
    }
}

/// Metadata key recording a recognized multisig method name.
pub const METADATA_METHOD: &str = "method";

/// Known multisig vault methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultisigMethod {
    /// `requestRecovery()`.
    RequestRecovery,
    /// `cancelRecovery()`.
    CancelRecovery,
    /// `executeRecovery()`.
    ExecuteRecovery,
    /// `addSupportedToken(address)`.
    AddSupportedToken,
    /// `removeSupportedToken(address)`.
    RemoveSupportedToken,
}

impl MultisigMethod {
    /// Solidity method name.
    pub fn name(&self) -> &'static str {
        match self {
            MultisigMethod::RequestRecovery => "requestRecovery",
            MultisigMethod::CancelRecovery => "cancelRecovery",
            MultisigMethod::ExecuteRecovery => "executeRecovery",
            MultisigMethod::AddSupportedToken => "addSupportedToken",
            MultisigMethod::RemoveSupportedToken => "removeSupportedToken",
        }
    }

    /// 4-byte selector.
    pub fn selector(&self) -> [u8; 4] {
        match self {
            MultisigMethod::RequestRecovery => IMultiSigVault::requestRecoveryCall::SELECTOR,
            MultisigMethod::CancelRecovery => IMultiSigVault::cancelRecoveryCall::SELECTOR,
            MultisigMethod::ExecuteRecovery => IMultiSigVault::executeRecoveryCall::SELECTOR,
            MultisigMethod::AddSupportedToken => IMultiSigVault::addSupportedTokenCall::SELECTOR,
            MultisigMethod::RemoveSupportedToken => {
                IMultiSigVault::removeSupportedTokenCall::SELECTOR
            }
        }
    }

    /// Recognize a method from calldata.
    pub fn from_calldata(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let selector: [u8; 4] = data[..4].try_into().ok()?;
        [
            MultisigMethod::RequestRecovery,
            MultisigMethod::CancelRecovery,
            MultisigMethod::ExecuteRecovery,
            MultisigMethod::AddSupportedToken,
            MultisigMethod::RemoveSupportedToken,
        ]
        .into_iter()
        .find(|method| method.selector() == selector)
    }
}

/// A decoded ERC-20 transfer, from calldata or a receipt log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc20Transfer {
    /// Token contract.
    pub token_address: Address,
    /// Sender of the tokens.
    pub from: Address,
    /// Recipient of the tokens.
    pub to: Address,
    /// Amount in token base units.
    pub amount: U256,
    /// Hash of the carrying transaction.
    pub tx_hash: B256,
    /// Gas consumed by the carrying transaction.
    pub gas_used: u64,
    /// Gas price of the carrying transaction.
    pub gas_price: u128,
    /// Block the transfer landed in.
    pub block_number: Option<u64>,
}

/// Classify an observed chain transaction into the canonical form.
///
/// A receipt, when available, contributes gas usage and final status.
pub fn decode_transaction(
    chain_type: ChainType,
    tx: &ChainTransaction,
    receipt: Option<&Receipt>,
) -> Transaction {
    let mut metadata = HashMap::new();
    let (tx_type, token_address) = classify(tx, &mut metadata);
    let (status, gas_used) = match receipt {
        Some(receipt) => (
            if receipt.success {
                TransactionStatus::Success
            } else {
                TransactionStatus::Failed
            },
            receipt.gas_used,
        ),
        None if tx.block_number.is_some() => (TransactionStatus::Success, 0),
        None => (TransactionStatus::Pending, 0),
    };
    Transaction {
        hash: Some(tx.hash),
        chain_type,
        from: tx.from,
        to: tx.to,
        value: tx.value,
        data: tx.input.clone(),
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        gas_used,
        block_number: receipt.and_then(|r| r.block_number).or(tx.block_number),
        status,
        tx_type,
        token_address,
        metadata,
    }
}

fn classify(
    tx: &ChainTransaction,
    metadata: &mut HashMap<String, serde_json::Value>,
) -> (TransactionType, Option<Address>) {
    if tx.to.is_none() {
        return (TransactionType::Deployment, None);
    }
    if tx.input.is_empty() {
        return (TransactionType::Native, None);
    }
    if erc20::decode_transfer(&tx.input).is_some() || erc20::decode_transfer_from(&tx.input).is_some()
    {
        return (TransactionType::Erc20Transfer, tx.to);
    }
    if let Some(method) = MultisigMethod::from_calldata(&tx.input) {
        metadata.insert(METADATA_METHOD.to_string(), json!(method.name()));
    }
    (TransactionType::ContractCall, None)
}

/// Extract the token movement out of an `Erc20Transfer` transaction.
///
/// Calldata is authoritative for the recipient and amount; the transaction
/// sender is the token sender for plain `transfer`.
pub fn decode_erc20_transfer(tx: &Transaction) -> Option<Erc20Transfer> {
    if tx.tx_type != TransactionType::Erc20Transfer {
        return None;
    }
    let token_address = tx.token_address.or(tx.to)?;
    let tx_hash = tx.hash?;
    if let Some((recipient, amount)) = erc20::decode_transfer(&tx.data) {
        return Some(Erc20Transfer {
            token_address,
            from: tx.from,
            to: recipient,
            amount,
            tx_hash,
            gas_used: tx.gas_used,
            gas_price: tx.gas_price,
            block_number: tx.block_number,
        });
    }
    if let Some((from, to, amount)) = erc20::decode_transfer_from(&tx.data) {
        return Some(Erc20Transfer {
            token_address,
            from,
            to,
            amount,
            tx_hash,
            gas_used: tx.gas_used,
            gas_price: tx.gas_price,
            block_number: tx.block_number,
        });
    }
    None
}

/// Pull every ERC-20 `Transfer` event out of a receipt.
///
/// Covers transfers executed inside contract calls, where calldata alone
/// says nothing about token movements.
pub fn transfers_from_receipt(receipt: &Receipt) -> Vec<Erc20Transfer> {
    receipt
        .logs
        .iter()
        .filter_map(|log| {
            erc20::decode_transfer_log(&log.topics, &log.data).map(|(from, to, amount)| {
                Erc20Transfer {
                    token_address: log.address,
                    from,
                    to,
                    amount,
                    tx_hash: receipt.tx_hash,
                    gas_used: receipt.gas_used,
                    gas_price: receipt.effective_gas_price,
                    block_number: receipt.block_number,
                }
            })
        })
        .collect()
}
