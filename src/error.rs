//! Crate-wide error taxonomy.
//!
//! Low layers produce these variants directly; higher layers classify by kind
//! via [`Error::kind`] instead of matching on strings. The set is closed:
//! adding a variant is an API change.

use crate::vault::VaultStatus;

/// Errors produced by the custody core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An address failed syntactic or checksum validation.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// A transaction amount is out of range for the operation.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    /// A request parameter failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No key exists with the given id or name.
    #[error("key not found: {0}")]
    KeyNotFound(String),
    /// No wallet exists with the given id.
    #[error("wallet not found: {0}")]
    WalletNotFound(i64),
    /// No vault exists with the given id.
    #[error("vault not found: {0}")]
    VaultNotFound(i64),
    /// No transaction exists with the given hash.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
    /// The contract ABI has no method with the given name.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A key with the same name already exists.
    #[error("key already exists: {0}")]
    KeyAlreadyExists(String),
    /// A wallet for the same (chain, address) already exists.
    #[error("wallet already exists: {0}")]
    WalletAlreadyExists(String),

    /// The chain is not configured or not supported.
    #[error("chain not supported: {0}")]
    ChainNotSupported(String),

    /// Key material is malformed or the master key has the wrong size.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// AES-GCM sealing failed.
    #[error("encryption failed: {0}")]
    Encryption(String),
    /// AES-GCM opening failed, including authentication-tag mismatch.
    #[error("decryption failed: {0}")]
    Decryption(String),
    /// Producing a signature failed.
    #[error("signing failed: {0}")]
    Signing(String),
    /// Neither recovery id reproduced the signer's public key.
    #[error("signature recovery failed: {0}")]
    SignatureRecovery(String),

    /// A vault status transition outside the state machine was requested.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Status the vault was in.
        from: VaultStatus,
        /// Status that was requested.
        to: VaultStatus,
    },

    /// The artifact file is missing its ABI or bytecode.
    #[error("invalid contract artifact: {0}")]
    InvalidContract(String),
    /// An on-chain transaction was mined but reverted.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// A JSON-RPC or explorer request failed.
    #[error("blockchain error: {0}")]
    Blockchain(String),
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// An on-chain side effect succeeded but a follow-up local write failed.
    /// Carries the transaction hash so the operator can reconcile.
    #[error("operation failed after broadcast of {tx_hash}: {source}")]
    PartiallyApplied {
        /// Hash of the transaction that did land on-chain.
        tx_hash: String,
        /// The local failure that followed.
        #[source]
        source: Box<Error>,
    },
    /// Any other operation failure.
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

/// Coarse classification used by retry and surfacing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller error; surface, never retry.
    Validation,
    /// Entity missing; caller decides.
    NotFound,
    /// Uniqueness violation; idempotent callers retry with a lookup.
    AlreadyExists,
    /// Chain unknown to the registry; fatal for the operation.
    Unsupported,
    /// Cryptographic failure; fatal, operator attention.
    Crypto,
    /// State-machine violation.
    StateMachine,
    /// External I/O; loops retry on the next tick, request-scoped calls surface.
    External,
}

impl Error {
    /// Classify this error for retry/surfacing decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAddress(_)
            | Error::InvalidAmount(_)
            | Error::InvalidInput(_)
            | Error::InvalidContract(_) => ErrorKind::Validation,
            Error::KeyNotFound(_)
            | Error::WalletNotFound(_)
            | Error::VaultNotFound(_)
            | Error::TransactionNotFound(_)
            | Error::MethodNotFound(_) => ErrorKind::NotFound,
            Error::KeyAlreadyExists(_) | Error::WalletAlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::ChainNotSupported(_) => ErrorKind::Unsupported,
            Error::InvalidKey(_)
            | Error::Encryption(_)
            | Error::Decryption(_)
            | Error::Signing(_)
            | Error::SignatureRecovery(_) => ErrorKind::Crypto,
            Error::InvalidStateTransition { .. } => ErrorKind::StateMachine,
            Error::TransactionFailed(_)
            | Error::Blockchain(_)
            | Error::Database(_)
            | Error::PartiallyApplied { .. }
            | Error::OperationFailed(_) => ErrorKind::External,
        }
    }

    /// Wrap a local failure that happened after `tx_hash` landed on-chain.
    pub fn after_broadcast(tx_hash: impl Into<String>, source: Error) -> Self {
        Error::PartiallyApplied {
            tx_hash: tx_hash.into(),
            source: Box::new(source),
        }
    }
}
