//! EVM wallet: address derivation, transaction building, and EIP-155 signing.
//!
//! The wallet never touches private key bytes; it computes the signing digest
//! and asks the [`Keystore`](crate::keystore::Keystore) for a DER signature,
//! then converts to the 65-byte `(r, s, v)` form the wire format needs.

pub mod address;
pub mod erc20;
pub mod tx;
pub mod wallet;

pub use tx::{Transaction, TransactionOptions, TransactionStatus, TransactionType};
pub use wallet::{EvmWallet, SignedTransaction};
