//! Vault0: a custodial multi-chain cryptocurrency wallet service.
//!
//! The crate generates and safeguards private keys, derives on-chain
//! addresses, composes and signs transactions for EVM-compatible networks,
//! tracks native and token balances, and orchestrates a multi-signature
//! vault contract lifecycle with time-locked recovery.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! - [`keystore`] — encrypt-at-rest key material (AES-GCM) and
//!   sign-without-reveal for ECDSA (P-256, secp256k1), RSA, Ed25519, and
//!   symmetric HMAC keys.
//! - [`chain`] — the closed set of supported EVM networks and their
//!   parameters.
//! - [`evm`] — address derivation, transaction building, and deterministic
//!   EIP-155 signing over keystore-held keys.
//! - [`client`] — thin JSON-RPC abstraction, per-chain client pool, and the
//!   block-explorer history client.
//! - [`store`] — SQLite repositories for keys, wallets, token balances,
//!   transactions, and vaults.
//! - [`decoder`] — calldata and receipt-log classification (ERC-20
//!   transfers, known multisig methods).
//! - [`balance`] — native and per-token balance deltas with gas accounting.
//! - [`monitor`] — the concurrent pipeline: live chain watching, explorer
//!   history replay, and watermark maintenance.
//! - [`contract`] — compiled-artifact loading, deployment, and method calls.
//! - [`vault`] — the multisig vault state machine and its polling jobs.
//! - [`wallets`] — wallet lifecycle over the keystore and repositories.
//!
//! Write path: service → keystore (sign) → blockchain client (broadcast).
//! Read path: chain + explorer → monitor → balance service → repositories.

pub mod balance;
pub mod chain;
pub mod client;
pub mod config;
pub mod contract;
pub mod decoder;
pub mod error;
pub mod evm;
pub mod keystore;
pub mod monitor;
pub mod sig_down;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod util;
pub mod vault;
pub mod wallets;
