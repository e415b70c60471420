//! Canonical transaction rows, keyed by hash.

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::error::Error;
use crate::evm::tx::{Transaction, TransactionStatus, TransactionType};
use crate::evm::address as evm_address;

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    hash: String,
    chain_type: String,
    from_address: String,
    to_address: Option<String>,
    value: String,
    data: Option<Vec<u8>>,
    nonce: i64,
    gas_price: String,
    gas_limit: i64,
    gas_used: i64,
    block_number: Option<i64>,
    status: String,
    tx_type: String,
    token_address: Option<String>,
    metadata: String,
}

impl TransactionRow {
    fn into_transaction(self) -> Result<Transaction, Error> {
        let to = self
            .to_address
            .as_deref()
            .map(Address::from_str)
            .transpose()
            .map_err(|_| Error::OperationFailed("corrupt to_address".to_string()))?;
        let token_address = self
            .token_address
            .as_deref()
            .map(Address::from_str)
            .transpose()
            .map_err(|_| Error::OperationFailed("corrupt token_address".to_string()))?;
        Ok(Transaction {
            hash: Some(
                B256::from_str(&self.hash)
                    .map_err(|_| Error::OperationFailed("corrupt hash".to_string()))?,
            ),
            chain_type: self.chain_type.parse()?,
            from: Address::from_str(&self.from_address)
                .map_err(|_| Error::OperationFailed("corrupt from_address".to_string()))?,
            to,
            value: super::parse_u256("value", &self.value)?,
            data: self.data.unwrap_or_default(),
            nonce: self.nonce.max(0) as u64,
            gas_price: self.gas_price.parse().unwrap_or(0),
            gas_limit: self.gas_limit.max(0) as u64,
            gas_used: self.gas_used.max(0) as u64,
            block_number: self.block_number.map(|n| n.max(0) as u64),
            status: self.status.parse()?,
            tx_type: self.tx_type.parse()?,
            token_address,
            metadata: serde_json::from_str(&self.metadata).unwrap_or_default(),
        })
    }
}

/// Transactions table, keyed by hash.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Build a repository over an open pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether a transaction with `hash` is already recorded.
    pub async fn exists(&self, hash: B256) -> Result<bool, Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM transactions WHERE hash = ?1")
                .bind(hash.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Insert or refresh a transaction row.
    ///
    /// Returns `true` when the row was newly inserted — the monitor uses this
    /// to suppress double-accounting on re-delivery.
    ///
    /// # Errors
    /// [`Error::InvalidInput`] when the transaction carries no hash.
    pub async fn upsert(&self, tx: &Transaction) -> Result<bool, Error> {
        let hash = tx
            .hash
            .ok_or_else(|| Error::InvalidInput("transaction has no hash".to_string()))?;
        let was_known = self.exists(hash).await?;
        let now = Utc::now();
        let metadata = serde_json::to_string(&tx.metadata).expect("metadata serializes");
        sqlx::query(
            "INSERT INTO transactions \
             (hash, chain_type, from_address, to_address, value, data, nonce, gas_price, \
              gas_limit, gas_used, block_number, status, tx_type, token_address, metadata, \
              created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16) \
             ON CONFLICT (hash) DO UPDATE SET \
               gas_used = excluded.gas_used, \
               block_number = excluded.block_number, \
               status = excluded.status, \
               metadata = excluded.metadata, \
               updated_at = excluded.updated_at",
        )
        .bind(hash.to_string())
        .bind(tx.chain_type.to_string())
        .bind(evm_address::checksum(tx.from))
        .bind(tx.to.map(evm_address::checksum))
        .bind(tx.value.to_string())
        .bind(&tx.data)
        .bind(tx.nonce as i64)
        .bind(tx.gas_price.to_string())
        .bind(tx.gas_limit as i64)
        .bind(tx.gas_used as i64)
        .bind(tx.block_number.map(|n| n as i64))
        .bind(tx.status.to_string())
        .bind(tx.tx_type.to_string())
        .bind(tx.token_address.map(evm_address::checksum))
        .bind(metadata)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(!was_known)
    }

    /// Fetch a transaction by hash.
    pub async fn get(&self, hash: B256) -> Result<Transaction, Error> {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT hash, chain_type, from_address, to_address, value, data, nonce, gas_price, \
                    gas_limit, gas_used, block_number, status, tx_type, token_address, metadata \
             FROM transactions WHERE hash = ?1",
        )
        .bind(hash.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::TransactionNotFound(hash.to_string()))?
        .into_transaction()
    }
}
