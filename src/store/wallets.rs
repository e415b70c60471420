//! Wallet rows and per-token balance rows.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::chain::ChainType;
use crate::error::Error;
use crate::types::{self, Page, Tags};
use crate::util::snowflake;

/// A managed wallet.
#[derive(Debug, Clone, Serialize)]
pub struct Wallet {
    /// Snowflake id.
    pub id: i64,
    /// Keystore key backing this wallet.
    pub key_id: String,
    /// Chain the wallet lives on.
    pub chain_type: ChainType,
    /// Checksum-encoded address.
    pub address: String,
    /// Display name.
    pub name: String,
    /// Free-form labels.
    pub tags: Tags,
    /// Native balance in wei. Never negative.
    pub native_balance: U256,
    /// Highest block observed for this wallet; never moves backward.
    pub last_block_number: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// A wallet's balance of one ERC-20 token.
#[derive(Debug, Clone, Serialize)]
pub struct TokenBalance {
    /// Owning wallet.
    pub wallet_id: i64,
    /// Checksum-encoded token contract address.
    pub token_address: String,
    /// Balance in token base units. Never negative.
    pub balance: U256,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    id: i64,
    key_id: String,
    chain_type: String,
    address: String,
    name: String,
    tags: String,
    native_balance: String,
    last_block_number: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WalletRow {
    fn into_wallet(self) -> Result<Wallet, Error> {
        Ok(Wallet {
            id: self.id,
            key_id: self.key_id,
            chain_type: self.chain_type.parse()?,
            address: self.address,
            name: self.name,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            native_balance: super::parse_u256("native_balance", &self.native_balance)?,
            last_block_number: self.last_block_number.max(0) as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WalletCursor {
    after_id: i64,
}

/// Parameters for inserting a wallet.
#[derive(Debug, Clone)]
pub struct NewWallet {
    /// Keystore key backing the wallet.
    pub key_id: String,
    /// Chain the wallet lives on.
    pub chain_type: ChainType,
    /// Checksum-encoded address derived from the key.
    pub address: String,
    /// Display name.
    pub name: String,
    /// Free-form labels.
    pub tags: Tags,
}

/// CRUD and balance updates for wallet rows.
#[derive(Debug, Clone)]
pub struct WalletRepository {
    pool: SqlitePool,
}

impl WalletRepository {
    /// Build a repository over an open pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a wallet row.
    ///
    /// # Errors
    /// [`Error::WalletAlreadyExists`] when a live row already covers the
    /// same `(chain_type, lowercase(address))`.
    pub async fn create(&self, new: NewWallet) -> Result<Wallet, Error> {
        let now = Utc::now();
        let id = snowflake::next_id();
        let tags = serde_json::to_string(&new.tags).expect("tags serialize");
        sqlx::query(
            "INSERT INTO wallets \
             (id, key_id, chain_type, address, name, tags, native_balance, last_block_number, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '0', 0, ?7, ?7)",
        )
        .bind(id)
        .bind(&new.key_id)
        .bind(new.chain_type.to_string())
        .bind(&new.address)
        .bind(&new.name)
        .bind(&tags)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::WalletAlreadyExists(new.address.clone())
            }
            _ => Error::Database(e),
        })?;
        self.get(id).await
    }

    /// Fetch a live wallet by id.
    pub async fn get(&self, id: i64) -> Result<Wallet, Error> {
        sqlx::query_as::<_, WalletRow>(
            "SELECT id, key_id, chain_type, address, name, tags, native_balance, \
                    last_block_number, created_at, updated_at \
             FROM wallets WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::WalletNotFound(id))?
        .into_wallet()
    }

    /// Find a live wallet by address, case-insensitively.
    pub async fn find_by_address(
        &self,
        chain_type: ChainType,
        address: &str,
    ) -> Result<Option<Wallet>, Error> {
        sqlx::query_as::<_, WalletRow>(
            "SELECT id, key_id, chain_type, address, name, tags, native_balance, \
                    last_block_number, created_at, updated_at \
             FROM wallets \
             WHERE chain_type = ?1 AND lower(address) = lower(?2) AND deleted_at IS NULL",
        )
        .bind(chain_type.to_string())
        .bind(address)
        .fetch_optional(&self.pool)
        .await?
        .map(WalletRow::into_wallet)
        .transpose()
    }

    /// Page through live wallets in id (creation) order.
    pub async fn list(&self, limit: u32, token: Option<&str>) -> Result<Page<Wallet>, Error> {
        let limit = limit.clamp(1, 1000);
        let after_id = match token {
            Some(token) => types::decode_token::<WalletCursor>(token)?.after_id,
            None => 0,
        };
        let mut rows = sqlx::query_as::<_, WalletRow>(
            "SELECT id, key_id, chain_type, address, name, tags, native_balance, \
                    last_block_number, created_at, updated_at \
             FROM wallets WHERE id > ?1 AND deleted_at IS NULL ORDER BY id LIMIT ?2",
        )
        .bind(after_id)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.pool)
        .await?;

        let next_token = if rows.len() > limit as usize {
            rows.truncate(limit as usize);
            rows.last()
                .map(|last| types::encode_token(&WalletCursor { after_id: last.id }))
        } else {
            None
        };
        let items = rows
            .into_iter()
            .map(WalletRow::into_wallet)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { items, next_token })
    }

    /// Rename or relabel a wallet.
    pub async fn update_meta(&self, id: i64, name: &str, tags: &Tags) -> Result<Wallet, Error> {
        let tags = serde_json::to_string(tags).expect("tags serialize");
        let result = sqlx::query(
            "UPDATE wallets SET name = ?1, tags = ?2, updated_at = ?3 \
             WHERE id = ?4 AND deleted_at IS NULL",
        )
        .bind(name)
        .bind(tags)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::WalletNotFound(id));
        }
        self.get(id).await
    }

    /// Tombstone a wallet. Its address becomes reusable immediately.
    pub async fn soft_delete(&self, id: i64) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE wallets SET deleted_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::WalletNotFound(id));
        }
        Ok(())
    }

    /// Overwrite the native balance.
    pub async fn update_balance(&self, id: i64, balance: U256) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE wallets SET native_balance = ?1, updated_at = ?2 \
             WHERE id = ?3 AND deleted_at IS NULL",
        )
        .bind(balance.to_string())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::WalletNotFound(id));
        }
        Ok(())
    }

    /// Advance the watermark, refusing to move it backward.
    ///
    /// Returns whether the watermark actually moved.
    pub async fn advance_last_block(&self, id: i64, block_number: u64) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE wallets SET last_block_number = ?1, updated_at = ?2 \
             WHERE id = ?3 AND deleted_at IS NULL AND last_block_number < ?1",
        )
        .bind(block_number as i64)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current balance of `token_address` for the wallet; zero when absent.
    pub async fn token_balance(&self, wallet_id: i64, token_address: &str) -> Result<U256, Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT balance FROM token_balances \
             WHERE wallet_id = ?1 AND lower(token_address) = lower(?2)",
        )
        .bind(wallet_id)
        .bind(token_address)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((balance,)) => super::parse_u256("balance", &balance),
            None => Ok(U256::ZERO),
        }
    }

    /// Atomically insert or overwrite a `(wallet, token)` balance.
    pub async fn upsert_token_balance(
        &self,
        wallet_id: i64,
        token_address: &str,
        balance: U256,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO token_balances (wallet_id, token_address, balance, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (wallet_id, token_address) \
             DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at",
        )
        .bind(wallet_id)
        .bind(token_address)
        .bind(balance.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All token balances held by a wallet.
    pub async fn list_token_balances(&self, wallet_id: i64) -> Result<Vec<TokenBalance>, Error> {
        let rows: Vec<(i64, String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT wallet_id, token_address, balance, updated_at \
             FROM token_balances WHERE wallet_id = ?1 ORDER BY token_address",
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(wallet_id, token_address, balance, updated_at)| {
                Ok(TokenBalance {
                    wallet_id,
                    token_address,
                    balance: super::parse_u256("balance", &balance)?,
                    updated_at,
                })
            })
            .collect()
    }
}
