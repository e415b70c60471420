//! Vault rows and guarded status transitions.
//!
//! Every transition is a conditional `UPDATE .. WHERE status = ?`; a zero
//! row count means the vault was not in the expected state and surfaces as
//! [`Error::InvalidStateTransition`] with the actual current status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::chain::ChainType;
use crate::error::Error;
use crate::types::{self, Page};
use crate::util::snowflake;
use crate::vault::{Vault, VaultStatus};

#[derive(Debug, sqlx::FromRow)]
struct VaultRow {
    id: i64,
    name: String,
    contract_name: String,
    owner_wallet_id: i64,
    chain_type: String,
    contract_address: Option<String>,
    tx_hash: Option<String>,
    signers: String,
    quorum: i64,
    recovery_address: String,
    whitelisted_tokens: String,
    status: String,
    recovery_request_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const VAULT_COLUMNS: &str =
    "id, name, contract_name, owner_wallet_id, chain_type, contract_address, tx_hash, \
     signers, quorum, recovery_address, whitelisted_tokens, status, recovery_request_at, \
     failure_reason, created_at, updated_at";

impl VaultRow {
    fn into_vault(self) -> Result<Vault, Error> {
        Ok(Vault {
            id: self.id,
            name: self.name,
            contract_name: self.contract_name,
            owner_wallet_id: self.owner_wallet_id,
            chain_type: self.chain_type.parse()?,
            contract_address: self.contract_address,
            tx_hash: self.tx_hash,
            signers: serde_json::from_str(&self.signers).unwrap_or_default(),
            quorum: self.quorum.max(0) as u32,
            recovery_address: self.recovery_address,
            whitelisted_tokens: serde_json::from_str(&self.whitelisted_tokens).unwrap_or_default(),
            status: self.status.parse()?,
            recovery_request_at: self.recovery_request_at,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VaultCursor {
    after_id: i64,
}

/// Parameters for inserting a vault row.
#[derive(Debug, Clone)]
pub struct NewVault {
    /// Display name.
    pub name: String,
    /// Artifact name of the multisig contract.
    pub contract_name: String,
    /// Wallet funding and signing the deployment.
    pub owner_wallet_id: i64,
    /// Chain the vault lives on.
    pub chain_type: ChainType,
    /// Checksum-encoded signer addresses.
    pub signers: Vec<String>,
    /// Required approvals.
    pub quorum: u32,
    /// Address recovery funnels funds to.
    pub recovery_address: String,
    /// Initially allowlisted tokens.
    pub whitelisted_tokens: Vec<String>,
}

/// Vault-table repository.
#[derive(Debug, Clone)]
pub struct VaultRepository {
    pool: SqlitePool,
}

impl VaultRepository {
    /// Build a repository over an open pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new vault in `pending` status.
    pub async fn create(&self, new: NewVault) -> Result<Vault, Error> {
        let id = snowflake::next_id();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO vaults \
             (id, name, contract_name, owner_wallet_id, chain_type, signers, quorum, \
              recovery_address, whitelisted_tokens, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        )
        .bind(id)
        .bind(&new.name)
        .bind(&new.contract_name)
        .bind(new.owner_wallet_id)
        .bind(new.chain_type.to_string())
        .bind(serde_json::to_string(&new.signers).expect("signers serialize"))
        .bind(i64::from(new.quorum))
        .bind(&new.recovery_address)
        .bind(serde_json::to_string(&new.whitelisted_tokens).expect("tokens serialize"))
        .bind(VaultStatus::Pending.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get(id).await
    }

    /// Fetch a live vault by id.
    pub async fn get(&self, id: i64) -> Result<Vault, Error> {
        sqlx::query_as::<_, VaultRow>(&format!(
            "SELECT {VAULT_COLUMNS} FROM vaults WHERE id = ?1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::VaultNotFound(id))?
        .into_vault()
    }

    /// Page through live vaults in id order.
    pub async fn list(&self, limit: u32, token: Option<&str>) -> Result<Page<Vault>, Error> {
        let limit = limit.clamp(1, 1000);
        let after_id = match token {
            Some(token) => types::decode_token::<VaultCursor>(token)?.after_id,
            None => 0,
        };
        let mut rows = sqlx::query_as::<_, VaultRow>(&format!(
            "SELECT {VAULT_COLUMNS} FROM vaults \
             WHERE id > ?1 AND deleted_at IS NULL ORDER BY id LIMIT ?2"
        ))
        .bind(after_id)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.pool)
        .await?;
        let next_token = if rows.len() > limit as usize {
            rows.truncate(limit as usize);
            rows.last()
                .map(|last| types::encode_token(&VaultCursor { after_id: last.id }))
        } else {
            None
        };
        let items = rows
            .into_iter()
            .map(VaultRow::into_vault)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { items, next_token })
    }

    /// All live vaults currently in `status`. Used by the polling jobs.
    pub async fn list_by_status(&self, status: VaultStatus) -> Result<Vec<Vault>, Error> {
        let rows = sqlx::query_as::<_, VaultRow>(&format!(
            "SELECT {VAULT_COLUMNS} FROM vaults \
             WHERE status = ?1 AND deleted_at IS NULL ORDER BY id"
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(VaultRow::into_vault).collect()
    }

    /// `pending → deploying`, recording the deploy transaction hash.
    pub async fn set_deploying(&self, id: i64, tx_hash: &str) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE vaults SET status = ?1, tx_hash = ?2, updated_at = ?3 \
             WHERE id = ?4 AND status = ?5 AND deleted_at IS NULL",
        )
        .bind(VaultStatus::Deploying.to_string())
        .bind(tx_hash)
        .bind(Utc::now())
        .bind(id)
        .bind(VaultStatus::Pending.to_string())
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), id, VaultStatus::Deploying)
            .await
    }

    /// `deploying → active`, recording the deployed contract address.
    pub async fn set_active(&self, id: i64, contract_address: &str) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE vaults SET status = ?1, contract_address = ?2, updated_at = ?3 \
             WHERE id = ?4 AND status = ?5 AND deleted_at IS NULL",
        )
        .bind(VaultStatus::Active.to_string())
        .bind(contract_address)
        .bind(Utc::now())
        .bind(id)
        .bind(VaultStatus::Deploying.to_string())
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), id, VaultStatus::Active)
            .await
    }

    /// `active → recovering`, stamping the request time.
    pub async fn set_recovering(
        &self,
        id: i64,
        requested_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE vaults SET status = ?1, recovery_request_at = ?2, updated_at = ?3 \
             WHERE id = ?4 AND status = ?5 AND deleted_at IS NULL",
        )
        .bind(VaultStatus::Recovering.to_string())
        .bind(requested_at)
        .bind(Utc::now())
        .bind(id)
        .bind(VaultStatus::Active.to_string())
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), id, VaultStatus::Recovering)
            .await
    }

    /// `recovering → active`, clearing the request time (cancel path).
    pub async fn clear_recovering(&self, id: i64) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE vaults SET status = ?1, recovery_request_at = NULL, updated_at = ?2 \
             WHERE id = ?3 AND status = ?4 AND deleted_at IS NULL",
        )
        .bind(VaultStatus::Active.to_string())
        .bind(Utc::now())
        .bind(id)
        .bind(VaultStatus::Recovering.to_string())
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), id, VaultStatus::Active)
            .await
    }

    /// `recovering → recovered` (finalize path).
    pub async fn set_recovered(&self, id: i64) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE vaults SET status = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = ?4 AND deleted_at IS NULL",
        )
        .bind(VaultStatus::Recovered.to_string())
        .bind(Utc::now())
        .bind(id)
        .bind(VaultStatus::Recovering.to_string())
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), id, VaultStatus::Recovered)
            .await
    }

    /// `active ↔ paused`.
    pub async fn set_paused(&self, id: i64, paused: bool) -> Result<(), Error> {
        let (from, to) = if paused {
            (VaultStatus::Active, VaultStatus::Paused)
        } else {
            (VaultStatus::Paused, VaultStatus::Active)
        };
        let result = sqlx::query(
            "UPDATE vaults SET status = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = ?4 AND deleted_at IS NULL",
        )
        .bind(to.to_string())
        .bind(Utc::now())
        .bind(id)
        .bind(from.to_string())
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), id, to).await
    }

    /// Any non-terminal status → `failed`, with a reason.
    pub async fn set_failed(&self, id: i64, reason: &str) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE vaults SET status = ?1, failure_reason = ?2, updated_at = ?3 \
             WHERE id = ?4 AND status NOT IN (?5, ?6) AND deleted_at IS NULL",
        )
        .bind(VaultStatus::Failed.to_string())
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .bind(VaultStatus::Recovered.to_string())
        .bind(VaultStatus::Failed.to_string())
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), id, VaultStatus::Failed)
            .await
    }

    /// Overwrite the persisted token allowlist.
    pub async fn update_tokens(&self, id: i64, tokens: &[String]) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE vaults SET whitelisted_tokens = ?1, updated_at = ?2 \
             WHERE id = ?3 AND deleted_at IS NULL",
        )
        .bind(serde_json::to_string(tokens).expect("tokens serialize"))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::VaultNotFound(id));
        }
        Ok(())
    }

    /// Tombstone a vault.
    pub async fn soft_delete(&self, id: i64) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE vaults SET deleted_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::VaultNotFound(id));
        }
        Ok(())
    }

    /// Backdate the recovery request time. Test and operator tooling only.
    #[cfg(test)]
    pub(crate) async fn force_recovery_request_at(
        &self,
        id: i64,
        requested_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE vaults SET recovery_request_at = ?1 WHERE id = ?2")
            .bind(requested_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn check_transition(
        &self,
        rows_affected: u64,
        id: i64,
        to: VaultStatus,
    ) -> Result<(), Error> {
        if rows_affected > 0 {
            return Ok(());
        }
        let current = self.get(id).await?;
        Err(Error::InvalidStateTransition {
            from: current.status,
            to,
        })
    }
}
