//! Background jobs advancing vault state: the deployment monitor and the
//! recovery executor.
//!
//! Both loops run on a fixed interval, retry forever, and treat transient
//! RPC or database errors as "log and revisit on the next tick". A vault is
//! only moved when the chain has an authoritative answer.

use alloy::primitives::B256;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::Error;
use crate::evm::address as evm_address;
use crate::vault::{VaultService, VaultStatus};

/// Default deployment-monitor interval.
pub const DEFAULT_DEPLOYMENT_INTERVAL: Duration = Duration::from_secs(15);
/// Default recovery-executor interval.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Owns the two polling loops.
pub struct VaultJobs {
    service: Arc<VaultService>,
    deployment_interval: Duration,
    recovery_interval: Duration,
}

impl VaultJobs {
    /// Configure the jobs over a shared vault service.
    pub fn new(
        service: Arc<VaultService>,
        deployment_interval: Duration,
        recovery_interval: Duration,
    ) -> Self {
        Self {
            service,
            deployment_interval,
            recovery_interval,
        }
    }

    /// Spawn both loops onto `tracker`; they stop when `cancel` fires.
    pub fn spawn(&self, tracker: &TaskTracker, cancel: CancellationToken) {
        let service = Arc::clone(&self.service);
        let interval = self.deployment_interval;
        let token = cancel.clone();
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(error) = deployment_tick(&service).await {
                    tracing::warn!(%error, "deployment monitor tick failed");
                }
            }
            tracing::debug!("deployment monitor stopped");
        });

        let service = Arc::clone(&self.service);
        let interval = self.recovery_interval;
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(error) = recovery_tick(&service).await {
                    tracing::warn!(%error, "recovery executor tick failed");
                }
            }
            tracing::debug!("recovery executor stopped");
        });
    }
}

/// One pass over `deploying` vaults: check receipts and settle outcomes.
///
/// Transient errors (no receipt yet, RPC failures) leave the vault for the
/// next tick; a reverted receipt fails the vault with a reason.
pub(crate) async fn deployment_tick(service: &VaultService) -> Result<(), Error> {
    let deploying = service.vaults().list_by_status(VaultStatus::Deploying).await?;
    for vault in deploying {
        let Some(tx_hash) = vault.tx_hash.as_deref() else {
            tracing::warn!(vault_id = vault.id, "deploying vault has no tx hash");
            continue;
        };
        let tx_hash = match B256::from_str(tx_hash) {
            Ok(tx_hash) => tx_hash,
            Err(_) => {
                service
                    .vaults()
                    .set_failed(vault.id, "deploy tx hash is corrupt")
                    .await?;
                continue;
            }
        };
        let owner = match service.wallets().get(vault.owner_wallet_id).await {
            Ok(owner) => owner,
            Err(error) => {
                tracing::warn!(vault_id = vault.id, %error, "owner wallet lookup failed");
                continue;
            }
        };
        let manager = match service.manager_for(&owner) {
            Ok(manager) => manager,
            Err(error) => {
                tracing::warn!(vault_id = vault.id, %error, "manager construction failed");
                continue;
            }
        };
        match manager.deployment(tx_hash).await {
            Ok(result) => {
                let address = evm_address::checksum(result.contract_address);
                service.vaults().set_active(vault.id, &address).await?;
                tracing::info!(
                    vault_id = vault.id,
                    contract = %address,
                    block = result.block_number,
                    cost = %result.deployment_cost,
                    "vault deployment confirmed"
                );
            }
            Err(Error::TransactionFailed(reason)) => {
                service.vaults().set_failed(vault.id, &reason).await?;
                tracing::warn!(vault_id = vault.id, %reason, "vault deployment reverted");
            }
            Err(error) => {
                // Not mined yet, hash unknown, or transient RPC trouble;
                // revisit on the next tick.
                tracing::debug!(vault_id = vault.id, %error, "deployment still unsettled");
            }
        }
    }
    Ok(())
}

/// One pass over `recovering` vaults: finalize every expired timelock.
pub(crate) async fn recovery_tick(service: &VaultService) -> Result<(), Error> {
    let now = Utc::now();
    let recovering = service
        .vaults()
        .list_by_status(VaultStatus::Recovering)
        .await?;
    for vault in recovering {
        if !vault.timelock_expired(now) {
            continue;
        }
        match service.execute_recovery(vault.id).await {
            Ok(_) => {
                tracing::info!(vault_id = vault.id, "recovery finalized");
            }
            Err(error) => {
                tracing::warn!(vault_id = vault.id, %error, "recovery execution failed");
            }
        }
    }
    Ok(())
}
