//! Multisig vault lifecycle: deployment, token allowlist, time-locked
//! recovery.
//!
//! A vault is a row tracking one on-chain multisig contract. Status moves
//! through `pending → deploying → active`, recovery swings `active →
//! recovering → {active, recovered}`, and any non-terminal state can fail.
//! The background jobs in [`jobs`] advance deployments and finalize expired
//! recoveries.

pub mod jobs;

use alloy::dyn_abi::DynSolValue;
use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::chain::{ChainRegistry, ChainType};
use crate::client::explorer::ExplorerProvider;
use crate::client::ClientProvider;
use crate::contract::ContractManager;
use crate::decoder::MultisigMethod;
use crate::error::Error;
use crate::evm::address as evm_address;
use crate::evm::tx::TransactionOptions;
use crate::evm::wallet::EvmWallet;
use crate::keystore::Keystore;
use crate::store::vaults::{NewVault, VaultRepository};
use crate::store::wallets::{Wallet, WalletRepository};
use crate::types::Page;

/// Mandatory delay between requesting and finalizing recovery.
pub const RECOVERY_TIMELOCK_HOURS: i64 = 72;

/// Signer-set bounds enforced at creation.
pub const MIN_SIGNERS: usize = 2;
/// Upper signer bound enforced at creation.
pub const MAX_SIGNERS: usize = 7;

/// ABI of the multisig surface the service drives directly.
static MULTISIG_ABI: Lazy<JsonAbi> = Lazy::new(|| {
    serde_json::from_str(
        r#"[
            { "type": "function", "name": "requestRecovery", "inputs": [], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": "cancelRecovery", "inputs": [], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": "executeRecovery", "inputs": [], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": "addSupportedToken", "inputs": [{ "name": "token", "type": "address" }], "outputs": [], "stateMutability": "nonpayable" },
            { "type": "function", "name": "removeSupportedToken", "inputs": [{ "name": "token", "type": "address" }], "outputs": [], "stateMutability": "nonpayable" }
        ]"#,
    )
    .expect("multisig abi parses")
});

/// Where a vault stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultStatus {
    /// Created, deployment not yet broadcast.
    #[serde(rename = "pending")]
    Pending,
    /// Deployment broadcast, awaiting the receipt.
    #[serde(rename = "deploying")]
    Deploying,
    /// Deployed and operational.
    #[serde(rename = "active")]
    Active,
    /// Recovery requested, timelock running.
    #[serde(rename = "recovering")]
    Recovering,
    /// Recovery finalized. Terminal.
    #[serde(rename = "recovered")]
    Recovered,
    /// Parked by an operator.
    #[serde(rename = "paused")]
    Paused,
    /// Deployment or lifecycle failure. Terminal.
    #[serde(rename = "failed")]
    Failed,
}

impl VaultStatus {
    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VaultStatus::Recovered | VaultStatus::Failed)
    }
}

impl Display for VaultStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            VaultStatus::Pending => "pending",
            VaultStatus::Deploying => "deploying",
            VaultStatus::Active => "active",
            VaultStatus::Recovering => "recovering",
            VaultStatus::Recovered => "recovered",
            VaultStatus::Paused => "paused",
            VaultStatus::Failed => "failed",
        };
        write!(f, "{text}")
    }
}

impl FromStr for VaultStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VaultStatus::Pending),
            "deploying" => Ok(VaultStatus::Deploying),
            "active" => Ok(VaultStatus::Active),
            "recovering" => Ok(VaultStatus::Recovering),
            "recovered" => Ok(VaultStatus::Recovered),
            "paused" => Ok(VaultStatus::Paused),
            "failed" => Ok(VaultStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown vault status {other}"))),
        }
    }
}

/// A multisig vault row.
#[derive(Debug, Clone, Serialize)]
pub struct Vault {
    /// Snowflake id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Artifact name of the deployed contract.
    pub contract_name: String,
    /// Wallet that funded and signed the deployment.
    pub owner_wallet_id: i64,
    /// Chain the vault lives on.
    pub chain_type: ChainType,
    /// Deployed contract address, once active.
    pub contract_address: Option<String>,
    /// Deploy transaction hash, once broadcast.
    pub tx_hash: Option<String>,
    /// Checksum-encoded signer addresses.
    pub signers: Vec<String>,
    /// Required approvals.
    pub quorum: u32,
    /// Address recovery funnels funds to.
    pub recovery_address: String,
    /// Persisted token allowlist.
    pub whitelisted_tokens: Vec<String>,
    /// Lifecycle status.
    pub status: VaultStatus,
    /// When recovery was requested, while `recovering`.
    pub recovery_request_at: Option<DateTime<Utc>>,
    /// Why the vault failed, while `failed`.
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Vault {
    /// When the running recovery may be finalized.
    pub fn recovery_deadline(&self) -> Option<DateTime<Utc>> {
        self.recovery_request_at
            .map(|at| at + Duration::hours(RECOVERY_TIMELOCK_HOURS))
    }

    /// Whether the recovery timelock has expired as of `now`.
    pub fn timelock_expired(&self, now: DateTime<Utc>) -> bool {
        self.recovery_deadline().is_some_and(|deadline| now >= deadline)
    }
}

/// Parameters for [`VaultService::create_vault`].
#[derive(Debug, Clone)]
pub struct CreateVaultParams {
    /// Display name.
    pub name: String,
    /// Artifact name of the multisig contract.
    pub contract_name: String,
    /// Wallet funding and signing the deployment.
    pub owner_wallet_id: i64,
    /// Signer addresses, 2 to 7 of them.
    pub signers: Vec<String>,
    /// Required approvals.
    pub quorum: u32,
    /// Recovery destination address.
    pub recovery_address: String,
    /// Tokens allowlisted at deployment.
    pub whitelisted_tokens: Vec<String>,
}

/// Validated constructor arguments for the multisig contract.
struct ValidatedParams {
    signers: Vec<Address>,
    recovery: Address,
    tokens: Vec<Address>,
}

/// Enforce the signer and quorum invariants.
///
/// `max(⌈(N+1)/2⌉, 2) ≤ quorum ≤ N` with `2 ≤ N ≤ 7`, all addresses valid
/// and distinct.
fn validate_params(params: &CreateVaultParams) -> Result<ValidatedParams, Error> {
    let count = params.signers.len();
    if !(MIN_SIGNERS..=MAX_SIGNERS).contains(&count) {
        return Err(Error::InvalidInput(format!(
            "signer count must be between {MIN_SIGNERS} and {MAX_SIGNERS}, got {count}"
        )));
    }
    let mut signers = Vec::with_capacity(count);
    for signer in &params.signers {
        let address = evm_address::parse_address(signer)?;
        if signers.contains(&address) {
            return Err(Error::InvalidInput(format!("duplicate signer {signer}")));
        }
        signers.push(address);
    }
    let min_quorum = (((count + 1).div_ceil(2)) as u32).max(2);
    if params.quorum < min_quorum || params.quorum as usize > count {
        return Err(Error::InvalidInput(format!(
            "quorum must be between {min_quorum} and {count}, got {}",
            params.quorum
        )));
    }
    let recovery = evm_address::parse_address(&params.recovery_address)?;
    let tokens = params
        .whitelisted_tokens
        .iter()
        .map(|token| evm_address::parse_address(token))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ValidatedParams {
        signers,
        recovery,
        tokens,
    })
}

/// Vault state machine and on-chain orchestration.
pub struct VaultService {
    vaults: VaultRepository,
    wallets: WalletRepository,
    keystore: Arc<Keystore>,
    registry: ChainRegistry,
    clients: Arc<dyn ClientProvider>,
    explorers: Arc<dyn ExplorerProvider>,
    artifacts_root: PathBuf,
}

impl VaultService {
    /// Wire the service to its collaborators.
    pub fn new(
        vaults: VaultRepository,
        wallets: WalletRepository,
        keystore: Arc<Keystore>,
        registry: ChainRegistry,
        clients: Arc<dyn ClientProvider>,
        explorers: Arc<dyn ExplorerProvider>,
        artifacts_root: PathBuf,
    ) -> Self {
        Self {
            vaults,
            wallets,
            keystore,
            registry,
            clients,
            explorers,
            artifacts_root,
        }
    }

    /// The vault repository, shared with the polling jobs.
    pub(crate) fn vaults(&self) -> &VaultRepository {
        &self.vaults
    }

    /// The wallet repository, shared with the polling jobs.
    pub(crate) fn wallets(&self) -> &WalletRepository {
        &self.wallets
    }

    /// Validate, deploy the multisig contract, and persist the vault in
    /// `deploying` status carrying the deploy transaction hash.
    pub async fn create_vault(&self, params: CreateVaultParams) -> Result<Vault, Error> {
        let validated = validate_params(&params)?;
        let owner = self.wallets.get(params.owner_wallet_id).await?;
        let manager = self.manager_for(&owner)?;
        let artifact = manager.load_artifact(&params.contract_name)?;

        let vault = self
            .vaults
            .create(NewVault {
                name: params.name.clone(),
                contract_name: params.contract_name.clone(),
                owner_wallet_id: owner.id,
                chain_type: owner.chain_type,
                signers: validated
                    .signers
                    .iter()
                    .map(|s| evm_address::checksum(*s))
                    .collect(),
                quorum: params.quorum,
                recovery_address: evm_address::checksum(validated.recovery),
                whitelisted_tokens: validated
                    .tokens
                    .iter()
                    .map(|t| evm_address::checksum(*t))
                    .collect(),
            })
            .await?;

        let constructor_args = [
            DynSolValue::Array(
                validated
                    .signers
                    .iter()
                    .map(|s| DynSolValue::Address(*s))
                    .collect(),
            ),
            DynSolValue::Uint(alloy::primitives::U256::from(params.quorum), 256),
            DynSolValue::Address(validated.recovery),
            DynSolValue::Array(
                validated
                    .tokens
                    .iter()
                    .map(|t| DynSolValue::Address(*t))
                    .collect(),
            ),
        ];
        let tx_hash = match manager
            .deploy(&artifact, &constructor_args, TransactionOptions::default())
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(error) => {
                if let Err(db_error) = self
                    .vaults
                    .set_failed(vault.id, &format!("deployment broadcast failed: {error}"))
                    .await
                {
                    tracing::error!(vault_id = vault.id, %db_error, "failed to mark vault failed");
                }
                return Err(error);
            }
        };

        self.vaults
            .set_deploying(vault.id, &tx_hash.to_string())
            .await
            .map_err(|db_error| Error::after_broadcast(tx_hash.to_string(), db_error))?;
        tracing::info!(vault_id = vault.id, tx = %tx_hash, "vault deployment broadcast");
        self.vaults.get(vault.id).await
    }

    /// Execute `requestRecovery()` and move the vault to `recovering`.
    pub async fn start_recovery(&self, vault_id: i64) -> Result<Vault, Error> {
        let vault = self.vaults.get(vault_id).await?;
        if vault.status != VaultStatus::Active {
            return Err(Error::InvalidStateTransition {
                from: vault.status,
                to: VaultStatus::Recovering,
            });
        }
        let tx_hash = self
            .execute_vault_method(&vault, MultisigMethod::RequestRecovery, &[])
            .await?;
        self.vaults
            .set_recovering(vault.id, Utc::now())
            .await
            .map_err(|db_error| Error::after_broadcast(tx_hash.to_string(), db_error))?;
        tracing::info!(vault_id, tx = %tx_hash, "recovery requested");
        self.vaults.get(vault_id).await
    }

    /// Execute `cancelRecovery()` before the timelock expires and return the
    /// vault to `active`.
    pub async fn cancel_recovery(&self, vault_id: i64) -> Result<Vault, Error> {
        let vault = self.vaults.get(vault_id).await?;
        if vault.status != VaultStatus::Recovering {
            return Err(Error::InvalidStateTransition {
                from: vault.status,
                to: VaultStatus::Active,
            });
        }
        if vault.timelock_expired(Utc::now()) {
            return Err(Error::OperationFailed(
                "recovery timelock has expired; recovery can only be executed".to_string(),
            ));
        }
        let tx_hash = self
            .execute_vault_method(&vault, MultisigMethod::CancelRecovery, &[])
            .await?;
        self.vaults
            .clear_recovering(vault.id)
            .await
            .map_err(|db_error| Error::after_broadcast(tx_hash.to_string(), db_error))?;
        tracing::info!(vault_id, tx = %tx_hash, "recovery cancelled");
        self.vaults.get(vault_id).await
    }

    /// Execute `executeRecovery()` once the timelock has expired and move the
    /// vault to `recovered`.
    pub async fn execute_recovery(&self, vault_id: i64) -> Result<Vault, Error> {
        let vault = self.vaults.get(vault_id).await?;
        if vault.status != VaultStatus::Recovering {
            return Err(Error::InvalidStateTransition {
                from: vault.status,
                to: VaultStatus::Recovered,
            });
        }
        if !vault.timelock_expired(Utc::now()) {
            return Err(Error::OperationFailed(format!(
                "recovery timelock expires at {:?}",
                vault.recovery_deadline()
            )));
        }
        let tx_hash = self
            .execute_vault_method(&vault, MultisigMethod::ExecuteRecovery, &[])
            .await?;
        self.vaults
            .set_recovered(vault.id)
            .await
            .map_err(|db_error| Error::after_broadcast(tx_hash.to_string(), db_error))?;
        tracing::info!(vault_id, tx = %tx_hash, "recovery executed");
        self.vaults.get(vault_id).await
    }

    /// Execute `addSupportedToken(token)` and record the allowlist entry.
    pub async fn add_supported_token(&self, vault_id: i64, token: &str) -> Result<Vault, Error> {
        let vault = self.require_active(vault_id).await?;
        let token = evm_address::parse_address(token)?;
        let checksummed = evm_address::checksum(token);
        if vault.whitelisted_tokens.contains(&checksummed) {
            return Ok(vault);
        }
        let tx_hash = self
            .execute_vault_method(
                &vault,
                MultisigMethod::AddSupportedToken,
                &[DynSolValue::Address(token)],
            )
            .await?;
        let mut tokens = vault.whitelisted_tokens.clone();
        tokens.push(checksummed);
        self.vaults
            .update_tokens(vault.id, &tokens)
            .await
            .map_err(|db_error| Error::after_broadcast(tx_hash.to_string(), db_error))?;
        self.vaults.get(vault_id).await
    }

    /// Execute `removeSupportedToken(token)` and drop the allowlist entry.
    pub async fn remove_supported_token(
        &self,
        vault_id: i64,
        token: &str,
    ) -> Result<Vault, Error> {
        let vault = self.require_active(vault_id).await?;
        let token = evm_address::parse_address(token)?;
        let checksummed = evm_address::checksum(token);
        if !vault.whitelisted_tokens.contains(&checksummed) {
            return Ok(vault);
        }
        let tx_hash = self
            .execute_vault_method(
                &vault,
                MultisigMethod::RemoveSupportedToken,
                &[DynSolValue::Address(token)],
            )
            .await?;
        let tokens: Vec<String> = vault
            .whitelisted_tokens
            .iter()
            .filter(|entry| **entry != checksummed)
            .cloned()
            .collect();
        self.vaults
            .update_tokens(vault.id, &tokens)
            .await
            .map_err(|db_error| Error::after_broadcast(tx_hash.to_string(), db_error))?;
        self.vaults.get(vault_id).await
    }

    /// Park or resume a vault (`active ↔ paused`). Bookkeeping only.
    pub async fn set_paused(&self, vault_id: i64, paused: bool) -> Result<Vault, Error> {
        self.vaults.set_paused(vault_id, paused).await?;
        self.vaults.get(vault_id).await
    }

    /// Fetch a vault.
    pub async fn get_vault(&self, vault_id: i64) -> Result<Vault, Error> {
        self.vaults.get(vault_id).await
    }

    /// Page through vaults.
    pub async fn list_vaults(&self, limit: u32, token: Option<&str>) -> Result<Page<Vault>, Error> {
        self.vaults.list(limit, token).await
    }

    /// Tombstone a vault.
    pub async fn delete_vault(&self, vault_id: i64) -> Result<(), Error> {
        self.vaults.soft_delete(vault_id).await
    }

    async fn require_active(&self, vault_id: i64) -> Result<Vault, Error> {
        let vault = self.vaults.get(vault_id).await?;
        if vault.status != VaultStatus::Active {
            return Err(Error::InvalidStateTransition {
                from: vault.status,
                to: VaultStatus::Active,
            });
        }
        Ok(vault)
    }

    async fn execute_vault_method(
        &self,
        vault: &Vault,
        method: MultisigMethod,
        args: &[DynSolValue],
    ) -> Result<alloy::primitives::B256, Error> {
        let contract_address = vault
            .contract_address
            .as_deref()
            .ok_or_else(|| Error::OperationFailed("vault has no contract address".to_string()))?;
        let contract_address = evm_address::parse_address(contract_address)?;
        let owner = self.wallets.get(vault.owner_wallet_id).await?;
        let manager = self.manager_for(&owner)?;
        manager
            .execute_method(
                contract_address,
                Some(&MULTISIG_ABI),
                method.name(),
                TransactionOptions::default(),
                args,
            )
            .await
    }

    /// Build a contract manager signing with `wallet`'s key on its chain.
    pub(crate) fn manager_for(&self, wallet: &Wallet) -> Result<ContractManager, Error> {
        let chain = self.registry.get(wallet.chain_type)?.clone();
        let client = self.clients.client(wallet.chain_type)?;
        let explorer = self.explorers.explorer(wallet.chain_type)?;
        let evm_wallet = EvmWallet::new(Arc::clone(&self.keystore), chain, wallet.key_id.clone());
        Ok(ContractManager::new(
            self.artifacts_root.clone(),
            evm_wallet,
            client,
            explorer,
        ))
    }
}

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests {
    use super::test_support::{multisig_artifact_dir, ScriptedChain, SIGNER_A, SIGNER_B, SIGNER_C};
    use super::*;
    use crate::store::testing;
    use crate::store::wallets::NewWallet;
    use crate::types::Tags;
    use chrono::Duration;

    async fn fixture() -> (VaultService, ScriptedChain, i64) {
        let pool = testing::pool().await;
        let chain = ScriptedChain::new(pool.clone()).await;
        let wallets = WalletRepository::new(pool.clone());
        let owner_address = chain.owner_address().await;
        let owner = wallets
            .create(NewWallet {
                key_id: chain.owner_key_id(),
                chain_type: ChainType::Ethereum,
                address: owner_address,
                name: "vault-owner".to_string(),
                tags: Tags::new(),
            })
            .await
            .expect("owner wallet");
        let service = VaultService::new(
            VaultRepository::new(pool.clone()),
            wallets,
            chain.keystore(),
            chain.registry(),
            chain.client_provider(),
            chain.explorer_provider(),
            multisig_artifact_dir(),
        );
        (service, chain, owner.id)
    }

    fn params(owner_wallet_id: i64) -> CreateVaultParams {
        CreateVaultParams {
            name: "ops-vault".to_string(),
            contract_name: "MultiSigVault".to_string(),
            owner_wallet_id,
            signers: vec![
                SIGNER_A.to_string(),
                SIGNER_B.to_string(),
                SIGNER_C.to_string(),
            ],
            quorum: 2,
            recovery_address: SIGNER_A.to_string(),
            whitelisted_tokens: vec![],
        }
    }

    #[test]
    fn quorum_invariant_matrix() {
        let base = params(1);
        // (signers, quorum, ok)
        let cases = [
            (2, 2, true),
            (2, 1, false),
            (3, 2, true),
            (3, 1, false),
            (3, 4, false),
            (5, 3, true),
            (5, 2, false),
            (7, 4, true),
            (7, 3, false),
            (7, 7, true),
        ];
        for (count, quorum, ok) in cases {
            let mut candidate = base.clone();
            candidate.signers = (0..count)
                .map(|index| format!("0x{:040x}", index + 1))
                .collect();
            candidate.quorum = quorum;
            let result = validate_params(&candidate);
            assert_eq!(result.is_ok(), ok, "signers={count} quorum={quorum}");
        }

        // Signer-count bounds.
        let mut one = base.clone();
        one.signers = vec![SIGNER_A.to_string()];
        one.quorum = 1;
        assert!(validate_params(&one).is_err());
        let mut eight = base.clone();
        eight.signers = (0..8).map(|index| format!("0x{:040x}", index + 1)).collect();
        eight.quorum = 5;
        assert!(validate_params(&eight).is_err());

        // Duplicates and malformed addresses.
        let mut duplicated = base.clone();
        duplicated.signers = vec![SIGNER_A.to_string(), SIGNER_A.to_string()];
        assert!(validate_params(&duplicated).is_err());
        let mut malformed = base;
        malformed.signers = vec![SIGNER_A.to_string(), "nonsense".to_string()];
        assert!(validate_params(&malformed).is_err());
    }

    #[tokio::test]
    async fn create_vault_deploys_and_lands_in_deploying() {
        let (service, chain, owner_id) = fixture().await;
        let vault = service.create_vault(params(owner_id)).await.expect("create");
        assert_eq!(vault.status, VaultStatus::Deploying);
        assert!(vault.tx_hash.is_some());
        assert_eq!(vault.signers.len(), 3);
        assert_eq!(chain.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn create_vault_rejects_bad_quorum_before_any_broadcast() {
        let (service, chain, owner_id) = fixture().await;
        let mut bad = params(owner_id);
        bad.quorum = 1;
        let err = service.create_vault(bad).await.expect_err("invalid quorum");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn recovery_lifecycle_honors_the_timelock() {
        let (service, chain, owner_id) = fixture().await;
        let vault = service.create_vault(params(owner_id)).await.expect("create");
        service
            .vaults()
            .set_active(vault.id, &chain.deployed_contract_address())
            .await
            .expect("activate");

        // Recovery only starts from active.
        let started = service.start_recovery(vault.id).await.expect("start");
        assert_eq!(started.status, VaultStatus::Recovering);
        assert!(started.recovery_request_at.is_some());
        let err = service.start_recovery(vault.id).await.expect_err("already recovering");
        assert!(matches!(err, Error::InvalidStateTransition { .. }));

        // At t0 + 71h59m the timelock still holds.
        service
            .vaults()
            .force_recovery_request_at(
                vault.id,
                Utc::now() - Duration::hours(71) - Duration::minutes(59),
            )
            .await
            .expect("backdate");
        let err = service.execute_recovery(vault.id).await.expect_err("too early");
        assert!(matches!(err, Error::OperationFailed(_)));

        // At t0 + 72h01m it succeeds.
        service
            .vaults()
            .force_recovery_request_at(
                vault.id,
                Utc::now() - Duration::hours(72) - Duration::minutes(1),
            )
            .await
            .expect("backdate");
        let recovered = service.execute_recovery(vault.id).await.expect("execute");
        assert_eq!(recovered.status, VaultStatus::Recovered);
    }

    #[tokio::test]
    async fn cancel_is_only_legal_before_the_deadline() {
        let (service, chain, owner_id) = fixture().await;
        let vault = service.create_vault(params(owner_id)).await.expect("create");
        service
            .vaults()
            .set_active(vault.id, &chain.deployed_contract_address())
            .await
            .expect("activate");
        service.start_recovery(vault.id).await.expect("start");

        // Before the deadline: cancel returns the vault to active.
        let cancelled = service.cancel_recovery(vault.id).await.expect("cancel");
        assert_eq!(cancelled.status, VaultStatus::Active);
        assert!(cancelled.recovery_request_at.is_none());

        // After the deadline: cancel is rejected.
        service.start_recovery(vault.id).await.expect("restart");
        service
            .vaults()
            .force_recovery_request_at(vault.id, Utc::now() - Duration::hours(73))
            .await
            .expect("backdate");
        let err = service.cancel_recovery(vault.id).await.expect_err("expired");
        assert!(matches!(err, Error::OperationFailed(_)));
    }

    #[tokio::test]
    async fn token_allowlist_round_trip() {
        let (service, chain, owner_id) = fixture().await;
        let vault = service.create_vault(params(owner_id)).await.expect("create");
        let token = "0x6B175474E89094C44Da98b954EedeAC495271d0F";

        // Allowlist management requires an active vault.
        let err = service
            .add_supported_token(vault.id, token)
            .await
            .expect_err("not active");
        assert!(matches!(err, Error::InvalidStateTransition { .. }));

        service
            .vaults()
            .set_active(vault.id, &chain.deployed_contract_address())
            .await
            .expect("activate");
        let updated = service.add_supported_token(vault.id, token).await.expect("add");
        assert_eq!(updated.whitelisted_tokens, vec![token.to_string()]);

        // Adding again is a no-op without another broadcast.
        let broadcasts = chain.broadcast_count();
        let unchanged = service.add_supported_token(vault.id, token).await.expect("noop");
        assert_eq!(unchanged.whitelisted_tokens.len(), 1);
        assert_eq!(chain.broadcast_count(), broadcasts);

        let removed = service
            .remove_supported_token(vault.id, token)
            .await
            .expect("remove");
        assert!(removed.whitelisted_tokens.is_empty());
    }

    #[tokio::test]
    async fn pause_round_trip() {
        let (service, chain, owner_id) = fixture().await;
        let vault = service.create_vault(params(owner_id)).await.expect("create");
        service
            .vaults()
            .set_active(vault.id, &chain.deployed_contract_address())
            .await
            .expect("activate");

        let paused = service.set_paused(vault.id, true).await.expect("pause");
        assert_eq!(paused.status, VaultStatus::Paused);
        let resumed = service.set_paused(vault.id, false).await.expect("resume");
        assert_eq!(resumed.status, VaultStatus::Active);
    }
}
