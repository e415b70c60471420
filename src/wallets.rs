//! Wallet lifecycle: key generation, address derivation, persistence.
//!
//! A managed wallet is a keystore key plus a derived on-chain address. The
//! key is created first; if persisting the row then fails, the orphaned key
//! is removed on a best-effort basis.

use alloy::primitives::U256;
use std::sync::Arc;

use crate::chain::{ChainRegistry, ChainType};
use crate::error::Error;
use crate::evm::wallet::EvmWallet;
use crate::keystore::Keystore;
use crate::store::wallets::{NewWallet, TokenBalance, Wallet, WalletRepository};
use crate::types::{Page, Tags};

/// Wallet CRUD over the keystore and the repository.
pub struct WalletService {
    keystore: Arc<Keystore>,
    registry: ChainRegistry,
    wallets: WalletRepository,
}

impl WalletService {
    /// Wire the service to its collaborators.
    pub fn new(keystore: Arc<Keystore>, registry: ChainRegistry, wallets: WalletRepository) -> Self {
        Self {
            keystore,
            registry,
            wallets,
        }
    }

    /// Generate a key for the chain, derive its address, and persist the
    /// wallet row.
    ///
    /// # Errors
    /// [`Error::KeyAlreadyExists`] when a wallet of this name exists on the
    /// chain; [`Error::WalletAlreadyExists`] when the derived address
    /// collides with a live row.
    pub async fn create_wallet(
        &self,
        chain_type: ChainType,
        name: &str,
        tags: Tags,
    ) -> Result<Wallet, Error> {
        if name.is_empty() {
            return Err(Error::InvalidInput("wallet name must not be empty".to_string()));
        }
        let chain = self.registry.get(chain_type)?.clone();
        let key = self
            .keystore
            .create(
                &format!("wallet-{chain_type}-{name}"),
                chain.key_family(),
                Some(chain.curve()),
                tags.clone(),
            )
            .await?;

        let evm_wallet = EvmWallet::new(Arc::clone(&self.keystore), chain, key.id.clone());
        let address = match evm_wallet.derive_address().await {
            Ok(address) => address,
            Err(error) => {
                self.cleanup_key(&key.id).await;
                return Err(error);
            }
        };

        match self
            .wallets
            .create(NewWallet {
                key_id: key.id.clone(),
                chain_type,
                address,
                name: name.to_string(),
                tags,
            })
            .await
        {
            Ok(wallet) => {
                tracing::info!(wallet_id = wallet.id, address = %wallet.address, "wallet created");
                Ok(wallet)
            }
            Err(error) => {
                self.cleanup_key(&key.id).await;
                Err(error)
            }
        }
    }

    /// Fetch a wallet.
    pub async fn get_wallet(&self, wallet_id: i64) -> Result<Wallet, Error> {
        self.wallets.get(wallet_id).await
    }

    /// Page through wallets.
    pub async fn list_wallets(
        &self,
        limit: u32,
        token: Option<&str>,
    ) -> Result<Page<Wallet>, Error> {
        self.wallets.list(limit, token).await
    }

    /// Rename or relabel a wallet.
    pub async fn update_wallet(
        &self,
        wallet_id: i64,
        name: &str,
        tags: Tags,
    ) -> Result<Wallet, Error> {
        if name.is_empty() {
            return Err(Error::InvalidInput("wallet name must not be empty".to_string()));
        }
        self.wallets.update_meta(wallet_id, name, &tags).await
    }

    /// Tombstone a wallet. The backing key is kept so historical signatures
    /// remain auditable.
    pub async fn delete_wallet(&self, wallet_id: i64) -> Result<(), Error> {
        self.wallets.soft_delete(wallet_id).await
    }

    /// Native balance plus all tracked token balances.
    pub async fn wallet_balances(
        &self,
        wallet_id: i64,
    ) -> Result<(U256, Vec<TokenBalance>), Error> {
        let wallet = self.wallets.get(wallet_id).await?;
        let tokens = self.wallets.list_token_balances(wallet_id).await?;
        Ok((wallet.native_balance, tokens))
    }

    /// Build the signing wallet for a managed wallet row.
    pub fn signing_wallet(&self, wallet: &Wallet) -> Result<EvmWallet, Error> {
        let chain = self.registry.get(wallet.chain_type)?.clone();
        Ok(EvmWallet::new(
            Arc::clone(&self.keystore),
            chain,
            wallet.key_id.clone(),
        ))
    }

    async fn cleanup_key(&self, key_id: &str) {
        if let Err(error) = self.keystore.delete(key_id).await {
            tracing::warn!(key_id, %error, "orphaned key cleanup failed");
        }
    }
}
