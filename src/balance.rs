//! Balance bookkeeping from observed transactions.
//!
//! Deltas floor at zero: the explorer replay and the live subscription can
//! race, and a temporarily out-of-order delivery must never surface a
//! negative balance. Idempotency per `(wallet, tx)` is the monitor's job via
//! its exists-by-hash skip.

use alloy::primitives::U256;

use crate::chain::ChainType;
use crate::decoder::Erc20Transfer;
use crate::error::Error;
use crate::evm::address;
use crate::evm::tx::{Transaction, TransactionType};
use crate::store::wallets::{Wallet, WalletRepository};

/// Applies native and token deltas from decoded transactions.
#[derive(Debug, Clone)]
pub struct BalanceService {
    wallets: WalletRepository,
}

impl BalanceService {
    /// Build a balance service over the wallet repository.
    pub fn new(wallets: WalletRepository) -> Self {
        Self { wallets }
    }

    /// Apply a native transfer to the involved wallet, if any.
    ///
    /// Only `Native` transactions move native balances here; gas spent by
    /// token transfers is handled in [`BalanceService::update_token_balance`].
    /// When both sides are managed the sender wins, because gas accounting
    /// applies there.
    pub async fn update_wallet_balance(&self, tx: &Transaction) -> Result<(), Error> {
        if tx.tx_type != TransactionType::Native {
            return Ok(());
        }
        if let Some(wallet) = self.find_wallet(tx.chain_type, tx.from).await? {
            let spent = tx.value + tx.gas_cost();
            let updated = wallet.native_balance.saturating_sub(spent);
            self.wallets.update_balance(wallet.id, updated).await?;
            tracing::debug!(
                wallet_id = wallet.id,
                tx = ?tx.hash,
                balance = %updated,
                "outgoing native transfer applied"
            );
            return Ok(());
        }
        let Some(recipient) = tx.to else {
            return Ok(());
        };
        if let Some(wallet) = self.find_wallet(tx.chain_type, recipient).await? {
            let updated = wallet.native_balance + tx.value;
            self.wallets.update_balance(wallet.id, updated).await?;
            tracing::debug!(
                wallet_id = wallet.id,
                tx = ?tx.hash,
                balance = %updated,
                "incoming native transfer applied"
            );
        }
        Ok(())
    }

    /// Apply a decoded ERC-20 transfer to the involved wallet, if any.
    ///
    /// Outgoing transfers additionally deduct the gas cost from the native
    /// balance; a failure there is logged but does not fail the token update.
    pub async fn update_token_balance(
        &self,
        chain_type: ChainType,
        transfer: &Erc20Transfer,
    ) -> Result<(), Error> {
        let token = address::checksum(transfer.token_address);

        if let Some(wallet) = self.find_wallet(chain_type, transfer.from).await? {
            let current = self.wallets.token_balance(wallet.id, &token).await?;
            let updated = current.saturating_sub(transfer.amount);
            self.wallets
                .upsert_token_balance(wallet.id, &token, updated)
                .await?;
            tracing::debug!(
                wallet_id = wallet.id,
                %token,
                balance = %updated,
                "outgoing token transfer applied"
            );

            if transfer.gas_used > 0 && transfer.gas_price > 0 {
                let gas_cost = U256::from(transfer.gas_used) * U256::from(transfer.gas_price);
                let native = wallet.native_balance.saturating_sub(gas_cost);
                if let Err(error) = self.wallets.update_balance(wallet.id, native).await {
                    tracing::warn!(
                        wallet_id = wallet.id,
                        %error,
                        "token transfer applied but native gas deduction failed"
                    );
                }
            }
            return Ok(());
        }

        if let Some(wallet) = self.find_wallet(chain_type, transfer.to).await? {
            let current = self.wallets.token_balance(wallet.id, &token).await?;
            let updated = current + transfer.amount;
            self.wallets
                .upsert_token_balance(wallet.id, &token, updated)
                .await?;
            tracing::debug!(
                wallet_id = wallet.id,
                %token,
                balance = %updated,
                "incoming token transfer applied"
            );
        }
        Ok(())
    }

    async fn find_wallet(
        &self,
        chain_type: ChainType,
        address: alloy::primitives::Address,
    ) -> Result<Option<Wallet>, Error> {
        self.wallets
            .find_by_address(chain_type, &address::checksum(address))
            .await
    }
}
