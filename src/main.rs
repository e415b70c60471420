//! Vault0 service entrypoint.
//!
//! Boot order: `.env` → telemetry → config → database + migrations →
//! keystore → chain registry → client/explorer pools → wallet monitor +
//! vault polling jobs, then wait for SIGINT/SIGTERM and cancel everything.

use dotenvy::dotenv;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

use vault0::balance::BalanceService;
use vault0::client::explorer::ExplorerPool;
use vault0::client::ClientPool;
use vault0::config::Config;
use vault0::keystore::Keystore;
use vault0::monitor::{MonitorSettings, WalletMonitor};
use vault0::sig_down::SigDown;
use vault0::store;
use vault0::store::transactions::TransactionRepository;
use vault0::store::vaults::VaultRepository;
use vault0::store::wallets::WalletRepository;
use vault0::telemetry::Telemetry;
use vault0::vault::jobs::VaultJobs;
use vault0::vault::VaultService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;
    let encryptor = config.encryptor()?;
    let registry = config.chain_registry();
    if registry.is_empty() {
        tracing::warn!("no blockchains configured; monitoring will be idle");
    }

    let pool = store::connect(&config.db_path).await?;
    let keystore = Arc::new(Keystore::new(pool.clone(), encryptor));
    let wallets = WalletRepository::new(pool.clone());
    let transactions = TransactionRepository::new(pool.clone());
    let vaults = VaultRepository::new(pool.clone());
    let balances = BalanceService::new(wallets.clone());

    let clients = Arc::new(ClientPool::new(registry.clone()));
    let explorers = Arc::new(ExplorerPool::new(registry.clone()));

    let monitor = WalletMonitor::new(
        MonitorSettings {
            history_sync_interval: config.history_sync_interval(),
            ..MonitorSettings::default()
        },
        wallets.clone(),
        transactions,
        balances,
        clients.clone(),
        explorers.clone(),
    );
    monitor.start_wallet_monitoring().await?;

    let vault_service = Arc::new(VaultService::new(
        vaults,
        wallets,
        keystore,
        registry,
        clients,
        explorers,
        config.smart_contracts_path.clone(),
    ));
    let jobs = VaultJobs::new(
        vault_service,
        config.deployment_interval(),
        config.recovery_interval(),
    );

    let sig_down = SigDown::try_new()?;
    let job_tracker = TaskTracker::new();
    jobs.spawn(&job_tracker, sig_down.cancellation_token());
    job_tracker.close();

    tracing::info!("vault0 service started");
    sig_down.recv().await;

    monitor.stop_wallet_monitoring().await;
    job_tracker.wait().await;
    pool.close().await;
    tracing::info!("vault0 service stopped");
    Ok(())
}
