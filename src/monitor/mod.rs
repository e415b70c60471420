//! Wallet monitoring: live chain watching plus explorer history replay.
//!
//! Startup enumerates the managed wallets page-wise and registers each with
//! two subsystems: a per-chain live watcher feeding one bounded channel, and
//! a per-wallet history replayer feeding another. One consumer task drains
//! each channel, so per-wallet application is serialized; the exists-by-hash
//! skip in the transaction repository makes re-delivery safe.

use alloy::primitives::Address;
use dashmap::DashMap;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::balance::BalanceService;
use crate::chain::ChainType;
use crate::client::explorer::{
    BlockExplorer, ExplorerProvider, ExplorerTransaction, HistoryQuery, TxRecordKind,
};
use crate::client::{BlockchainClient, ChainTransaction, ClientProvider};
use crate::decoder::{self, Erc20Transfer};
use crate::error::Error;
use crate::evm::tx::{Transaction, TransactionStatus, TransactionType};
use crate::store::transactions::TransactionRepository;
use crate::store::wallets::{Wallet, WalletRepository};

/// Tuning knobs for the monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Explorer page size during replay.
    pub history_page_size: u32,
    /// Pause between history re-syncs per wallet.
    pub history_sync_interval: Duration,
    /// Safety fuse: max items fetched per stream kind per sync.
    pub history_fuse: u32,
    /// Capacity of the live and history event channels.
    pub channel_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            history_page_size: 100,
            history_sync_interval: Duration::from_secs(600),
            history_fuse: 10_000,
            channel_capacity: 1024,
        }
    }
}

/// One matched transaction flowing through a monitor channel.
#[derive(Debug, Clone)]
pub struct TransactionEvent {
    /// The canonical transaction, with `wallet_id` metadata set.
    pub transaction: Transaction,
    /// Pre-decoded token movement, when the event is an ERC-20 transfer.
    pub transfer: Option<Erc20Transfer>,
    /// Whether this hash was first recorded by this delivery.
    pub is_new: bool,
}

struct WalletSubscription {
    cancel: CancellationToken,
    chain_type: ChainType,
    address_key: String,
}

struct RunState {
    cancel: CancellationToken,
    tracker: TaskTracker,
    live_tx: mpsc::Sender<TransactionEvent>,
    history_tx: mpsc::Sender<TransactionEvent>,
}

struct Inner {
    settings: MonitorSettings,
    wallets: WalletRepository,
    transactions: TransactionRepository,
    balances: BalanceService,
    clients: Arc<dyn ClientProvider>,
    explorers: Arc<dyn ExplorerProvider>,
    /// `(chain, lowercase address)` → wallet id, consulted by live watchers.
    addresses: DashMap<(ChainType, String), i64>,
    subscriptions: Mutex<HashMap<i64, WalletSubscription>>,
    watchers: Mutex<HashMap<ChainType, CancellationToken>>,
    state: Mutex<Option<RunState>>,
}

/// Lifecycle manager for wallet monitoring.
#[derive(Clone)]
pub struct WalletMonitor {
    inner: Arc<Inner>,
}

impl WalletMonitor {
    /// Wire up a monitor; nothing runs until
    /// [`start_wallet_monitoring`](Self::start_wallet_monitoring).
    pub fn new(
        settings: MonitorSettings,
        wallets: WalletRepository,
        transactions: TransactionRepository,
        balances: BalanceService,
        clients: Arc<dyn ClientProvider>,
        explorers: Arc<dyn ExplorerProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                wallets,
                transactions,
                balances,
                clients,
                explorers,
                addresses: DashMap::new(),
                subscriptions: Mutex::new(HashMap::new()),
                watchers: Mutex::new(HashMap::new()),
                state: Mutex::new(None),
            }),
        }
    }

    /// Enumerate all live wallets, register each, and spawn the consumers.
    ///
    /// A second call while running is a warning no-op.
    pub async fn start_wallet_monitoring(&self) -> Result<(), Error> {
        {
            let mut state = self.inner.state.lock().expect("monitor state lock poisoned");
            if state.is_some() {
                tracing::warn!("wallet monitoring already running");
                return Ok(());
            }
            let cancel = CancellationToken::new();
            let tracker = TaskTracker::new();
            let (live_tx, live_rx) = mpsc::channel(self.inner.settings.channel_capacity);
            let (history_tx, history_rx) = mpsc::channel(self.inner.settings.channel_capacity);

            tracker.spawn(Self::run_consumer(
                Arc::clone(&self.inner),
                live_rx,
                cancel.clone(),
                false,
            ));
            tracker.spawn(Self::run_consumer(
                Arc::clone(&self.inner),
                history_rx,
                cancel.clone(),
                true,
            ));
            *state = Some(RunState {
                cancel,
                tracker,
                live_tx,
                history_tx,
            });
        }

        let mut token: Option<String> = None;
        loop {
            let page = self.inner.wallets.list(100, token.as_deref()).await?;
            for wallet in &page.items {
                self.register_wallet(wallet)?;
            }
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        tracing::info!("wallet monitoring started");
        Ok(())
    }

    /// Register one wallet: live address filter plus history replay from
    /// `last_block_number + 1`.
    ///
    /// # Errors
    /// [`Error::OperationFailed`] when the monitor is not running.
    pub fn register_wallet(&self, wallet: &Wallet) -> Result<(), Error> {
        let state = self.inner.state.lock().expect("monitor state lock poisoned");
        let Some(run) = state.as_ref() else {
            return Err(Error::OperationFailed(
                "wallet monitoring is not running".to_string(),
            ));
        };
        let address_key = wallet.address.to_lowercase();
        self.inner
            .addresses
            .insert((wallet.chain_type, address_key.clone()), wallet.id);
        self.ensure_chain_watcher(wallet.chain_type, run);

        let wallet_cancel = run.cancel.child_token();
        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned");
        if let Some(previous) = subscriptions.insert(
            wallet.id,
            WalletSubscription {
                cancel: wallet_cancel.clone(),
                chain_type: wallet.chain_type,
                address_key,
            },
        ) {
            previous.cancel.cancel();
        }
        run.tracker.spawn(Self::run_history_loop(
            Arc::clone(&self.inner),
            wallet.id,
            run.history_tx.clone(),
            wallet_cancel,
        ));
        tracing::info!(wallet_id = wallet.id, address = %wallet.address, "wallet registered");
        Ok(())
    }

    /// Tear down one wallet's subscriptions. Idempotent.
    pub fn unregister_wallet(&self, wallet_id: i64) {
        let mut subscriptions = self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned");
        if let Some(subscription) = subscriptions.remove(&wallet_id) {
            subscription.cancel.cancel();
            self.inner
                .addresses
                .remove(&(subscription.chain_type, subscription.address_key));
            tracing::info!(wallet_id, "wallet unregistered");
        }
    }

    /// Cancel both consumers and every per-address subscription. Idempotent.
    pub async fn stop_wallet_monitoring(&self) {
        let state = {
            let mut state = self.inner.state.lock().expect("monitor state lock poisoned");
            state.take()
        };
        let Some(run) = state else {
            return;
        };
        run.cancel.cancel();
        self.inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .clear();
        self.inner
            .watchers
            .lock()
            .expect("watchers lock poisoned")
            .clear();
        self.inner.addresses.clear();
        run.tracker.close();
        run.tracker.wait().await;
        tracing::info!("wallet monitoring stopped");
    }

    fn ensure_chain_watcher(&self, chain_type: ChainType, run: &RunState) {
        let mut watchers = self.inner.watchers.lock().expect("watchers lock poisoned");
        if watchers.contains_key(&chain_type) {
            return;
        }
        let cancel = run.cancel.child_token();
        watchers.insert(chain_type, cancel.clone());
        run.tracker.spawn(Self::run_chain_watcher(
            Arc::clone(&self.inner),
            chain_type,
            run.live_tx.clone(),
            cancel,
        ));
    }

    /// Live watcher: follow new heads and match block transactions against
    /// the registered address set.
    async fn run_chain_watcher(
        inner: Arc<Inner>,
        chain_type: ChainType,
        live_tx: mpsc::Sender<TransactionEvent>,
        cancel: CancellationToken,
    ) {
        let client = match inner.clients.client(chain_type) {
            Ok(client) => client,
            Err(error) => {
                tracing::error!(chain = %chain_type, %error, "live watcher has no client");
                return;
            }
        };
        let mut heads = match client.subscribe_heads(cancel.clone()).await {
            Ok(heads) => heads,
            Err(error) => {
                tracing::error!(chain = %chain_type, %error, "head subscription failed");
                return;
            }
        };
        loop {
            let header = tokio::select! {
                _ = cancel.cancelled() => break,
                header = heads.recv() => match header {
                    Some(header) => header,
                    None => break,
                },
            };
            let block = match client.block_with_transactions(header.number).await {
                Ok(Some(block)) => block,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(chain = %chain_type, block = header.number, %error, "block fetch failed");
                    continue;
                }
            };
            for tx in block.transactions {
                Self::handle_live_transaction(&inner, chain_type, client.as_ref(), tx, &live_tx)
                    .await;
            }
        }
        tracing::debug!(chain = %chain_type, "live watcher stopped");
    }

    async fn handle_live_transaction(
        inner: &Inner,
        chain_type: ChainType,
        client: &dyn BlockchainClient,
        chain_tx: ChainTransaction,
        live_tx: &mpsc::Sender<TransactionEvent>,
    ) {
        let Some(wallet_id) = match_wallet(inner, chain_type, &chain_tx) else {
            return;
        };
        let receipt = match client.transaction_receipt(chain_tx.hash).await {
            Ok(receipt) => receipt,
            Err(error) => {
                tracing::warn!(tx = %chain_tx.hash, %error, "receipt fetch failed");
                None
            }
        };
        let mut transaction = decoder::decode_transaction(chain_type, &chain_tx, receipt.as_ref());
        transaction.set_wallet_id(wallet_id);
        let transfer = decoder::decode_erc20_transfer(&transaction).or_else(|| {
            receipt.as_ref().and_then(|receipt| {
                decoder::transfers_from_receipt(receipt)
                    .into_iter()
                    .find(|transfer| {
                        is_registered(inner, chain_type, transfer.from)
                            || is_registered(inner, chain_type, transfer.to)
                    })
            })
        });
        let is_new = match inner.transactions.upsert(&transaction).await {
            Ok(is_new) => is_new,
            Err(error) => {
                tracing::warn!(tx = %chain_tx.hash, %error, "transaction upsert failed");
                return;
            }
        };
        let event = TransactionEvent {
            transaction,
            transfer,
            is_new,
        };
        if live_tx.send(event).await.is_err() {
            tracing::debug!("live channel closed");
        }
    }

    /// Consumer task: drain one channel, serializing per-wallet application.
    async fn run_consumer(
        inner: Arc<Inner>,
        mut receiver: mpsc::Receiver<TransactionEvent>,
        cancel: CancellationToken,
        update_block: bool,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let Err(error) = process_transaction_event(&inner, &event, update_block).await {
                tracing::warn!(
                    tx = ?event.transaction.hash,
                    %error,
                    "event processing failed"
                );
            }
        }
    }

    /// History replayer: sync once at registration, then on every interval.
    async fn run_history_loop(
        inner: Arc<Inner>,
        wallet_id: i64,
        history_tx: mpsc::Sender<TransactionEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            if let Err(error) = replay_wallet(&inner, wallet_id, &history_tx).await {
                tracing::warn!(wallet_id, %error, "history replay failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(inner.settings.history_sync_interval) => {}
            }
        }
        tracing::debug!(wallet_id, "history replayer stopped");
    }
}

/// Match a live transaction against the registered addresses.
///
/// Sender precedence: the sending wallet wins because gas accounting applies
/// there; decoded token recipients come last.
fn match_wallet(inner: &Inner, chain_type: ChainType, tx: &ChainTransaction) -> Option<i64> {
    let lookup = |address: Address| {
        inner
            .addresses
            .get(&(chain_type, address.to_string().to_lowercase()))
            .map(|entry| *entry.value())
    };
    if let Some(id) = lookup(tx.from) {
        return Some(id);
    }
    if let Some((recipient, _)) = crate::evm::erc20::decode_transfer(&tx.input) {
        if let Some(id) = lookup(recipient) {
            return Some(id);
        }
    }
    if let Some((from, to, _)) = crate::evm::erc20::decode_transfer_from(&tx.input) {
        if let Some(id) = lookup(from).or_else(|| lookup(to)) {
            return Some(id);
        }
    }
    tx.to.and_then(lookup)
}

fn is_registered(inner: &Inner, chain_type: ChainType, address: Address) -> bool {
    inner
        .addresses
        .contains_key(&(chain_type, address.to_string().to_lowercase()))
}

/// Apply one event: balance updates for fresh transactions, watermark
/// advancement for history deliveries.
async fn process_transaction_event(
    inner: &Inner,
    event: &TransactionEvent,
    update_block: bool,
) -> Result<(), Error> {
    let Some(wallet_id) = event.transaction.wallet_id() else {
        return Ok(());
    };
    if event.is_new {
        if let Some(transfer) = &event.transfer {
            inner
                .balances
                .update_token_balance(event.transaction.chain_type, transfer)
                .await?;
        } else if event.transaction.tx_type == TransactionType::Native {
            inner.balances.update_wallet_balance(&event.transaction).await?;
        }
    }
    if update_block {
        if let Some(block_number) = event.transaction.block_number {
            inner.wallets.advance_last_block(wallet_id, block_number).await?;
        }
    }
    Ok(())
}

/// Replay explorer history for one wallet: normal transactions first, then
/// ERC-20 transfers, each stream bounded by the fuse.
async fn replay_wallet(
    inner: &Inner,
    wallet_id: i64,
    history_tx: &mpsc::Sender<TransactionEvent>,
) -> Result<(), Error> {
    let wallet = inner.wallets.get(wallet_id).await?;
    let explorer = inner.explorers.explorer(wallet.chain_type)?;
    let address = Address::from_str(&wallet.address)
        .map_err(|_| Error::InvalidAddress(wallet.address.clone()))?;
    let from_block = wallet.last_block_number + 1;

    for kind in [TxRecordKind::Normal, TxRecordKind::Erc20] {
        replay_stream(
            inner,
            explorer.as_ref(),
            &wallet,
            address,
            from_block,
            kind,
            history_tx,
        )
        .await?;
    }
    Ok(())
}

async fn replay_stream(
    inner: &Inner,
    explorer: &dyn BlockExplorer,
    wallet: &Wallet,
    address: Address,
    from_block: u64,
    kind: TxRecordKind,
    history_tx: &mpsc::Sender<TransactionEvent>,
) -> Result<(), Error> {
    let mut fetched: u32 = 0;
    let mut token: Option<String> = None;
    loop {
        let query = HistoryQuery {
            start_block: Some(from_block),
            end_block: None,
            sort_ascending: true,
            limit: inner.settings.history_page_size,
            tx_kind: kind,
        };
        let page = explorer
            .transaction_history(address, query, token.as_deref())
            .await?;
        for record in &page.items {
            if fetched >= inner.settings.history_fuse {
                tracing::warn!(
                    wallet_id = wallet.id,
                    ?kind,
                    fuse = inner.settings.history_fuse,
                    "history fuse reached, truncating sync"
                );
                return Ok(());
            }
            fetched += 1;
            let (mut transaction, transfer) =
                canonical_from_record(wallet.chain_type, record, kind);
            transaction.set_wallet_id(wallet.id);
            let is_new = inner.transactions.upsert(&transaction).await?;
            let event = TransactionEvent {
                transaction,
                transfer,
                is_new,
            };
            if history_tx.send(event).await.is_err() {
                return Ok(());
            }
        }
        token = page.next_token;
        if token.is_none() {
            return Ok(());
        }
    }
}

/// Convert an explorer record into the canonical event payload.
fn canonical_from_record(
    chain_type: ChainType,
    record: &ExplorerTransaction,
    kind: TxRecordKind,
) -> (Transaction, Option<Erc20Transfer>) {
    let status = if record.failed {
        TransactionStatus::Failed
    } else {
        TransactionStatus::Success
    };
    match kind {
        TxRecordKind::Normal => {
            let chain_tx = ChainTransaction {
                hash: record.hash,
                from: record.from,
                to: record.to,
                value: record.value,
                input: record.input.clone(),
                nonce: record.nonce,
                gas_price: record.gas_price,
                gas_limit: 0,
                block_number: Some(record.block_number),
            };
            let mut tx = decoder::decode_transaction(chain_type, &chain_tx, None);
            tx.gas_used = record.gas_used;
            tx.status = status;
            let transfer = decoder::decode_erc20_transfer(&tx);
            (tx, transfer)
        }
        TxRecordKind::Erc20 => {
            let token_address = record.token_address.unwrap_or(Address::ZERO);
            let recipient = record.to.unwrap_or(Address::ZERO);
            let transfer = Erc20Transfer {
                token_address,
                from: record.from,
                to: recipient,
                amount: record.value,
                tx_hash: record.hash,
                gas_used: record.gas_used,
                gas_price: record.gas_price,
                block_number: Some(record.block_number),
            };
            let tx = Transaction {
                hash: Some(record.hash),
                chain_type,
                from: record.from,
                to: Some(token_address),
                value: alloy::primitives::U256::ZERO,
                data: Vec::new(),
                nonce: record.nonce,
                gas_price: record.gas_price,
                gas_limit: 0,
                gas_used: record.gas_used,
                block_number: Some(record.block_number),
                status,
                tx_type: TransactionType::Erc20Transfer,
                token_address: Some(token_address),
                metadata: HashMap::new(),
            };
            (tx, Some(transfer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::explorer::ContractInfo;
    use crate::client::{
        BlockHeader, BlockWithTransactions, LogEntry, LogQuery, Receipt,
    };
    use crate::evm::address as evm_address;
    use crate::store::testing;
    use crate::store::wallets::NewWallet;
    use crate::types::{Page, Tags};
    use alloy::primitives::{address, B256, U256};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    const WALLET_ADDRESS: Address = address!("0x9b2055d370f73ec7d8a03e965129118dc8f5bf83");
    const OTHER_ADDRESS: Address = address!("0x742d35cc6634c0532925a3b844bc454e4438f44e");
    const TOKEN: Address = address!("0x6b175474e89094c44da98b954eedeac495271d0f");

    /// Explorer stub scripted with one page list per stream kind.
    struct ScriptedExplorer {
        normal: StdMutex<Vec<Vec<ExplorerTransaction>>>,
        erc20: StdMutex<Vec<Vec<ExplorerTransaction>>>,
    }

    impl ScriptedExplorer {
        fn new(
            normal: Vec<Vec<ExplorerTransaction>>,
            erc20: Vec<Vec<ExplorerTransaction>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                normal: StdMutex::new(normal),
                erc20: StdMutex::new(erc20),
            })
        }
    }

    #[async_trait]
    impl BlockExplorer for ScriptedExplorer {
        async fn transaction_history(
            &self,
            _address: Address,
            query: HistoryQuery,
            _continuation: Option<&str>,
        ) -> Result<Page<ExplorerTransaction>, Error> {
            let source = match query.tx_kind {
                TxRecordKind::Normal => &self.normal,
                TxRecordKind::Erc20 => &self.erc20,
            };
            let mut pages = source.lock().expect("pages lock");
            if pages.is_empty() {
                return Ok(Page::empty());
            }
            let items = pages.remove(0);
            let next_token = if pages.is_empty() {
                None
            } else {
                Some(crate::types::encode_token(&1u32))
            };
            Ok(Page { items, next_token })
        }

        async fn contract(&self, _address: Address) -> Result<ContractInfo, Error> {
            Err(Error::Blockchain("not scripted".to_string()))
        }
    }

    struct ScriptedExplorerProvider(Arc<ScriptedExplorer>);

    impl ExplorerProvider for ScriptedExplorerProvider {
        fn explorer(&self, _chain: ChainType) -> Result<Arc<dyn BlockExplorer>, Error> {
            Ok(Arc::clone(&self.0) as Arc<dyn BlockExplorer>)
        }
    }

    /// A client whose head stream stays silent; live paths idle in tests.
    struct SilentClient;

    #[async_trait]
    impl BlockchainClient for SilentClient {
        fn chain_type(&self) -> ChainType {
            ChainType::Ethereum
        }
        async fn broadcast_transaction(&self, _raw: &[u8]) -> Result<B256, Error> {
            Err(Error::Blockchain("not scripted".to_string()))
        }
        async fn transaction_by_hash(
            &self,
            _hash: B256,
        ) -> Result<Option<ChainTransaction>, Error> {
            Ok(None)
        }
        async fn transaction_receipt(&self, _hash: B256) -> Result<Option<Receipt>, Error> {
            Ok(None)
        }
        async fn call(&self, _to: Address, _data: Vec<u8>) -> Result<Vec<u8>, Error> {
            Ok(Vec::new())
        }
        async fn logs(&self, _query: LogQuery) -> Result<Vec<LogEntry>, Error> {
            Ok(Vec::new())
        }
        async fn block_number(&self) -> Result<u64, Error> {
            Ok(0)
        }
        async fn block_with_transactions(
            &self,
            _number: u64,
        ) -> Result<Option<BlockWithTransactions>, Error> {
            Ok(None)
        }
        async fn nonce(&self, _address: Address) -> Result<u64, Error> {
            Ok(0)
        }
        async fn gas_price(&self) -> Result<u128, Error> {
            Ok(0)
        }
        async fn subscribe_heads(
            &self,
            _cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<BlockHeader>, Error> {
            let (_sender, receiver) = mpsc::channel(1);
            // Sender is dropped; the stream ends immediately.
            Ok(receiver)
        }
    }

    struct SilentClientProvider;

    impl ClientProvider for SilentClientProvider {
        fn client(&self, _chain: ChainType) -> Result<Arc<dyn BlockchainClient>, Error> {
            Ok(Arc::new(SilentClient) as Arc<dyn BlockchainClient>)
        }
    }

    async fn fixture(
        settings: MonitorSettings,
        explorer: Arc<ScriptedExplorer>,
    ) -> (WalletMonitor, WalletRepository, Wallet) {
        let pool = testing::pool().await;
        let wallets = WalletRepository::new(pool.clone());
        let transactions = TransactionRepository::new(pool.clone());
        let balances = BalanceService::new(wallets.clone());
        let wallet = wallets
            .create(NewWallet {
                key_id: "k".to_string(),
                chain_type: ChainType::Ethereum,
                address: evm_address::checksum(WALLET_ADDRESS),
                name: "monitored".to_string(),
                tags: Tags::new(),
            })
            .await
            .expect("wallet");
        let monitor = WalletMonitor::new(
            settings,
            wallets.clone(),
            transactions,
            balances,
            Arc::new(SilentClientProvider),
            Arc::new(ScriptedExplorerProvider(explorer)),
        );
        (monitor, wallets, wallet)
    }

    fn incoming_native(block: u64, value: u64) -> ExplorerTransaction {
        ExplorerTransaction {
            hash: B256::repeat_byte(block as u8),
            from: OTHER_ADDRESS,
            to: Some(WALLET_ADDRESS),
            value: U256::from(value),
            input: Vec::new(),
            nonce: 0,
            gas_price: 1_000_000_000,
            gas_used: 21_000,
            block_number: block,
            failed: false,
            token_address: None,
        }
    }

    fn incoming_token(block: u64, amount: u64) -> ExplorerTransaction {
        ExplorerTransaction {
            hash: B256::repeat_byte(block as u8),
            from: OTHER_ADDRESS,
            to: Some(WALLET_ADDRESS),
            value: U256::from(amount),
            input: Vec::new(),
            nonce: 1,
            gas_price: 1_000_000_000,
            gas_used: 65_000,
            block_number: block,
            failed: false,
            token_address: Some(TOKEN),
        }
    }

    async fn drain_and_process(
        monitor: &WalletMonitor,
        receiver: &mut mpsc::Receiver<TransactionEvent>,
    ) -> usize {
        let mut processed = 0;
        while let Ok(event) = receiver.try_recv() {
            process_transaction_event(&monitor.inner, &event, true)
                .await
                .expect("process");
            processed += 1;
        }
        processed
    }

    #[tokio::test]
    async fn replay_applies_balances_and_advances_watermark() {
        let explorer = ScriptedExplorer::new(
            vec![vec![incoming_native(10, 5)]],
            vec![vec![incoming_token(12, 40)]],
        );
        let (monitor, wallets, wallet) = fixture(MonitorSettings::default(), explorer).await;
        let (history_tx, mut history_rx) = mpsc::channel(64);

        replay_wallet(&monitor.inner, wallet.id, &history_tx)
            .await
            .expect("replay");
        let processed = drain_and_process(&monitor, &mut history_rx).await;
        assert_eq!(processed, 2);

        let updated = wallets.get(wallet.id).await.expect("wallet");
        assert_eq!(updated.native_balance, U256::from(5u64));
        assert_eq!(updated.last_block_number, 12);
        let token_balance = wallets
            .token_balance(wallet.id, &evm_address::checksum(TOKEN))
            .await
            .expect("token balance");
        assert_eq!(token_balance, U256::from(40u64));
    }

    #[tokio::test]
    async fn redelivery_is_not_double_accounted() {
        let explorer = ScriptedExplorer::new(
            vec![vec![incoming_native(10, 5)], vec![incoming_native(10, 5)]],
            vec![],
        );
        let (monitor, wallets, wallet) = fixture(MonitorSettings::default(), explorer).await;
        let (history_tx, mut history_rx) = mpsc::channel(64);

        // Two replays deliver the same hash; the second is is_new = false.
        replay_wallet(&monitor.inner, wallet.id, &history_tx)
            .await
            .expect("first replay");
        replay_wallet(&monitor.inner, wallet.id, &history_tx)
            .await
            .expect("second replay");
        drain_and_process(&monitor, &mut history_rx).await;

        let updated = wallets.get(wallet.id).await.expect("wallet");
        assert_eq!(updated.native_balance, U256::from(5u64));
    }

    #[tokio::test]
    async fn history_fuse_bounds_each_stream() {
        let settings = MonitorSettings {
            history_fuse: 2,
            ..MonitorSettings::default()
        };
        let explorer = ScriptedExplorer::new(
            vec![
                vec![incoming_native(10, 1), incoming_native(11, 1)],
                vec![incoming_native(12, 1), incoming_native(13, 1)],
            ],
            vec![],
        );
        let (monitor, wallets, wallet) = fixture(settings, explorer).await;
        let (history_tx, mut history_rx) = mpsc::channel(64);

        replay_wallet(&monitor.inner, wallet.id, &history_tx)
            .await
            .expect("replay");
        let processed = drain_and_process(&monitor, &mut history_rx).await;
        assert_eq!(processed, 2);

        let updated = wallets.get(wallet.id).await.expect("wallet");
        assert_eq!(updated.native_balance, U256::from(2u64));
        assert_eq!(updated.last_block_number, 11);
    }

    #[tokio::test]
    async fn events_without_wallet_id_are_skipped() {
        let explorer = ScriptedExplorer::new(vec![], vec![]);
        let (monitor, wallets, wallet) = fixture(MonitorSettings::default(), explorer).await;

        let (mut transaction, transfer) = canonical_from_record(
            ChainType::Ethereum,
            &incoming_native(10, 5),
            TxRecordKind::Normal,
        );
        transaction.metadata.clear();
        let event = TransactionEvent {
            transaction,
            transfer,
            is_new: true,
        };
        process_transaction_event(&monitor.inner, &event, true)
            .await
            .expect("skip");
        let unchanged = wallets.get(wallet.id).await.expect("wallet");
        assert_eq!(unchanged.native_balance, U256::ZERO);
        assert_eq!(unchanged.last_block_number, 0);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let explorer = ScriptedExplorer::new(vec![], vec![]);
        let (monitor, _wallets, wallet) = fixture(MonitorSettings::default(), explorer).await;

        monitor.start_wallet_monitoring().await.expect("start");
        monitor.start_wallet_monitoring().await.expect("restart no-op");
        assert!(
            monitor
                .inner
                .subscriptions
                .lock()
                .expect("lock")
                .contains_key(&wallet.id)
        );

        monitor.unregister_wallet(wallet.id);
        monitor.unregister_wallet(wallet.id);
        assert!(monitor.inner.addresses.is_empty());

        monitor.stop_wallet_monitoring().await;
        monitor.stop_wallet_monitoring().await;
        assert!(
            monitor
                .inner
                .subscriptions
                .lock()
                .expect("lock")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn register_requires_a_running_monitor() {
        let explorer = ScriptedExplorer::new(vec![], vec![]);
        let (monitor, _wallets, wallet) = fixture(MonitorSettings::default(), explorer).await;
        let err = monitor.register_wallet(&wallet).expect_err("not running");
        assert!(matches!(err, Error::OperationFailed(_)));
    }
}
