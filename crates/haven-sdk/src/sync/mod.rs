// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Per-wallet chain reconciliation.
//!
//! A sync is a fixed sequence of phases threading one [`SyncContext`]:
//! RBF cleanup, history fetch, transaction processing, UTXO reconciliation,
//! then gap-limit discovery and consolidation repair. Each phase persists
//! what it learned before the next one runs, so a failed sync keeps its
//! partial progress and the next run picks up idempotently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use haven_core::bitcoin::{Network, Txid};
use haven_core::model::{AddressRecord, SystemSettings, WalletId};
use haven_core::script::address_to_scripthash;
use haven_core::store::WalletStore;
use haven_core::tx::DecodedTransaction;
use haven_electrum::{ConnectionPool, PoolHandle};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::message::{Message, NoopNotifier, Notifier};
use crate::settings::load_system_settings;
use crate::Error;

mod gap;
mod history;
mod process;
mod rbf;
mod utxo;

pub const DEFAULT_GAP_LIMIT: u32 = 20;

const MAX_DISCOVERY_ROUNDS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncProfile {
    /// All phases.
    #[default]
    Full,
    /// Skips gap-limit expansion and the consolidation fix.
    Quick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub profile: SyncProfile,
    pub gap_limit: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            profile: SyncProfile::Full,
            gap_limit: DEFAULT_GAP_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub addresses_checked: usize,
    pub new_transactions: usize,
    pub rbf_replacements: usize,
    pub repaired_rbf_links: usize,
    pub new_utxos: usize,
    pub spent_utxos: usize,
    pub updated_utxos: usize,
    pub new_addresses: usize,
    pub retyped_consolidations: usize,
    pub balance_sat: i64,
    pub duration_ms: u64,
}

/// Everything a sync carries between phases.
pub(crate) struct SyncContext {
    pub wallet_id: WalletId,
    pub network: Network,
    pub handle: PoolHandle,
    pub tip_height: u64,
    pub settings: SystemSettings,
    pub addresses: Vec<AddressRecord>,
    pub owned: HashSet<String>,
    pub paths: HashMap<String, String>,
    pub scripthash_by_address: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    /// Fetched transaction details, shared across phases so parent inputs
    /// are never fetched twice.
    pub tx_cache: HashMap<Txid, DecodedTransaction>,
    pub unresolvable: HashSet<Txid>,
    pub height_times: HashMap<u64, u64>,
    /// txid -> chain height as reported by address histories this run.
    pub history_heights: HashMap<Txid, i64>,
    pub stats: SyncStats,
}

impl SyncContext {
    fn new(
        wallet_id: WalletId,
        network: Network,
        handle: PoolHandle,
        tip_height: u64,
        settings: SystemSettings,
    ) -> Self {
        Self {
            wallet_id,
            network,
            handle,
            tip_height,
            settings,
            addresses: Vec::new(),
            owned: HashSet::new(),
            paths: HashMap::new(),
            scripthash_by_address: HashMap::new(),
            labels: HashMap::new(),
            tx_cache: HashMap::new(),
            unresolvable: HashSet::new(),
            height_times: HashMap::new(),
            history_heights: HashMap::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn add_address(&mut self, record: AddressRecord) -> Result<(), Error> {
        let scripthash = address_to_scripthash(&record.address, self.network)?;
        self.owned.insert(record.address.clone());
        self.paths
            .insert(record.address.clone(), record.derivation_path.clone());
        self.scripthash_by_address
            .insert(record.address.clone(), scripthash);
        self.addresses.push(record);
        Ok(())
    }

    pub fn scripthashes_for(&self, addresses: &[AddressRecord]) -> Vec<String> {
        addresses
            .iter()
            .filter_map(|record| self.scripthash_by_address.get(&record.address).cloned())
            .collect()
    }

    /// Confirmation count for a history height against the current tip.
    pub fn confirmations(&self, height: i64) -> u32 {
        if height <= 0 {
            return 0;
        }
        let height = height as u64;
        if self.tip_height >= height {
            (self.tip_height - height + 1) as u32
        } else {
            // The server's tip moved backwards under us; count the minimum.
            1
        }
    }

    /// Block timestamp, memoized per height for the life of the sync.
    pub async fn block_time(&mut self, height: u64) -> Result<u64, Error> {
        if let Some(time) = self.height_times.get(&height) {
            return Ok(*time);
        }
        let result = self.handle.client().block_timestamp(height).await;
        self.handle.report_result(&result);
        let time = result?;
        self.height_times.insert(height, time);
        Ok(time)
    }

    /// Fetch and memoize a previous transaction; `None` when the server does
    /// not know it (the spending transaction still gets stored, fee-less).
    pub async fn resolve_prev_tx(&mut self, txid: Txid) -> Result<bool, Error> {
        use haven_core::hashes::Hash;

        if self.tx_cache.contains_key(&txid) {
            return Ok(true);
        }
        if txid == Txid::all_zeros() || self.unresolvable.contains(&txid) {
            return Ok(false);
        }
        let result = self.handle.client().get_transaction(txid).await;
        self.handle.report_result(&result);
        match result {
            Ok(decoded) => {
                self.tx_cache.insert(txid, decoded);
                Ok(true)
            }
            Err(haven_electrum::Error::Server(message)) => {
                tracing::debug!("Previous tx {txid} unavailable: {message}");
                self.unresolvable.insert(txid);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Drives wallet syncs against one pool and one store.
pub struct WalletSyncer {
    pool: Arc<ConnectionPool>,
    store: Arc<dyn WalletStore>,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<Message>,
}

impl WalletSyncer {
    pub fn new(pool: Arc<ConnectionPool>, store: Arc<dyn WalletStore>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            pool,
            store,
            notifier: Arc::new(NoopNotifier),
            events,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub(crate) fn store(&self) -> &dyn WalletStore {
        &*self.store
    }

    pub(crate) fn notifier(&self) -> &dyn Notifier {
        &*self.notifier
    }

    pub(crate) fn emit(&self, message: Message) {
        let _ = self.events.send(message);
    }

    /// Register every address of the wallet on the pool's dedicated
    /// subscription connection, plus the header subscription, so activity
    /// arrives as events instead of polling. Safe to call again after a
    /// `SubscriptionReconnected` event or when new addresses were derived.
    pub async fn watch_wallet(&self, wallet_id: WalletId) -> Result<usize, Error> {
        let client = self.pool.subscription_connection().await?;
        client.subscribe_headers().await?;

        let network = self.pool.network();
        let addresses = self.store.addresses(wallet_id).await?;
        for record in &addresses {
            let scripthash = address_to_scripthash(&record.address, network)?;
            client
                .subscribe_scripthash(&scripthash, Some(&record.address))
                .await?;
        }
        tracing::debug!(
            "Watching {} addresses of wallet {wallet_id}",
            addresses.len()
        );
        Ok(addresses.len())
    }

    /// Run the sync pipeline for one wallet.
    #[tracing::instrument(skip(self, options), level = "debug")]
    pub async fn sync(
        &self,
        wallet_id: WalletId,
        options: &SyncOptions,
    ) -> Result<SyncStats, Error> {
        let started = std::time::Instant::now();

        let wallet = self.store.wallet(wallet_id).await?;
        if wallet.network != self.pool.network() {
            return Err(Error::NetworkMismatch {
                wallet: wallet.network,
                pool: self.pool.network(),
            });
        }

        let settings = load_system_settings(&*self.store).await?;
        let handle = self.pool.acquire().await?;
        let tip = handle.client().get_block_height().await;
        handle.report_result(&tip);
        let tip_height = tip?;

        let mut ctx = SyncContext::new(wallet_id, wallet.network, handle, tip_height, settings);
        for record in self.store.addresses(wallet_id).await? {
            ctx.add_address(record)?;
        }
        ctx.labels = self.store.address_labels(wallet_id).await?;
        ctx.stats.addresses_checked = ctx.addresses.len();

        // Phase F: repair replaced-by-fee bookkeeping left over from
        // previous runs.
        let (replaced, repaired) = rbf::cleanup_replaced(self.store(), wallet_id).await?;
        ctx.stats.rbf_replacements += replaced;
        ctx.stats.repaired_rbf_links += repaired;

        // Phases G..I over the full address set.
        let addresses = ctx.addresses.clone();
        let new_txids = history::fetch_new_txids(self, &mut ctx, &addresses).await?;
        process::process_transactions(self, &mut ctx, &new_txids).await?;
        process::refresh_confirmations(self, &mut ctx).await?;
        utxo::reconcile(self, &mut ctx, &addresses).await?;

        // Phase J, skipped by quick syncs.
        if options.profile == SyncProfile::Full {
            let mut rounds = 0;
            loop {
                let derived = gap::ensure_gap_limit(self, &mut ctx, options.gap_limit).await?;
                if derived.is_empty() {
                    break;
                }
                let txids = history::fetch_new_txids(self, &mut ctx, &derived).await?;
                if !txids.is_empty() {
                    process::process_transactions(self, &mut ctx, &txids).await?;
                    utxo::reconcile(self, &mut ctx, &derived).await?;
                }
                rounds += 1;
                if rounds >= MAX_DISCOVERY_ROUNDS {
                    tracing::warn!(
                        "Wallet {wallet_id} still discovering addresses after {rounds} rounds; deferring to the next sync"
                    );
                    break;
                }
            }
            gap::fix_consolidations(self, &mut ctx).await?;
        }

        ctx.stats.balance_sat = self.store.recompute_balance(wallet_id).await?;
        ctx.stats.duration_ms = started.elapsed().as_millis() as u64;

        let stats = ctx.stats.clone();
        tracing::info!(
            "Wallet {wallet_id} synced: {} new txs, {} new utxos, balance {} sat",
            stats.new_transactions,
            stats.new_utxos,
            stats.balance_sat
        );
        self.emit(Message::SyncCompleted {
            wallet_id,
            stats: stats.clone(),
        });
        Ok(stats)
    }
}
