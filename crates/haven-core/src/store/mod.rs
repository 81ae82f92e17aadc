// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Persistence contract consumed by the sync core.
//!
//! The core never talks to a database directly: it relies on
//! `create`-many-with-skip-duplicates and idempotent updates so that a
//! sync phase can be safely re-run after a partial failure.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bitcoin::{Network, Txid};
use thiserror::Error;

mod memory;

pub use self::memory::MemoryStore;
use crate::model::{
    AddressRecord, Chain, ElectrumServerRecord, RbfStatus, TransactionRecord, TransactionType,
    TxInputRecord, TxOutputRecord, UtxoRecord, WalletId, WalletRecord,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store: {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(e))
    }
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn wallet(&self, wallet_id: WalletId) -> Result<WalletRecord, StoreError>;

    async fn update_wallet_balance(
        &self,
        wallet_id: WalletId,
        balance_sat: i64,
    ) -> Result<(), StoreError>;

    async fn addresses(&self, wallet_id: WalletId) -> Result<Vec<AddressRecord>, StoreError>;

    /// Insert addresses, skipping any `(wallet, address)` already present.
    async fn create_addresses(&self, addresses: Vec<AddressRecord>) -> Result<usize, StoreError>;

    async fn mark_address_used(&self, wallet_id: WalletId, address: &str)
        -> Result<(), StoreError>;

    /// Derive `count` fresh addresses on the given chain, append them to the
    /// wallet and return them.
    async fn derive_addresses(
        &self,
        wallet_id: WalletId,
        chain: Chain,
        count: u32,
    ) -> Result<Vec<AddressRecord>, StoreError>;

    async fn transactions(&self, wallet_id: WalletId)
        -> Result<Vec<TransactionRecord>, StoreError>;

    async fn known_txids(&self, wallet_id: WalletId) -> Result<HashSet<Txid>, StoreError>;

    /// Insert transactions, skipping any `(wallet, txid, type)` already
    /// present. Returns the number actually inserted.
    async fn create_transactions(
        &self,
        transactions: Vec<TransactionRecord>,
    ) -> Result<usize, StoreError>;

    /// Unconfirmed transactions still marked RBF-active.
    async fn pending_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    async fn confirmed_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Transactions marked replaced whose `replaced_by_txid` link is missing.
    async fn replaced_without_link(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    async fn set_rbf_status(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        rbf_status: RbfStatus,
        replaced_by_txid: Option<Txid>,
    ) -> Result<(), StoreError>;

    async fn update_confirmations(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        confirmations: u32,
        block_height: Option<u32>,
        block_time: Option<u64>,
    ) -> Result<(), StoreError>;

    /// Re-type a stored transaction, adjusting its signed amount.
    async fn retype_transaction(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        from: TransactionType,
        to: TransactionType,
        amount_sat: i64,
    ) -> Result<(), StoreError>;

    async fn set_transaction_label(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        label: &str,
    ) -> Result<(), StoreError>;

    async fn create_tx_inputs(&self, inputs: Vec<TxInputRecord>) -> Result<usize, StoreError>;

    async fn create_tx_outputs(&self, outputs: Vec<TxOutputRecord>) -> Result<usize, StoreError>;

    async fn tx_inputs(
        &self,
        wallet_id: WalletId,
        txid: Txid,
    ) -> Result<Vec<TxInputRecord>, StoreError>;

    async fn tx_outputs(
        &self,
        wallet_id: WalletId,
        txid: Txid,
    ) -> Result<Vec<TxOutputRecord>, StoreError>;

    async fn utxos(&self, wallet_id: WalletId) -> Result<Vec<UtxoRecord>, StoreError>;

    /// Insert UTXOs, skipping any `(wallet, txid, vout)` already present.
    async fn create_utxos(&self, utxos: Vec<UtxoRecord>) -> Result<usize, StoreError>;

    async fn mark_utxo_spent(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        vout: u32,
    ) -> Result<(), StoreError>;

    async fn update_utxo_confirmations(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        vout: u32,
        confirmations: u32,
    ) -> Result<(), StoreError>;

    /// Recompute the wallet's running balance from its unspent outputs,
    /// persist it and return the new value.
    async fn recompute_balance(&self, wallet_id: WalletId) -> Result<i64, StoreError>;

    async fn address_labels(
        &self,
        wallet_id: WalletId,
    ) -> Result<HashMap<String, String>, StoreError>;

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn electrum_servers(
        &self,
        network: Network,
    ) -> Result<Vec<ElectrumServerRecord>, StoreError>;

    async fn node_config(&self, network: Network)
        -> Result<Option<serde_json::Value>, StoreError>;
}
