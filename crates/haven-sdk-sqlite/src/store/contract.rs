// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! [`WalletStore`] implementation delegating to the typed queries.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use haven_core::bitcoin::{Network, Txid};
use haven_core::model::{
    AddressRecord, Chain, ElectrumServerRecord, RbfStatus, TransactionRecord, TransactionType,
    TxInputRecord, TxOutputRecord, UtxoRecord, WalletId, WalletRecord,
};
use haven_core::store::{StoreError, WalletStore};

use super::Store;

#[async_trait]
impl WalletStore for Store {
    async fn wallet(&self, wallet_id: WalletId) -> Result<WalletRecord, StoreError> {
        Ok(Store::wallet(self, wallet_id).await?)
    }

    async fn update_wallet_balance(
        &self,
        wallet_id: WalletId,
        balance_sat: i64,
    ) -> Result<(), StoreError> {
        Ok(Store::update_wallet_balance(self, wallet_id, balance_sat).await?)
    }

    async fn addresses(&self, wallet_id: WalletId) -> Result<Vec<AddressRecord>, StoreError> {
        Ok(Store::addresses(self, wallet_id).await?)
    }

    async fn create_addresses(&self, addresses: Vec<AddressRecord>) -> Result<usize, StoreError> {
        Ok(Store::create_addresses(self, addresses).await?)
    }

    async fn mark_address_used(
        &self,
        wallet_id: WalletId,
        address: &str,
    ) -> Result<(), StoreError> {
        Ok(Store::mark_address_used(self, wallet_id, address).await?)
    }

    async fn derive_addresses(
        &self,
        wallet_id: WalletId,
        chain: Chain,
        count: u32,
    ) -> Result<Vec<AddressRecord>, StoreError> {
        Ok(Store::derive_addresses(self, wallet_id, chain, count).await?)
    }

    async fn transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(Store::transactions(self, wallet_id).await?)
    }

    async fn known_txids(&self, wallet_id: WalletId) -> Result<HashSet<Txid>, StoreError> {
        Ok(Store::known_txids(self, wallet_id).await?)
    }

    async fn create_transactions(
        &self,
        transactions: Vec<TransactionRecord>,
    ) -> Result<usize, StoreError> {
        Ok(Store::create_transactions(self, transactions).await?)
    }

    async fn pending_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(Store::pending_transactions(self, wallet_id).await?)
    }

    async fn confirmed_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(Store::confirmed_transactions(self, wallet_id).await?)
    }

    async fn replaced_without_link(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(Store::replaced_without_link(self, wallet_id).await?)
    }

    async fn set_rbf_status(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        rbf_status: RbfStatus,
        replaced_by_txid: Option<Txid>,
    ) -> Result<(), StoreError> {
        Ok(Store::set_rbf_status(self, wallet_id, txid, rbf_status, replaced_by_txid).await?)
    }

    async fn update_confirmations(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        confirmations: u32,
        block_height: Option<u32>,
        block_time: Option<u64>,
    ) -> Result<(), StoreError> {
        Ok(
            Store::update_confirmations(
                self,
                wallet_id,
                txid,
                confirmations,
                block_height,
                block_time,
            )
            .await?,
        )
    }

    async fn retype_transaction(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        from: TransactionType,
        to: TransactionType,
        amount_sat: i64,
    ) -> Result<(), StoreError> {
        Ok(Store::retype_transaction(self, wallet_id, txid, from, to, amount_sat).await?)
    }

    async fn set_transaction_label(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        label: &str,
    ) -> Result<(), StoreError> {
        Ok(Store::set_transaction_label(self, wallet_id, txid, label).await?)
    }

    async fn create_tx_inputs(&self, inputs: Vec<TxInputRecord>) -> Result<usize, StoreError> {
        Ok(Store::create_tx_inputs(self, inputs).await?)
    }

    async fn create_tx_outputs(&self, outputs: Vec<TxOutputRecord>) -> Result<usize, StoreError> {
        Ok(Store::create_tx_outputs(self, outputs).await?)
    }

    async fn tx_inputs(
        &self,
        wallet_id: WalletId,
        txid: Txid,
    ) -> Result<Vec<TxInputRecord>, StoreError> {
        Ok(Store::tx_inputs(self, wallet_id, txid).await?)
    }

    async fn tx_outputs(
        &self,
        wallet_id: WalletId,
        txid: Txid,
    ) -> Result<Vec<TxOutputRecord>, StoreError> {
        Ok(Store::tx_outputs(self, wallet_id, txid).await?)
    }

    async fn utxos(&self, wallet_id: WalletId) -> Result<Vec<UtxoRecord>, StoreError> {
        Ok(Store::utxos(self, wallet_id).await?)
    }

    async fn create_utxos(&self, utxos: Vec<UtxoRecord>) -> Result<usize, StoreError> {
        Ok(Store::create_utxos(self, utxos).await?)
    }

    async fn mark_utxo_spent(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        vout: u32,
    ) -> Result<(), StoreError> {
        Ok(Store::mark_utxo_spent(self, wallet_id, txid, vout).await?)
    }

    async fn update_utxo_confirmations(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        vout: u32,
        confirmations: u32,
    ) -> Result<(), StoreError> {
        Ok(Store::update_utxo_confirmations(self, wallet_id, txid, vout, confirmations).await?)
    }

    async fn recompute_balance(&self, wallet_id: WalletId) -> Result<i64, StoreError> {
        Ok(Store::recompute_balance(self, wallet_id).await?)
    }

    async fn address_labels(
        &self,
        wallet_id: WalletId,
    ) -> Result<HashMap<String, String>, StoreError> {
        Ok(Store::address_labels(self, wallet_id).await?)
    }

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(Store::setting(self, key).await?)
    }

    async fn electrum_servers(
        &self,
        network: Network,
    ) -> Result<Vec<ElectrumServerRecord>, StoreError> {
        Ok(Store::electrum_servers(self, network).await?)
    }

    async fn node_config(
        &self,
        network: Network,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(Store::node_config(self, network).await?)
    }
}
