// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! In-memory store.
//!
//! Backs single-process deployments that do not want SQLite, and every
//! test in the workspace.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{Network, Txid};
use tokio::sync::RwLock;

use super::{StoreError, WalletStore};
use crate::model::{
    AddressRecord, Chain, ElectrumServerRecord, RbfStatus, TransactionRecord, TransactionType,
    TxInputRecord, TxOutputRecord, UtxoRecord, WalletId, WalletRecord,
};

#[derive(Debug, Default)]
struct Inner {
    wallets: HashMap<WalletId, WalletRecord>,
    addresses: HashMap<WalletId, Vec<AddressRecord>>,
    transactions: HashMap<WalletId, Vec<TransactionRecord>>,
    tx_inputs: HashMap<(WalletId, Txid), Vec<TxInputRecord>>,
    tx_outputs: HashMap<(WalletId, Txid), Vec<TxOutputRecord>>,
    utxos: HashMap<WalletId, Vec<UtxoRecord>>,
    labels: HashMap<WalletId, HashMap<String, String>>,
    settings: HashMap<String, String>,
    servers: Vec<ElectrumServerRecord>,
    node_configs: HashMap<Network, serde_json::Value>,
    derivable: HashMap<(WalletId, Chain), VecDeque<AddressRecord>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_wallet(&self, wallet: WalletRecord) {
        let mut inner = self.inner.write().await;
        inner.wallets.insert(wallet.id, wallet);
    }

    pub async fn insert_address(&self, address: AddressRecord) {
        let mut inner = self.inner.write().await;
        inner
            .addresses
            .entry(address.wallet_id)
            .or_default()
            .push(address);
    }

    pub async fn insert_transaction(&self, tx: TransactionRecord) {
        let mut inner = self.inner.write().await;
        inner
            .transactions
            .entry(tx.wallet_id)
            .or_default()
            .push(tx);
    }

    pub async fn insert_tx_input(&self, input: TxInputRecord) {
        let mut inner = self.inner.write().await;
        inner
            .tx_inputs
            .entry((input.wallet_id, input.txid))
            .or_default()
            .push(input);
    }

    pub async fn insert_tx_output(&self, output: TxOutputRecord) {
        let mut inner = self.inner.write().await;
        inner
            .tx_outputs
            .entry((output.wallet_id, output.txid))
            .or_default()
            .push(output);
    }

    pub async fn insert_utxo(&self, utxo: UtxoRecord) {
        let mut inner = self.inner.write().await;
        inner.utxos.entry(utxo.wallet_id).or_default().push(utxo);
    }

    pub async fn insert_server(&self, server: ElectrumServerRecord) {
        let mut inner = self.inner.write().await;
        inner.servers.push(server);
    }

    pub async fn set_setting(&self, key: &str, value: &str) {
        let mut inner = self.inner.write().await;
        inner.settings.insert(key.to_string(), value.to_string());
    }

    pub async fn set_node_config(&self, network: Network, config: serde_json::Value) {
        let mut inner = self.inner.write().await;
        inner.node_configs.insert(network, config);
    }

    pub async fn set_address_label(&self, wallet_id: WalletId, address: &str, label: &str) {
        let mut inner = self.inner.write().await;
        inner
            .labels
            .entry(wallet_id)
            .or_default()
            .insert(address.to_string(), label.to_string());
    }

    /// Queue addresses that future `derive_addresses` calls will hand out.
    pub async fn seed_derivable(&self, wallet_id: WalletId, chain: Chain, addresses: Vec<AddressRecord>) {
        let mut inner = self.inner.write().await;
        inner
            .derivable
            .entry((wallet_id, chain))
            .or_default()
            .extend(addresses);
    }

    pub async fn transaction(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        tx_type: TransactionType,
    ) -> Option<TransactionRecord> {
        let inner = self.inner.read().await;
        inner
            .transactions
            .get(&wallet_id)?
            .iter()
            .find(|tx| tx.txid == txid && tx.tx_type == tx_type)
            .cloned()
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn wallet(&self, wallet_id: WalletId) -> Result<WalletRecord, StoreError> {
        let inner = self.inner.read().await;
        inner
            .wallets
            .get(&wallet_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("wallet {wallet_id}")))
    }

    async fn update_wallet_balance(
        &self,
        wallet_id: WalletId,
        balance_sat: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let wallet = inner
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| StoreError::NotFound(format!("wallet {wallet_id}")))?;
        wallet.balance_sat = balance_sat;
        Ok(())
    }

    async fn addresses(&self, wallet_id: WalletId) -> Result<Vec<AddressRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.addresses.get(&wallet_id).cloned().unwrap_or_default())
    }

    async fn create_addresses(&self, addresses: Vec<AddressRecord>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut created = 0;
        for address in addresses {
            let existing = inner.addresses.entry(address.wallet_id).or_default();
            if !existing.iter().any(|a| a.address == address.address) {
                existing.push(address);
                created += 1;
            }
        }
        Ok(created)
    }

    async fn mark_address_used(
        &self,
        wallet_id: WalletId,
        address: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(addresses) = inner.addresses.get_mut(&wallet_id) {
            for a in addresses.iter_mut().filter(|a| a.address == address) {
                a.used = true;
            }
        }
        Ok(())
    }

    async fn derive_addresses(
        &self,
        wallet_id: WalletId,
        chain: Chain,
        count: u32,
    ) -> Result<Vec<AddressRecord>, StoreError> {
        let mut inner = self.inner.write().await;
        let mut derived = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match inner
                .derivable
                .get_mut(&(wallet_id, chain))
                .and_then(VecDeque::pop_front)
            {
                Some(address) => derived.push(address),
                None => break,
            }
        }
        inner
            .addresses
            .entry(wallet_id)
            .or_default()
            .extend(derived.iter().cloned());
        Ok(derived)
    }

    async fn transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .get(&wallet_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn known_txids(&self, wallet_id: WalletId) -> Result<HashSet<Txid>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .get(&wallet_id)
            .map(|txs| txs.iter().map(|tx| tx.txid).collect())
            .unwrap_or_default())
    }

    async fn create_transactions(
        &self,
        transactions: Vec<TransactionRecord>,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut created = 0;
        for tx in transactions {
            let existing = inner.transactions.entry(tx.wallet_id).or_default();
            if !existing
                .iter()
                .any(|t| t.txid == tx.txid && t.tx_type == tx.tx_type)
            {
                existing.push(tx);
                created += 1;
            }
        }
        Ok(created)
    }

    async fn pending_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .get(&wallet_id)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| tx.confirmations == 0 && tx.rbf_status == RbfStatus::Active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn confirmed_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .get(&wallet_id)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| tx.confirmations > 0)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn replaced_without_link(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .get(&wallet_id)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| {
                        tx.rbf_status == RbfStatus::Replaced && tx.replaced_by_txid.is_none()
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_rbf_status(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        rbf_status: RbfStatus,
        replaced_by_txid: Option<Txid>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(txs) = inner.transactions.get_mut(&wallet_id) {
            for tx in txs.iter_mut().filter(|tx| tx.txid == txid) {
                tx.rbf_status = rbf_status;
                tx.replaced_by_txid = replaced_by_txid;
            }
        }
        Ok(())
    }

    async fn update_confirmations(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        confirmations: u32,
        block_height: Option<u32>,
        block_time: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(txs) = inner.transactions.get_mut(&wallet_id) {
            for tx in txs.iter_mut().filter(|tx| tx.txid == txid) {
                tx.confirmations = confirmations;
                if block_height.is_some() {
                    tx.block_height = block_height;
                }
                if block_time.is_some() {
                    tx.block_time = block_time;
                }
                if confirmations > 0 && tx.rbf_status == RbfStatus::Active {
                    tx.rbf_status = RbfStatus::Confirmed;
                }
            }
        }
        Ok(())
    }

    async fn retype_transaction(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        from: TransactionType,
        to: TransactionType,
        amount_sat: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let txs = inner
            .transactions
            .get_mut(&wallet_id)
            .ok_or_else(|| StoreError::NotFound(format!("wallet {wallet_id}")))?;
        let tx = txs
            .iter_mut()
            .find(|tx| tx.txid == txid && tx.tx_type == from)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {txid}")))?;
        tx.tx_type = to;
        tx.amount_sat = amount_sat;
        Ok(())
    }

    async fn set_transaction_label(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        label: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(txs) = inner.transactions.get_mut(&wallet_id) {
            for tx in txs.iter_mut().filter(|tx| tx.txid == txid) {
                tx.label = Some(label.to_string());
            }
        }
        Ok(())
    }

    async fn create_tx_inputs(&self, inputs: Vec<TxInputRecord>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut created = 0;
        for input in inputs {
            let existing = inner
                .tx_inputs
                .entry((input.wallet_id, input.txid))
                .or_default();
            if !existing.iter().any(|i| i.index == input.index) {
                existing.push(input);
                created += 1;
            }
        }
        Ok(created)
    }

    async fn create_tx_outputs(&self, outputs: Vec<TxOutputRecord>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut created = 0;
        for output in outputs {
            let existing = inner
                .tx_outputs
                .entry((output.wallet_id, output.txid))
                .or_default();
            if !existing.iter().any(|o| o.index == output.index) {
                existing.push(output);
                created += 1;
            }
        }
        Ok(created)
    }

    async fn tx_inputs(
        &self,
        wallet_id: WalletId,
        txid: Txid,
    ) -> Result<Vec<TxInputRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tx_inputs
            .get(&(wallet_id, txid))
            .cloned()
            .unwrap_or_default())
    }

    async fn tx_outputs(
        &self,
        wallet_id: WalletId,
        txid: Txid,
    ) -> Result<Vec<TxOutputRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tx_outputs
            .get(&(wallet_id, txid))
            .cloned()
            .unwrap_or_default())
    }

    async fn utxos(&self, wallet_id: WalletId) -> Result<Vec<UtxoRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.utxos.get(&wallet_id).cloned().unwrap_or_default())
    }

    async fn create_utxos(&self, utxos: Vec<UtxoRecord>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut created = 0;
        for utxo in utxos {
            let existing = inner.utxos.entry(utxo.wallet_id).or_default();
            if !existing
                .iter()
                .any(|u| u.txid == utxo.txid && u.vout == utxo.vout)
            {
                existing.push(utxo);
                created += 1;
            }
        }
        Ok(created)
    }

    async fn mark_utxo_spent(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        vout: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(utxos) = inner.utxos.get_mut(&wallet_id) {
            for utxo in utxos
                .iter_mut()
                .filter(|u| u.txid == txid && u.vout == vout)
            {
                utxo.spent = true;
            }
        }
        Ok(())
    }

    async fn update_utxo_confirmations(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        vout: u32,
        confirmations: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(utxos) = inner.utxos.get_mut(&wallet_id) {
            for utxo in utxos
                .iter_mut()
                .filter(|u| u.txid == txid && u.vout == vout)
            {
                utxo.confirmations = confirmations;
            }
        }
        Ok(())
    }

    async fn recompute_balance(&self, wallet_id: WalletId) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        let balance: i64 = inner
            .utxos
            .get(&wallet_id)
            .map(|utxos| {
                utxos
                    .iter()
                    .filter(|u| !u.spent)
                    .map(|u| u.amount_sat)
                    .sum()
            })
            .unwrap_or(0);
        let wallet = inner
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| StoreError::NotFound(format!("wallet {wallet_id}")))?;
        wallet.balance_sat = balance;
        Ok(balance)
    }

    async fn address_labels(
        &self,
        wallet_id: WalletId,
    ) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.labels.get(&wallet_id).cloned().unwrap_or_default())
    }

    async fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.settings.get(key).cloned())
    }

    async fn electrum_servers(
        &self,
        network: Network,
    ) -> Result<Vec<ElectrumServerRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .servers
            .iter()
            .filter(|server| server.network == network)
            .cloned()
            .collect())
    }

    async fn node_config(
        &self,
        network: Network,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.node_configs.get(&network).cloned())
    }
}

#[cfg(test)]
mod test {
    use core::str::FromStr;

    use super::*;

    fn txid(n: u8) -> Txid {
        Txid::from_str(&format!("{:064x}", n)).unwrap()
    }

    fn tx_record(wallet_id: WalletId, txid: Txid, tx_type: TransactionType) -> TransactionRecord {
        TransactionRecord {
            wallet_id,
            txid,
            tx_type,
            amount_sat: 1_000,
            fee_sat: None,
            confirmations: 0,
            block_height: None,
            block_time: None,
            rbf_status: RbfStatus::Active,
            replaced_by_txid: None,
            label: None,
        }
    }

    #[tokio::test]
    async fn create_transactions_skips_duplicates() {
        let store = MemoryStore::new();
        let a = tx_record(1, txid(1), TransactionType::Received);
        let created = store
            .create_transactions(vec![a.clone(), a.clone()])
            .await
            .unwrap();
        assert_eq!(created, 1);

        // Same txid under a different type is a distinct row.
        let b = tx_record(1, txid(1), TransactionType::Sent);
        assert_eq!(store.create_transactions(vec![b]).await.unwrap(), 1);
        assert_eq!(store.create_transactions(vec![a]).await.unwrap(), 0);
        assert_eq!(store.transactions(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn utxo_dedup_and_balance() {
        let store = MemoryStore::new();
        store
            .insert_wallet(WalletRecord {
                id: 1,
                network: Network::Regtest,
                balance_sat: 0,
                account_xpub: None,
            })
            .await;
        let utxo = UtxoRecord {
            wallet_id: 1,
            txid: txid(9),
            vout: 0,
            address: "addr".to_string(),
            amount_sat: 5_000,
            confirmations: 1,
            spent: false,
            frozen: false,
            draft_locked: false,
        };
        assert_eq!(
            store
                .create_utxos(vec![utxo.clone(), utxo.clone()])
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.recompute_balance(1).await.unwrap(), 5_000);

        store.mark_utxo_spent(1, txid(9), 0).await.unwrap();
        assert_eq!(store.recompute_balance(1).await.unwrap(), 0);
        assert_eq!(store.wallet(1).await.unwrap().balance_sat, 0);
    }

    #[tokio::test]
    async fn derive_addresses_drains_the_seeded_queue() {
        let store = MemoryStore::new();
        store
            .seed_derivable(
                1,
                Chain::External,
                (0..3)
                    .map(|i| AddressRecord {
                        wallet_id: 1,
                        address: format!("addr{i}"),
                        derivation_path: format!("m/84'/1'/0'/0/{i}"),
                        used: false,
                    })
                    .collect(),
            )
            .await;

        let derived = store.derive_addresses(1, Chain::External, 2).await.unwrap();
        assert_eq!(derived.len(), 2);
        assert_eq!(store.addresses(1).await.unwrap().len(), 2);

        // Queue exhaustion is not an error.
        let rest = store.derive_addresses(1, Chain::External, 5).await.unwrap();
        assert_eq!(rest.len(), 1);
    }
}
