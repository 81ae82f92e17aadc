// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! UTXO reconciliation: the server's listunspent view is the truth, the
//! store converges toward it.

use std::collections::{HashMap, HashSet};

use haven_core::bitcoin::Txid;
use haven_core::model::{AddressRecord, UtxoRecord};
use haven_core::store::WalletStore;

use super::{SyncContext, WalletSyncer};
use crate::Error;

pub(crate) async fn reconcile(
    syncer: &WalletSyncer,
    ctx: &mut SyncContext,
    addresses: &[AddressRecord],
) -> Result<(), Error> {
    if addresses.is_empty() {
        return Ok(());
    }

    let scripthashes = ctx.scripthashes_for(addresses);
    let result = ctx.handle.client().list_unspent_batch(&scripthashes).await;
    ctx.handle.report_result(&result);
    let unspents = result?;

    // (txid, vout) -> (address, value, height)
    let mut current: HashMap<(Txid, u32), (String, u64, u64)> = HashMap::new();
    for (record, entries) in addresses.iter().zip(unspents) {
        for entry in entries {
            current.insert(
                (entry.tx_hash, entry.tx_pos),
                (record.address.clone(), entry.value, entry.height),
            );
        }
    }

    // Only this slice of addresses was asked about; UTXOs on other
    // addresses are out of scope for the diff.
    let in_scope: HashSet<&str> = addresses.iter().map(|a| a.address.as_str()).collect();
    let previous: Vec<UtxoRecord> = syncer
        .store()
        .utxos(ctx.wallet_id)
        .await?
        .into_iter()
        .filter(|utxo| !utxo.spent && in_scope.contains(utxo.address.as_str()))
        .collect();
    let previous_keys: HashSet<(Txid, u32)> =
        previous.iter().map(|utxo| utxo.outpoint()).collect();

    for utxo in &previous {
        if !current.contains_key(&utxo.outpoint()) {
            syncer
                .store()
                .mark_utxo_spent(ctx.wallet_id, utxo.txid, utxo.vout)
                .await?;
            ctx.stats.spent_utxos += 1;
            tracing::debug!("UTXO {}:{} spent", utxo.txid, utxo.vout);
        }
    }

    for ((txid, vout), (address, value, height)) in &current {
        let confirmations = ctx.confirmations(*height as i64);
        if previous_keys.contains(&(*txid, *vout)) {
            syncer
                .store()
                .update_utxo_confirmations(ctx.wallet_id, *txid, *vout, confirmations)
                .await?;
            ctx.stats.updated_utxos += 1;
        } else {
            let created = syncer
                .store()
                .create_utxos(vec![UtxoRecord {
                    wallet_id: ctx.wallet_id,
                    txid: *txid,
                    vout: *vout,
                    address: address.clone(),
                    amount_sat: *value as i64,
                    confirmations,
                    spent: false,
                    frozen: false,
                    draft_locked: false,
                }])
                .await?;
            ctx.stats.new_utxos += created;
        }
    }

    Ok(())
}
