// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Replace-by-fee cleanup.
//!
//! A pending transaction that shares an input with a confirmed transaction
//! of the same wallet lost the race: whatever the motive, the confirmed one
//! spent the coin. Both fee bumps and double spends end up `Replaced`.

use std::collections::HashSet;

use haven_core::bitcoin::Txid;
use haven_core::model::{RbfStatus, WalletId};
use haven_core::store::WalletStore;

use crate::Error;

/// First pass marks pending transactions replaced by confirmed ones sharing
/// any input; second pass repairs `Replaced` rows whose link is missing.
/// Returns `(replaced, repaired)`.
pub(crate) async fn cleanup_replaced(
    store: &dyn WalletStore,
    wallet_id: WalletId,
) -> Result<(usize, usize), Error> {
    let confirmed = store.confirmed_transactions(wallet_id).await?;
    let mut confirmed_inputs: Vec<(Txid, HashSet<(Txid, u32)>)> = Vec::new();
    for tx in &confirmed {
        let inputs = store.tx_inputs(wallet_id, tx.txid).await?;
        if !inputs.is_empty() {
            confirmed_inputs.push((tx.txid, inputs.iter().map(|i| i.outpoint()).collect()));
        }
    }

    let mut replaced = 0;
    for pending in store.pending_transactions(wallet_id).await? {
        if let Some(winner) =
            replacement_for(store, wallet_id, pending.txid, &confirmed_inputs).await?
        {
            store
                .set_rbf_status(wallet_id, pending.txid, RbfStatus::Replaced, Some(winner))
                .await?;
            tracing::info!("Pending tx {} was replaced by {winner}", pending.txid);
            replaced += 1;
        }
    }

    let mut repaired = 0;
    for broken in store.replaced_without_link(wallet_id).await? {
        if let Some(winner) =
            replacement_for(store, wallet_id, broken.txid, &confirmed_inputs).await?
        {
            store
                .set_rbf_status(wallet_id, broken.txid, RbfStatus::Replaced, Some(winner))
                .await?;
            repaired += 1;
        }
    }

    Ok((replaced, repaired))
}

/// The confirmed transaction (if any) spending an input of `txid`.
async fn replacement_for(
    store: &dyn WalletStore,
    wallet_id: WalletId,
    txid: Txid,
    confirmed_inputs: &[(Txid, HashSet<(Txid, u32)>)],
) -> Result<Option<Txid>, Error> {
    let inputs = store.tx_inputs(wallet_id, txid).await?;
    if inputs.is_empty() {
        return Ok(None);
    }
    let outpoints: HashSet<(Txid, u32)> = inputs.iter().map(|i| i.outpoint()).collect();
    Ok(confirmed_inputs
        .iter()
        .find(|(winner, spent)| *winner != txid && !spent.is_disjoint(&outpoints))
        .map(|(winner, _)| *winner))
}
