// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! History fetch and txid dedup.

use haven_core::bitcoin::Txid;
use haven_core::model::AddressRecord;
use haven_core::store::WalletStore;

use super::{SyncContext, WalletSyncer};
use crate::Error;

/// Fetch histories for the given addresses in one batch, record per-txid
/// heights, flip used flags, and return the txids the store has never seen.
pub(crate) async fn fetch_new_txids(
    syncer: &WalletSyncer,
    ctx: &mut SyncContext,
    addresses: &[AddressRecord],
) -> Result<Vec<Txid>, Error> {
    if addresses.is_empty() {
        return Ok(Vec::new());
    }

    let scripthashes = ctx.scripthashes_for(addresses);
    let result = ctx.handle.client().get_history_batch(&scripthashes).await;
    ctx.handle.report_result(&result);
    let histories = result?;

    let mut seen: Vec<Txid> = Vec::new();
    for (record, history) in addresses.iter().zip(histories) {
        if !history.is_empty() && !record.used {
            syncer
                .store()
                .mark_address_used(ctx.wallet_id, &record.address)
                .await?;
            if let Some(local) = ctx
                .addresses
                .iter_mut()
                .find(|a| a.address == record.address)
            {
                local.used = true;
            }
        }
        for entry in history {
            let slot = ctx.history_heights.entry(entry.tx_hash).or_insert(entry.height);
            if entry.height > *slot {
                *slot = entry.height;
            }
            if !seen.contains(&entry.tx_hash) {
                seen.push(entry.tx_hash);
            }
        }
    }

    let known = syncer.store().known_txids(ctx.wallet_id).await?;
    let new_txids: Vec<Txid> = seen
        .into_iter()
        .filter(|txid| !known.contains(txid))
        .collect();
    tracing::debug!(
        "Wallet {}: {} history txids, {} new",
        ctx.wallet_id,
        ctx.history_heights.len(),
        new_txids.len()
    );
    Ok(new_txids)
}
