// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Gap-limit address discovery and late consolidation repair.

use haven_core::model::{AddressRecord, Chain, TransactionType};
use haven_core::store::WalletStore;

use super::{SyncContext, WalletSyncer};
use crate::message::Message;
use crate::Error;

/// Keep at least `gap_limit` consecutive unused addresses at the tail of
/// each chain, deriving through the store as needed. Returns what was
/// derived so the caller can re-run discovery for those addresses only.
pub(crate) async fn ensure_gap_limit(
    syncer: &WalletSyncer,
    ctx: &mut SyncContext,
    gap_limit: u32,
) -> Result<Vec<AddressRecord>, Error> {
    let mut derived_all = Vec::new();

    for chain in [Chain::External, Chain::Internal] {
        let mut indexed: Vec<(u32, bool)> = ctx
            .addresses
            .iter()
            .filter_map(|record| {
                record
                    .chain_index()
                    .filter(|(c, _)| *c == chain)
                    .map(|(_, index)| (index, record.used))
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        let trailing_unused = indexed
            .iter()
            .rev()
            .take_while(|(_, used)| !used)
            .count() as u32;
        if trailing_unused >= gap_limit {
            continue;
        }

        let need = gap_limit - trailing_unused;
        let derived = syncer
            .store()
            .derive_addresses(ctx.wallet_id, chain, need)
            .await?;
        if derived.is_empty() {
            continue;
        }
        tracing::debug!(
            "Wallet {}: derived {} {chain:?} addresses to restore the gap",
            ctx.wallet_id,
            derived.len()
        );
        for record in &derived {
            ctx.add_address(record.clone())?;
        }
        ctx.stats.new_addresses += derived.len();
        derived_all.extend(derived);
    }

    Ok(derived_all)
}

/// Re-evaluate stored sent transactions: when every output address has
/// since become ours, the spend was a consolidation all along.
pub(crate) async fn fix_consolidations(
    syncer: &WalletSyncer,
    ctx: &mut SyncContext,
) -> Result<(), Error> {
    let transactions = syncer.store().transactions(ctx.wallet_id).await?;
    let mut retyped = 0usize;

    for tx in transactions
        .into_iter()
        .filter(|tx| tx.tx_type == TransactionType::Sent)
    {
        let outputs = syncer.store().tx_outputs(ctx.wallet_id, tx.txid).await?;
        if outputs.is_empty() {
            continue;
        }
        let all_ours = outputs.iter().all(|output| {
            output
                .address
                .as_ref()
                .map(|address| ctx.owned.contains(address))
                .unwrap_or(false)
        });
        if !all_ours {
            continue;
        }

        let amount_sat = -tx.fee_sat.unwrap_or(0);
        syncer
            .store()
            .retype_transaction(
                ctx.wallet_id,
                tx.txid,
                TransactionType::Sent,
                TransactionType::Consolidation,
                amount_sat,
            )
            .await?;
        retyped += 1;
        tracing::info!("Retyped tx {} from sent to consolidation", tx.txid);
        syncer.emit(Message::TransactionRetyped {
            wallet_id: ctx.wallet_id,
            txid: tx.txid,
            tx_type: TransactionType::Consolidation,
        });
    }

    if retyped > 0 {
        ctx.stats.retyped_consolidations += retyped;
        syncer.store().recompute_balance(ctx.wallet_id).await?;
    }
    Ok(())
}
