// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Transaction processing and classification.
//!
//! New txids are handled in small batches so each batch's rows are durable
//! before the next one is fetched. Classification follows the money: a
//! transaction we funded is sent (or a consolidation when nothing leaves
//! the wallet); one that only pays us is received.

use std::collections::HashSet;

use haven_core::bitcoin::Txid;
use haven_core::model::{
    RbfStatus, TransactionRecord, TransactionType, TxInputRecord, TxOutputKind, TxOutputRecord,
};
use haven_core::store::WalletStore;
use haven_core::tx::DecodedTransaction;

use super::{SyncContext, WalletSyncer};
use crate::message::Message;
use crate::Error;

/// Incremental-persistence batch size.
const PERSIST_BATCH: usize = 10;

struct Classified {
    record: TransactionRecord,
    inputs: Vec<TxInputRecord>,
    outputs: Vec<TxOutputRecord>,
}

pub(crate) async fn process_transactions(
    syncer: &WalletSyncer,
    ctx: &mut SyncContext,
    txids: &[Txid],
) -> Result<(), Error> {
    for chunk in txids.chunks(PERSIST_BATCH) {
        fetch_chunk(ctx, chunk).await?;

        for txid in chunk {
            let Some(decoded) = ctx.tx_cache.get(txid).cloned() else {
                continue;
            };
            let Some(classified) = classify(ctx, &decoded).await? else {
                continue;
            };
            persist(syncer, ctx, &decoded, classified).await?;
        }
    }
    Ok(())
}

/// Fill the context cache for a batch, falling back to per-txid fetches
/// when the batch as a whole fails.
async fn fetch_chunk(ctx: &mut SyncContext, chunk: &[Txid]) -> Result<(), Error> {
    let missing: Vec<Txid> = chunk
        .iter()
        .filter(|txid| !ctx.tx_cache.contains_key(*txid))
        .copied()
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let result = ctx.handle.client().get_transactions_batch(&missing).await;
    ctx.handle.report_result(&result);
    match result {
        Ok(decoded) => {
            for tx in decoded {
                ctx.tx_cache.insert(tx.txid, tx);
            }
            Ok(())
        }
        Err(e) => {
            tracing::warn!("Batch transaction fetch failed ({e}); retrying one by one");
            for txid in missing {
                let result = ctx.handle.client().get_transaction(txid).await;
                ctx.handle.report_result(&result);
                match result {
                    Ok(tx) => {
                        ctx.tx_cache.insert(tx.txid, tx);
                    }
                    Err(haven_electrum::Error::Server(message)) => {
                        tracing::warn!("Transaction {txid} not served: {message}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        }
    }
}

/// Classify one decoded transaction against the wallet's owned addresses.
/// `None` means the transaction touches none of our addresses.
async fn classify(
    ctx: &mut SyncContext,
    decoded: &DecodedTransaction,
) -> Result<Option<Classified>, Error> {
    let mut total_outputs: i64 = 0;
    let mut total_to_wallet: i64 = 0;
    let mut total_to_external: i64 = 0;
    let mut is_received = false;
    for output in &decoded.outputs {
        let value = output.value_sat as i64;
        total_outputs += value;
        match &output.address {
            Some(address) if ctx.owned.contains(address) => {
                is_received = true;
                total_to_wallet += value;
            }
            _ => total_to_external += value,
        }
    }

    let mut is_sent = false;
    let mut total_inputs: i64 = 0;
    let mut inputs: Vec<TxInputRecord> = Vec::with_capacity(decoded.inputs.len());
    for (index, input) in decoded.inputs.iter().enumerate() {
        let resolved = ctx.resolve_prev_tx(input.prev_txid).await?;
        let (address, amount_sat) = if resolved {
            match ctx
                .tx_cache
                .get(&input.prev_txid)
                .and_then(|prev| prev.output(input.vout))
            {
                Some(prev_out) => (prev_out.address.clone(), Some(prev_out.value_sat as i64)),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        if let Some(amount) = amount_sat {
            total_inputs += amount;
        }
        let ours = address
            .as_ref()
            .map(|a| ctx.owned.contains(a))
            .unwrap_or(false);
        if ours {
            is_sent = true;
        }
        let derivation_path = address
            .as_ref()
            .and_then(|a| ctx.paths.get(a).cloned());
        inputs.push(TxInputRecord {
            wallet_id: ctx.wallet_id,
            txid: decoded.txid,
            index: index as u32,
            prev_txid: input.prev_txid,
            prev_vout: input.vout,
            address,
            derivation_path,
            amount_sat,
        });
    }

    if !is_sent && !is_received {
        return Ok(None);
    }

    let fee_sat = if is_sent {
        let fee = total_inputs - total_outputs;
        (fee >= 0).then_some(fee)
    } else {
        None
    };

    let (tx_type, amount_sat) = if is_sent && total_to_external == 0 && total_to_wallet > 0 {
        (TransactionType::Consolidation, -fee_sat.unwrap_or(0))
    } else if is_sent {
        (
            TransactionType::Sent,
            -(total_to_external + fee_sat.unwrap_or(0)),
        )
    } else {
        (TransactionType::Received, total_to_wallet)
    };

    let height = ctx
        .history_heights
        .get(&decoded.txid)
        .copied()
        .unwrap_or(0);
    let confirmations = ctx.confirmations(height);
    let (block_height, block_time) = if confirmations > 0 {
        let time = match ctx.block_time(height as u64).await {
            Ok(time) => Some(time),
            Err(e) => {
                tracing::debug!("No timestamp for block {height}: {e}");
                None
            }
        };
        (Some(height as u32), time)
    } else {
        (None, None)
    };
    let rbf_status = if confirmations >= ctx.settings.confirmation_threshold && confirmations > 0 {
        RbfStatus::Confirmed
    } else {
        RbfStatus::Active
    };

    let outputs: Vec<TxOutputRecord> = decoded
        .outputs
        .iter()
        .map(|output| {
            let ours = output
                .address
                .as_ref()
                .map(|a| ctx.owned.contains(a))
                .unwrap_or(false);
            let kind = match tx_type {
                TransactionType::Consolidation => TxOutputKind::Consolidation,
                TransactionType::Sent if ours => TxOutputKind::Change,
                TransactionType::Sent => TxOutputKind::Recipient,
                TransactionType::Received if ours => TxOutputKind::Recipient,
                TransactionType::Received => TxOutputKind::Unknown,
            };
            TxOutputRecord {
                wallet_id: ctx.wallet_id,
                txid: decoded.txid,
                index: output.index,
                address: output.address.clone(),
                amount_sat: output.value_sat as i64,
                script_hex: output.script_hex.clone(),
                kind,
                is_ours: ours,
            }
        })
        .collect();

    let label = outputs
        .iter()
        .filter(|output| output.is_ours)
        .filter_map(|output| output.address.as_ref())
        .chain(
            inputs
                .iter()
                .filter_map(|input| input.address.as_ref())
                .filter(|address| ctx.owned.contains(*address)),
        )
        .find_map(|address| ctx.labels.get(address).cloned());

    Ok(Some(Classified {
        record: TransactionRecord {
            wallet_id: ctx.wallet_id,
            txid: decoded.txid,
            tx_type,
            amount_sat,
            fee_sat,
            confirmations,
            block_height,
            block_time,
            rbf_status,
            replaced_by_txid: None,
            label,
        },
        inputs,
        outputs,
    }))
}

async fn persist(
    syncer: &WalletSyncer,
    ctx: &mut SyncContext,
    decoded: &DecodedTransaction,
    classified: Classified,
) -> Result<(), Error> {
    let Classified {
        record,
        inputs,
        outputs,
    } = classified;

    let created = syncer
        .store()
        .create_transactions(vec![record.clone()])
        .await?;
    if created == 0 {
        // Same (wallet, txid, type) already stored by an earlier run.
        return Ok(());
    }
    syncer.store().create_tx_inputs(inputs).await?;
    syncer.store().create_tx_outputs(outputs).await?;

    if record.confirmations > 0 {
        detect_replacements(syncer, ctx, decoded, record.txid).await?;
    }

    if let Some(label) = &record.label {
        syncer
            .store()
            .set_transaction_label(ctx.wallet_id, record.txid, label)
            .await?;
    }

    ctx.stats.new_transactions += 1;
    tracing::info!(
        "Wallet {}: new {} tx {} ({} sat)",
        ctx.wallet_id,
        record.tx_type,
        record.txid,
        record.amount_sat
    );
    syncer
        .notifier()
        .notify_transaction(ctx.wallet_id, &record)
        .await;
    syncer.emit(Message::NewTransaction {
        wallet_id: ctx.wallet_id,
        txid: record.txid,
        tx_type: record.tx_type,
        amount_sat: record.amount_sat,
        label: record.label.clone(),
    });
    Ok(())
}

/// In-sync RBF detection: a confirmed transaction in this batch replaces
/// any still-pending transaction sharing one of its inputs.
async fn detect_replacements(
    syncer: &WalletSyncer,
    ctx: &mut SyncContext,
    decoded: &DecodedTransaction,
    winner: Txid,
) -> Result<(), Error> {
    let outpoints: HashSet<(Txid, u32)> = decoded
        .inputs
        .iter()
        .map(|input| (input.prev_txid, input.vout))
        .collect();

    for pending in syncer.store().pending_transactions(ctx.wallet_id).await? {
        if pending.txid == winner {
            continue;
        }
        let inputs = syncer.store().tx_inputs(ctx.wallet_id, pending.txid).await?;
        if inputs.iter().any(|input| outpoints.contains(&input.outpoint())) {
            syncer
                .store()
                .set_rbf_status(ctx.wallet_id, pending.txid, RbfStatus::Replaced, Some(winner))
                .await?;
            ctx.stats.rbf_replacements += 1;
            tracing::info!("Pending tx {} replaced by {winner}", pending.txid);
        }
    }
    Ok(())
}

/// Bring confirmation counts of already-stored transactions up to the tip
/// seen by this sync.
pub(crate) async fn refresh_confirmations(
    syncer: &WalletSyncer,
    ctx: &mut SyncContext,
) -> Result<(), Error> {
    let known = syncer.store().known_txids(ctx.wallet_id).await?;
    let heights: Vec<(Txid, i64)> = ctx
        .history_heights
        .iter()
        .map(|(txid, height)| (*txid, *height))
        .filter(|(txid, height)| *height > 0 && known.contains(txid))
        .collect();

    for (txid, height) in heights {
        let confirmations = ctx.confirmations(height);
        let block_time = match ctx.block_time(height as u64).await {
            Ok(time) => Some(time),
            Err(e) => {
                tracing::debug!("No timestamp for block {height}: {e}");
                None
            }
        };
        syncer
            .store()
            .update_confirmations(
                ctx.wallet_id,
                txid,
                confirmations,
                Some(height as u32),
                block_time,
            )
            .await?;
    }
    Ok(())
}
