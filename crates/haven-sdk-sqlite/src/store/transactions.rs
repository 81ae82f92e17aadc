// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use core::str::FromStr;
use std::collections::HashSet;

use haven_core::bitcoin::Txid;
use haven_core::model::{
    RbfStatus, TransactionRecord, TransactionType, TxInputRecord, TxOutputKind, TxOutputRecord,
    WalletId,
};
use rusqlite::Row;

use super::Store;
use crate::error::Error;

const TX_COLUMNS: &str = "wallet_id, txid, tx_type, amount_sat, fee_sat, confirmations, \
                          block_height, block_time, rbf_status, replaced_by_txid, label";

fn tx_from_row(row: &Row<'_>) -> Result<TransactionRecord, Error> {
    let txid: String = row.get(1)?;
    let tx_type: String = row.get(2)?;
    let rbf_status: String = row.get(8)?;
    let replaced_by: Option<String> = row.get(9)?;
    Ok(TransactionRecord {
        wallet_id: row.get(0)?,
        txid: Txid::from_str(&txid)?,
        tx_type: TransactionType::from_str(&tx_type)?,
        amount_sat: row.get(3)?,
        fee_sat: row.get(4)?,
        confirmations: row.get(5)?,
        block_height: row.get(6)?,
        block_time: row.get(7)?,
        rbf_status: RbfStatus::from_str(&rbf_status)?,
        replaced_by_txid: replaced_by.as_deref().map(Txid::from_str).transpose()?,
        label: row.get(10)?,
    })
}

impl Store {
    pub async fn transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, Error> {
        self.transactions_where(wallet_id, "", Vec::new()).await
    }

    pub async fn pending_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, Error> {
        self.transactions_where(
            wallet_id,
            "AND confirmations = 0 AND rbf_status = ?",
            vec![RbfStatus::Active.to_string()],
        )
        .await
    }

    pub async fn confirmed_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, Error> {
        self.transactions_where(wallet_id, "AND confirmations > 0", Vec::new())
            .await
    }

    pub async fn replaced_without_link(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<TransactionRecord>, Error> {
        self.transactions_where(
            wallet_id,
            "AND rbf_status = ? AND replaced_by_txid IS NULL",
            vec![RbfStatus::Replaced.to_string()],
        )
        .await
    }

    async fn transactions_where(
        &self,
        wallet_id: WalletId,
        clause: &'static str,
        params: Vec<String>,
    ) -> Result<Vec<TransactionRecord>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let sql =
                format!("SELECT {TX_COLUMNS} FROM transactions WHERE wallet_id = ? {clause};");
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut values: Vec<&dyn rusqlite::ToSql> = vec![&wallet_id];
            for param in &params {
                values.push(param);
            }
            let mut rows = stmt.query(values.as_slice())?;
            let mut transactions = Vec::new();
            while let Some(row) = rows.next()? {
                transactions.push(tx_from_row(row)?);
            }
            Ok(transactions)
        })
        .await?
    }

    pub async fn known_txids(&self, wallet_id: WalletId) -> Result<HashSet<Txid>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn
                .prepare_cached("SELECT DISTINCT txid FROM transactions WHERE wallet_id = ?;")?;
            let mut rows = stmt.query([wallet_id])?;
            let mut txids = HashSet::new();
            while let Some(row) = rows.next()? {
                let txid: String = row.get(0)?;
                txids.insert(Txid::from_str(&txid)?);
            }
            Ok(txids)
        })
        .await?
    }

    pub async fn create_transactions(
        &self,
        transactions: Vec<TransactionRecord>,
    ) -> Result<usize, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO transactions \
                 (wallet_id, txid, tx_type, amount_sat, fee_sat, confirmations, block_height, \
                  block_time, rbf_status, replaced_by_txid, label) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);",
            )?;
            let mut created = 0;
            for tx in transactions {
                created += stmt.execute((
                    tx.wallet_id,
                    tx.txid.to_string(),
                    tx.tx_type.to_string(),
                    tx.amount_sat,
                    tx.fee_sat,
                    tx.confirmations,
                    tx.block_height,
                    tx.block_time,
                    tx.rbf_status.to_string(),
                    tx.replaced_by_txid.map(|txid| txid.to_string()),
                    tx.label,
                ))?;
            }
            Ok(created)
        })
        .await?
    }

    pub async fn set_rbf_status(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        rbf_status: RbfStatus,
        replaced_by_txid: Option<Txid>,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            conn.execute(
                "UPDATE transactions SET rbf_status = ?, replaced_by_txid = ? \
                 WHERE wallet_id = ? AND txid = ?;",
                (
                    rbf_status.to_string(),
                    replaced_by_txid.map(|txid| txid.to_string()),
                    wallet_id,
                    txid.to_string(),
                ),
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn update_confirmations(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        confirmations: u32,
        block_height: Option<u32>,
        block_time: Option<u64>,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            conn.execute(
                "UPDATE transactions SET confirmations = ?, \
                 block_height = COALESCE(?, block_height), \
                 block_time = COALESCE(?, block_time), \
                 rbf_status = CASE WHEN ? > 0 AND rbf_status = 'active' THEN 'confirmed' ELSE rbf_status END \
                 WHERE wallet_id = ? AND txid = ?;",
                (
                    confirmations,
                    block_height,
                    block_time,
                    confirmations,
                    wallet_id,
                    txid.to_string(),
                ),
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn retype_transaction(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        from: TransactionType,
        to: TransactionType,
        amount_sat: i64,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let updated = conn.execute(
                "UPDATE transactions SET tx_type = ?, amount_sat = ? \
                 WHERE wallet_id = ? AND txid = ? AND tx_type = ?;",
                (
                    to.to_string(),
                    amount_sat,
                    wallet_id,
                    txid.to_string(),
                    from.to_string(),
                ),
            )?;
            if updated == 0 {
                return Err(Error::NotFound(format!("transaction {txid}")));
            }
            Ok(())
        })
        .await?
    }

    pub async fn set_transaction_label(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        label: &str,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        let label = label.to_string();
        conn.interact(move |conn| {
            conn.execute(
                "UPDATE transactions SET label = ? WHERE wallet_id = ? AND txid = ?;",
                (label, wallet_id, txid.to_string()),
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn create_tx_inputs(&self, inputs: Vec<TxInputRecord>) -> Result<usize, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO tx_inputs \
                 (wallet_id, txid, idx, prev_txid, prev_vout, address, derivation_path, amount_sat) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?);",
            )?;
            let mut created = 0;
            for input in inputs {
                created += stmt.execute((
                    input.wallet_id,
                    input.txid.to_string(),
                    input.index,
                    input.prev_txid.to_string(),
                    input.prev_vout,
                    input.address,
                    input.derivation_path,
                    input.amount_sat,
                ))?;
            }
            Ok(created)
        })
        .await?
    }

    pub async fn create_tx_outputs(&self, outputs: Vec<TxOutputRecord>) -> Result<usize, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO tx_outputs \
                 (wallet_id, txid, idx, address, amount_sat, script_hex, kind, is_ours) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?);",
            )?;
            let mut created = 0;
            for output in outputs {
                created += stmt.execute((
                    output.wallet_id,
                    output.txid.to_string(),
                    output.index,
                    output.address,
                    output.amount_sat,
                    output.script_hex,
                    output.kind.to_string(),
                    output.is_ours,
                ))?;
            }
            Ok(created)
        })
        .await?
    }

    pub async fn tx_inputs(
        &self,
        wallet_id: WalletId,
        txid: Txid,
    ) -> Result<Vec<TxInputRecord>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT idx, prev_txid, prev_vout, address, derivation_path, amount_sat \
                 FROM tx_inputs WHERE wallet_id = ? AND txid = ? ORDER BY idx;",
            )?;
            let mut rows = stmt.query((wallet_id, txid.to_string()))?;
            let mut inputs = Vec::new();
            while let Some(row) = rows.next()? {
                let prev_txid: String = row.get(1)?;
                inputs.push(TxInputRecord {
                    wallet_id,
                    txid,
                    index: row.get(0)?,
                    prev_txid: Txid::from_str(&prev_txid)?,
                    prev_vout: row.get(2)?,
                    address: row.get(3)?,
                    derivation_path: row.get(4)?,
                    amount_sat: row.get(5)?,
                });
            }
            Ok(inputs)
        })
        .await?
    }

    pub async fn tx_outputs(
        &self,
        wallet_id: WalletId,
        txid: Txid,
    ) -> Result<Vec<TxOutputRecord>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT idx, address, amount_sat, script_hex, kind, is_ours \
                 FROM tx_outputs WHERE wallet_id = ? AND txid = ? ORDER BY idx;",
            )?;
            let mut rows = stmt.query((wallet_id, txid.to_string()))?;
            let mut outputs = Vec::new();
            while let Some(row) = rows.next()? {
                let kind: String = row.get(4)?;
                outputs.push(TxOutputRecord {
                    wallet_id,
                    txid,
                    index: row.get(0)?,
                    address: row.get(1)?,
                    amount_sat: row.get(2)?,
                    script_hex: row.get(3)?,
                    kind: TxOutputKind::from_str(&kind)?,
                    is_ours: row.get(5)?,
                });
            }
            Ok(outputs)
        })
        .await?
    }
}
