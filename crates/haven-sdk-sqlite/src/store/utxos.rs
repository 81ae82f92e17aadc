// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use core::str::FromStr;

use haven_core::bitcoin::Txid;
use haven_core::model::{UtxoRecord, WalletId};

use super::Store;
use crate::error::Error;

impl Store {
    pub async fn utxos(&self, wallet_id: WalletId) -> Result<Vec<UtxoRecord>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT txid, vout, address, amount_sat, confirmations, spent, frozen, draft_locked \
                 FROM utxos WHERE wallet_id = ?;",
            )?;
            let mut rows = stmt.query([wallet_id])?;
            let mut utxos = Vec::new();
            while let Some(row) = rows.next()? {
                let txid: String = row.get(0)?;
                utxos.push(UtxoRecord {
                    wallet_id,
                    txid: Txid::from_str(&txid)?,
                    vout: row.get(1)?,
                    address: row.get(2)?,
                    amount_sat: row.get(3)?,
                    confirmations: row.get(4)?,
                    spent: row.get(5)?,
                    frozen: row.get(6)?,
                    draft_locked: row.get(7)?,
                });
            }
            Ok(utxos)
        })
        .await?
    }

    pub async fn create_utxos(&self, utxos: Vec<UtxoRecord>) -> Result<usize, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO utxos \
                 (wallet_id, txid, vout, address, amount_sat, confirmations, spent, frozen, draft_locked) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);",
            )?;
            let mut created = 0;
            for utxo in utxos {
                created += stmt.execute((
                    utxo.wallet_id,
                    utxo.txid.to_string(),
                    utxo.vout,
                    utxo.address,
                    utxo.amount_sat,
                    utxo.confirmations,
                    utxo.spent,
                    utxo.frozen,
                    utxo.draft_locked,
                ))?;
            }
            Ok(created)
        })
        .await?
    }

    pub async fn mark_utxo_spent(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        vout: u32,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            conn.execute(
                "UPDATE utxos SET spent = 1 WHERE wallet_id = ? AND txid = ? AND vout = ?;",
                (wallet_id, txid.to_string(), vout),
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn update_utxo_confirmations(
        &self,
        wallet_id: WalletId,
        txid: Txid,
        vout: u32,
        confirmations: u32,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            conn.execute(
                "UPDATE utxos SET confirmations = ? WHERE wallet_id = ? AND txid = ? AND vout = ?;",
                (confirmations, wallet_id, txid.to_string(), vout),
            )?;
            Ok(())
        })
        .await?
    }
}
