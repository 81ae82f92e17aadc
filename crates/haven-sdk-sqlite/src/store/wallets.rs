// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use haven_core::model::{WalletId, WalletRecord};

use super::{parse_network, Store};
use crate::error::Error;

impl Store {
    pub async fn wallet(&self, wallet_id: WalletId) -> Result<WalletRecord, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, network, balance_sat, account_xpub FROM wallets WHERE id = ?;",
            )?;
            let mut rows = stmt.query([wallet_id])?;
            let row = rows
                .next()?
                .ok_or_else(|| Error::NotFound(format!("wallet {wallet_id}")))?;
            let network: String = row.get(1)?;
            Ok(WalletRecord {
                id: row.get(0)?,
                network: parse_network(&network)?,
                balance_sat: row.get(2)?,
                account_xpub: row.get(3)?,
            })
        })
        .await?
    }

    pub async fn update_wallet_balance(
        &self,
        wallet_id: WalletId,
        balance_sat: i64,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            conn.execute(
                "UPDATE wallets SET balance_sat = ? WHERE id = ?;",
                (balance_sat, wallet_id),
            )?;
            Ok(())
        })
        .await?
    }

    /// Balance is the sum of unspent outputs; persist and return it.
    pub async fn recompute_balance(&self, wallet_id: WalletId) -> Result<i64, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let balance: i64 = conn.query_row(
                "SELECT COALESCE(SUM(amount_sat), 0) FROM utxos WHERE wallet_id = ? AND spent = 0;",
                [wallet_id],
                |row| row.get(0),
            )?;
            conn.execute(
                "UPDATE wallets SET balance_sat = ? WHERE id = ?;",
                (balance, wallet_id),
            )?;
            Ok(balance)
        })
        .await?
    }
}
