// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use std::collections::HashMap;

use haven_core::bitcoin::Network;
use haven_core::model::{ElectrumServerRecord, WalletId};

use super::Store;
use crate::error::Error;

impl Store {
    pub async fn address_labels(
        &self,
        wallet_id: WalletId,
    ) -> Result<HashMap<String, String>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn
                .prepare_cached("SELECT address, label FROM labels WHERE wallet_id = ?;")?;
            let mut rows = stmt.query([wallet_id])?;
            let mut labels = HashMap::new();
            while let Some(row) = rows.next()? {
                labels.insert(row.get(0)?, row.get(1)?);
            }
            Ok(labels)
        })
        .await?
    }

    pub async fn setting(&self, key: &str) -> Result<Option<String>, Error> {
        let conn = self.acquire().await?;
        let key = key.to_string();
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached("SELECT value FROM settings WHERE key = ?;")?;
            let mut rows = stmt.query([key])?;
            Ok(match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            })
        })
        .await?
    }

    pub async fn electrum_servers(
        &self,
        network: Network,
    ) -> Result<Vec<ElectrumServerRecord>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, label, host, port, tls, priority, enabled FROM electrum_servers \
                 WHERE network = ? ORDER BY priority;",
            )?;
            let mut rows = stmt.query([network.to_string()])?;
            let mut servers = Vec::new();
            while let Some(row) = rows.next()? {
                servers.push(ElectrumServerRecord {
                    id: row.get(0)?,
                    label: row.get(1)?,
                    host: row.get(2)?,
                    port: row.get(3)?,
                    tls: row.get(4)?,
                    priority: row.get(5)?,
                    enabled: row.get(6)?,
                    network,
                });
            }
            Ok(servers)
        })
        .await?
    }

    pub async fn node_config(
        &self,
        network: Network,
    ) -> Result<Option<serde_json::Value>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt =
                conn.prepare_cached("SELECT config FROM node_configs WHERE network = ?;")?;
            let mut rows = stmt.query([network.to_string()])?;
            match rows.next()? {
                Some(row) => {
                    let raw: String = row.get(0)?;
                    Ok(Some(serde_json::from_str(&raw)?))
                }
                None => Ok(None),
            }
        })
        .await?
    }

    /// Wallets whose configured network matches, for startup sweeps.
    pub async fn wallet_ids(&self, network: Network) -> Result<Vec<WalletId>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt =
                conn.prepare_cached("SELECT id FROM wallets WHERE network = ? ORDER BY id;")?;
            let mut rows = stmt.query([network.to_string()])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                ids.push(row.get(0)?);
            }
            Ok(ids)
        })
        .await?
    }
}
