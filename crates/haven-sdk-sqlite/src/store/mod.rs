// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Store

use std::fmt::Debug;
use std::path::Path;

use deadpool_sqlite::{Config, Object, Pool, Runtime};
use haven_core::bitcoin::Network;
use haven_core::model::{ElectrumServerRecord, WalletRecord};

mod addresses;
mod config;
mod contract;
mod transactions;
mod utxos;
mod wallets;

use crate::error::Error;
use crate::migration;

/// Store
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (and migrate) the database at `path`.
    pub async fn open<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let cfg = Config::new(path.as_ref());
        let pool = cfg.create_pool(Runtime::Tokio1)?;
        let conn = pool.get().await?;
        migration::run(&conn).await?;
        Ok(Self { pool })
    }

    pub(crate) async fn acquire(&self) -> Result<Object, Error> {
        Ok(self.pool.get().await?)
    }

    /// Insert a wallet row, replacing an existing one with the same id.
    pub async fn insert_wallet(&self, wallet: WalletRecord) -> Result<(), Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            conn.execute(
                "INSERT INTO wallets (id, network, balance_sat, account_xpub) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET network = excluded.network, account_xpub = excluded.account_xpub;",
                (
                    wallet.id,
                    wallet.network.to_string(),
                    wallet.balance_sat,
                    wallet.account_xpub,
                ),
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn insert_electrum_server(
        &self,
        server: ElectrumServerRecord,
    ) -> Result<i64, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            conn.execute(
                "INSERT INTO electrum_servers (label, host, port, tls, priority, enabled, network) \
                 VALUES (?, ?, ?, ?, ?, ?, ?);",
                (
                    server.label,
                    server.host,
                    server.port,
                    server.tls,
                    server.priority,
                    server.enabled,
                    server.network.to_string(),
                ),
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await?
    }

    pub async fn set_server_enabled(&self, server_id: i64, enabled: bool) -> Result<(), Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            conn.execute(
                "UPDATE electrum_servers SET enabled = ? WHERE id = ?;",
                (enabled, server_id),
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), Error> {
        let conn = self.acquire().await?;
        let key = key.to_string();
        let value = value.to_string();
        conn.interact(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
                (key, value),
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn set_address_label(
        &self,
        wallet_id: i64,
        address: &str,
        label: &str,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        let address = address.to_string();
        let label = label.to_string();
        conn.interact(move |conn| {
            conn.execute(
                "INSERT INTO labels (wallet_id, address, label) VALUES (?, ?, ?) \
                 ON CONFLICT(wallet_id, address) DO UPDATE SET label = excluded.label;",
                (wallet_id, address, label),
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn set_node_config(
        &self,
        network: Network,
        config: serde_json::Value,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            conn.execute(
                "INSERT INTO node_configs (network, config) VALUES (?, ?) \
                 ON CONFLICT(network) DO UPDATE SET config = excluded.config;",
                (network.to_string(), config.to_string()),
            )?;
            Ok(())
        })
        .await?
    }
}

pub(crate) fn parse_network(network: &str) -> Result<Network, Error> {
    use core::str::FromStr;
    Network::from_str(network).map_err(|_| Error::UnknownNetwork(network.to_string()))
}
