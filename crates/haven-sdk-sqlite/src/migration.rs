// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use deadpool_sqlite::Object;
use rusqlite::Connection;
use thiserror::Error;

pub(crate) const STARTUP_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
"#;

const SCHEMA_V1: &str = r#"
BEGIN;

CREATE TABLE IF NOT EXISTS wallets (
    id INTEGER PRIMARY KEY,
    network TEXT NOT NULL,
    balance_sat INTEGER NOT NULL DEFAULT 0,
    account_xpub TEXT
);

CREATE TABLE IF NOT EXISTS addresses (
    wallet_id INTEGER NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
    address TEXT NOT NULL,
    derivation_path TEXT NOT NULL,
    used INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (wallet_id, address)
);

CREATE TABLE IF NOT EXISTS transactions (
    wallet_id INTEGER NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
    txid TEXT NOT NULL,
    tx_type TEXT NOT NULL,
    amount_sat INTEGER NOT NULL,
    fee_sat INTEGER,
    confirmations INTEGER NOT NULL DEFAULT 0,
    block_height INTEGER,
    block_time INTEGER,
    rbf_status TEXT NOT NULL DEFAULT 'active',
    replaced_by_txid TEXT,
    label TEXT,
    PRIMARY KEY (wallet_id, txid, tx_type)
);

CREATE INDEX IF NOT EXISTS transactions_pending
    ON transactions(wallet_id, confirmations, rbf_status);

CREATE TABLE IF NOT EXISTS tx_inputs (
    wallet_id INTEGER NOT NULL,
    txid TEXT NOT NULL,
    idx INTEGER NOT NULL,
    prev_txid TEXT NOT NULL,
    prev_vout INTEGER NOT NULL,
    address TEXT,
    derivation_path TEXT,
    amount_sat INTEGER,
    PRIMARY KEY (wallet_id, txid, idx)
);

CREATE TABLE IF NOT EXISTS tx_outputs (
    wallet_id INTEGER NOT NULL,
    txid TEXT NOT NULL,
    idx INTEGER NOT NULL,
    address TEXT,
    amount_sat INTEGER NOT NULL,
    script_hex TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'unknown',
    is_ours INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (wallet_id, txid, idx)
);

CREATE TABLE IF NOT EXISTS utxos (
    wallet_id INTEGER NOT NULL,
    txid TEXT NOT NULL,
    vout INTEGER NOT NULL,
    address TEXT NOT NULL,
    amount_sat INTEGER NOT NULL,
    confirmations INTEGER NOT NULL DEFAULT 0,
    spent INTEGER NOT NULL DEFAULT 0,
    frozen INTEGER NOT NULL DEFAULT 0,
    draft_locked INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (wallet_id, txid, vout)
);

CREATE TABLE IF NOT EXISTS labels (
    wallet_id INTEGER NOT NULL,
    address TEXT NOT NULL,
    label TEXT NOT NULL,
    PRIMARY KEY (wallet_id, address)
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS electrum_servers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    tls INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    network TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS node_configs (
    network TEXT PRIMARY KEY,
    config TEXT NOT NULL
);

COMMIT;
"#;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Interact(#[from] deadpool_sqlite::InteractError),
    #[error("database schema version {0} is newer than this binary supports")]
    TooNew(i64),
}

const CURRENT_VERSION: i64 = 1;

pub(crate) async fn run(conn: &Object) -> Result<(), MigrationError> {
    conn.interact(|conn| {
        conn.execute_batch(STARTUP_SQL)?;
        migrate(conn)
    })
    .await?
}

fn migrate(conn: &mut Connection) -> Result<(), MigrationError> {
    let version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if version > CURRENT_VERSION {
        return Err(MigrationError::TooNew(version));
    }
    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
    }
    if version != CURRENT_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {CURRENT_VERSION};"))?;
        tracing::info!("Database migrated from schema {version} to {CURRENT_VERSION}");
    }
    Ok(())
}
