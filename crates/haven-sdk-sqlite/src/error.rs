// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use deadpool_sqlite::{CreatePoolError, InteractError, PoolError};
use haven_core::store::StoreError;

use crate::migration::MigrationError;

/// Store error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Sqlite error
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// Pool error
    #[error(transparent)]
    CreateDeadPool(#[from] CreatePoolError),
    /// Pool error
    #[error(transparent)]
    DeadPool(#[from] PoolError),
    /// Pool error
    #[error(transparent)]
    DeadPoolInteract(#[from] InteractError),
    /// Migration error
    #[error(transparent)]
    Migration(#[from] MigrationError),
    /// Domain enum parse error
    #[error(transparent)]
    Model(#[from] haven_core::model::Error),
    /// Hex/txid parse error
    #[error(transparent)]
    Hex(#[from] haven_core::hashes::hex::Error),
    /// JSON error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Bip32 error
    #[error(transparent)]
    Bip32(#[from] haven_core::bitcoin::bip32::Error),
    /// Address error
    #[error(transparent)]
    Address(#[from] haven_core::bitcoin::address::Error),
    /// Network parse error
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    /// Wallet has no account xpub to derive from
    #[error("wallet {0} has no account xpub")]
    NoAccountXpub(i64),
    /// Not found
    #[error("sqlite: {0} not found")]
    NotFound(String),
}

/// Sync-safe wrapper carrying only the rendered message of a backend error
/// that itself cannot be made `Sync` (e.g. `deadpool_sqlite::InteractError`
/// wraps a `Box<dyn Any + Send>`).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct BackendErrorMessage(String);

impl From<Error> for StoreError {
    fn from(error: Error) -> Self {
        match error {
            Error::NotFound(what) => StoreError::NotFound(what),
            other => StoreError::backend(BackendErrorMessage(other.to_string())),
        }
    }
}
