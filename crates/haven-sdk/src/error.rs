// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use haven_core::bitcoin::Network;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] haven_core::store::StoreError),
    #[error(transparent)]
    Pool(#[from] haven_electrum::PoolError),
    #[error(transparent)]
    Client(#[from] haven_electrum::Error),
    #[error(transparent)]
    Script(#[from] haven_core::script::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("wallet is on {wallet} but the pool serves {pool}")]
    NetworkMismatch { wallet: Network, pool: Network },
}
