// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

#![warn(rustdoc::bare_urls)]

pub use haven_core as core;

pub mod client;
pub mod error;
pub mod health;
pub mod options;
pub mod pool;
pub mod socks;
pub mod stream;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod types;

pub use self::client::{ClientConfig, ElectrumClient, Timeouts};
pub use self::error::{Error, TimeoutKind};
pub use self::health::{FailureKind, ServerStats, ServerStatsSnapshot};
pub use self::options::{BackoffOptions, LoadBalancingStrategy, PoolOptions};
pub use self::pool::{
    ConnectionPool, ConnectionState, Error as PoolError, PoolEvent, PoolHandle, PoolStats,
};
pub use self::socks::Socks5Config;
pub use self::stream::Endpoint;
pub use self::types::{Balance, ClientEvent, HeaderNotification, HistoryEntry, UnspentEntry};
