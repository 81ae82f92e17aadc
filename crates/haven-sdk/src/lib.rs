// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

#![warn(rustdoc::bare_urls)]

pub use haven_core as core;
pub use haven_electrum as electrum;

mod error;
pub mod logger;
pub mod message;
pub mod registry;
pub mod settings;
pub mod sync;

pub use self::error::Error;
pub use self::message::{Message, NoopNotifier, Notifier};
pub use self::registry::{NodeConfig, PoolRegistry};
pub use self::sync::{SyncOptions, SyncProfile, SyncStats, WalletSyncer};
