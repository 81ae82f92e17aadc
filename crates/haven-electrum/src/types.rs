// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Wire shapes of the Electrum 1.4 protocol.

use haven_core::bitcoin::Txid;
use serde::{Deserialize, Serialize};

/// One entry of `blockchain.scripthash.get_history`.
///
/// `height` is 0 for mempool transactions and -1 for mempool transactions
/// with unconfirmed parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub tx_hash: Txid,
    pub height: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
}

impl HistoryEntry {
    pub fn is_confirmed(&self) -> bool {
        self.height > 0
    }
}

/// One entry of `blockchain.scripthash.listunspent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentEntry {
    pub tx_hash: Txid,
    pub tx_pos: u32,
    /// Satoshis.
    pub value: u64,
    pub height: u64,
}

/// `blockchain.scripthash.get_balance` response, in satoshis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

/// `blockchain.headers.subscribe` tip, also delivered as a notification on
/// every new block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderNotification {
    pub height: u64,
    pub hex: String,
}

/// Events surfaced to subscription observers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    NewBlock {
        height: u64,
        header_hex: String,
    },
    AddressActivity {
        scripthash: String,
        /// Known when the scripthash was subscribed with its address.
        address: Option<String>,
        status: Option<String>,
    },
}
