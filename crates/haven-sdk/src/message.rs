// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Events the sync core surfaces to the rest of the server, and the push
//! notification seam.

use async_trait::async_trait;
use haven_core::bitcoin::Txid;
use haven_core::model::{TransactionRecord, TransactionType, WalletId};

use crate::sync::SyncStats;

#[derive(Debug, Clone)]
pub enum Message {
    NewTransaction {
        wallet_id: WalletId,
        txid: Txid,
        tx_type: TransactionType,
        amount_sat: i64,
        label: Option<String>,
    },
    /// A stored transaction was reclassified after late address discovery.
    TransactionRetyped {
        wallet_id: WalletId,
        txid: Txid,
        tx_type: TransactionType,
    },
    SyncCompleted {
        wallet_id: WalletId,
        stats: SyncStats,
    },
    NewBlock {
        height: u64,
    },
    AddressActivity {
        scripthash: String,
        address: Option<String>,
        status: Option<String>,
    },
    SubscriptionReconnected,
}

/// Push delivery is someone else's job; the pipeline only hands over facts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_transaction(&self, wallet_id: WalletId, tx: &TransactionRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_transaction(&self, _wallet_id: WalletId, _tx: &TransactionRecord) {}
}
