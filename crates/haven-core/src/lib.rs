// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

#![warn(rustdoc::bare_urls)]

pub use bitcoin;
pub use bitcoin::hashes;

pub mod amount;
pub mod model;
pub mod script;
pub mod store;
pub mod tx;

pub use self::model::{
    AddressRecord, Chain, ElectrumServerRecord, RbfStatus, SystemSettings, TransactionRecord,
    TransactionType, TxInputRecord, TxOutputKind, TxOutputRecord, UtxoRecord, WalletId,
    WalletRecord,
};
pub use self::script::{address_to_scripthash, electrum_scripthash, script_of_address};
pub use self::store::{MemoryStore, StoreError, WalletStore};
pub use self::tx::{DecodedInput, DecodedOutput, DecodedTransaction};
