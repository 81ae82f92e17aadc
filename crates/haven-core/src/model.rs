// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Store-owned domain records.

use core::fmt;
use core::str::FromStr;

use bitcoin::{Network, Txid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type WalletId = i64;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown transaction type: {0}")]
    UnknownTransactionType(String),
    #[error("unknown rbf status: {0}")]
    UnknownRbfStatus(String),
    #[error("unknown output kind: {0}")]
    UnknownOutputKind(String),
}

/// BIP-44 chain of an address: the trailing `/0/i` or `/1/i` of its
/// derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    External,
    Internal,
}

impl Chain {
    pub fn index(self) -> u32 {
        match self {
            Self::External => 0,
            Self::Internal => 1,
        }
    }
}

/// Extract the `(chain, index)` suffix from a derivation path string.
pub fn chain_index(path: &str) -> Option<(Chain, u32)> {
    let mut segments = path.rsplit('/');
    let index: u32 = segments.next()?.parse().ok()?;
    let chain = match segments.next()? {
        "0" => Chain::External,
        "1" => Chain::Internal,
        _ => return None,
    };
    Some((chain, index))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Received,
    Sent,
    Consolidation,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Sent => write!(f, "sent"),
            Self::Consolidation => write!(f, "consolidation"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "sent" => Ok(Self::Sent),
            "consolidation" => Ok(Self::Consolidation),
            other => Err(Error::UnknownTransactionType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RbfStatus {
    Active,
    Confirmed,
    Replaced,
}

impl fmt::Display for RbfStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Replaced => write!(f, "replaced"),
        }
    }
}

impl FromStr for RbfStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "confirmed" => Ok(Self::Confirmed),
            "replaced" => Ok(Self::Replaced),
            other => Err(Error::UnknownRbfStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxOutputKind {
    Change,
    Recipient,
    Consolidation,
    Unknown,
}

impl fmt::Display for TxOutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Change => write!(f, "change"),
            Self::Recipient => write!(f, "recipient"),
            Self::Consolidation => write!(f, "consolidation"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for TxOutputKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "change" => Ok(Self::Change),
            "recipient" => Ok(Self::Recipient),
            "consolidation" => Ok(Self::Consolidation),
            "unknown" => Ok(Self::Unknown),
            other => Err(Error::UnknownOutputKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: WalletId,
    pub network: Network,
    pub balance_sat: i64,
    /// Account-level xpub used for gap-limit address derivation.
    pub account_xpub: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub wallet_id: WalletId,
    pub address: String,
    pub derivation_path: String,
    pub used: bool,
}

impl AddressRecord {
    pub fn chain_index(&self) -> Option<(Chain, u32)> {
        chain_index(&self.derivation_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub wallet_id: WalletId,
    pub txid: Txid,
    pub tx_type: TransactionType,
    /// Signed satoshis: negative for sent and consolidation.
    pub amount_sat: i64,
    pub fee_sat: Option<i64>,
    pub confirmations: u32,
    pub block_height: Option<u32>,
    pub block_time: Option<u64>,
    pub rbf_status: RbfStatus,
    pub replaced_by_txid: Option<Txid>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInputRecord {
    pub wallet_id: WalletId,
    pub txid: Txid,
    pub index: u32,
    pub prev_txid: Txid,
    pub prev_vout: u32,
    pub address: Option<String>,
    /// Set when the spent output belongs to one of our addresses.
    pub derivation_path: Option<String>,
    pub amount_sat: Option<i64>,
}

impl TxInputRecord {
    pub fn outpoint(&self) -> (Txid, u32) {
        (self.prev_txid, self.prev_vout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputRecord {
    pub wallet_id: WalletId,
    pub txid: Txid,
    pub index: u32,
    pub address: Option<String>,
    pub amount_sat: i64,
    pub script_hex: String,
    pub kind: TxOutputKind,
    pub is_ours: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub wallet_id: WalletId,
    pub txid: Txid,
    pub vout: u32,
    pub address: String,
    pub amount_sat: i64,
    pub confirmations: u32,
    pub spent: bool,
    pub frozen: bool,
    pub draft_locked: bool,
}

impl UtxoRecord {
    pub fn outpoint(&self) -> (Txid, u32) {
        (self.txid, self.vout)
    }
}

/// An Electrum server as configured in the store. Immutable from the
/// pool's perspective; changes arrive only through a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectrumServerRecord {
    pub id: i64,
    pub label: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Lower is more preferred.
    pub priority: i32,
    pub enabled: bool,
    pub network: Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemSettings {
    pub dust_threshold: i64,
    pub confirmation_threshold: u32,
    pub deep_confirmation_threshold: u32,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            dust_threshold: 546,
            confirmation_threshold: 1,
            deep_confirmation_threshold: 3,
        }
    }
}

impl SystemSettings {
    pub const DUST_THRESHOLD: &'static str = "dustThreshold";
    pub const CONFIRMATION_THRESHOLD: &'static str = "confirmationThreshold";
    pub const DEEP_CONFIRMATION_THRESHOLD: &'static str = "deepConfirmationThreshold";
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_index_parses_trailing_segments() {
        assert_eq!(
            chain_index("m/84'/0'/0'/0/5"),
            Some((Chain::External, 5))
        );
        assert_eq!(
            chain_index("m/84'/1'/0'/1/19"),
            Some((Chain::Internal, 19))
        );
        assert_eq!(chain_index("m/84'/0'/0'/2/1"), None);
        assert_eq!(chain_index("gibberish"), None);
    }

    #[test]
    fn enum_strings_round_trip() {
        for t in [
            TransactionType::Received,
            TransactionType::Sent,
            TransactionType::Consolidation,
        ] {
            assert_eq!(TransactionType::from_str(&t.to_string()).unwrap(), t);
        }
        for s in [RbfStatus::Active, RbfStatus::Confirmed, RbfStatus::Replaced] {
            assert_eq!(RbfStatus::from_str(&s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn settings_defaults() {
        let settings = SystemSettings::default();
        assert_eq!(settings.dust_threshold, 546);
        assert_eq!(settings.confirmation_threshold, 1);
        assert_eq!(settings.deep_confirmation_threshold, 3);
    }
}
