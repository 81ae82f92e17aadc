// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use core::str::FromStr;

use haven_core::bitcoin::bip32::{ChildNumber, ExtendedPubKey};
use haven_core::bitcoin::secp256k1::Secp256k1;
use haven_core::bitcoin::{Address, Network, PublicKey};
use haven_core::model::{chain_index, AddressRecord, Chain, WalletId};

use super::Store;
use crate::error::Error;

impl Store {
    pub async fn addresses(&self, wallet_id: WalletId) -> Result<Vec<AddressRecord>, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT address, derivation_path, used FROM addresses WHERE wallet_id = ?;",
            )?;
            let mut rows = stmt.query([wallet_id])?;
            let mut addresses = Vec::new();
            while let Some(row) = rows.next()? {
                addresses.push(AddressRecord {
                    wallet_id,
                    address: row.get(0)?,
                    derivation_path: row.get(1)?,
                    used: row.get(2)?,
                });
            }
            Ok(addresses)
        })
        .await?
    }

    pub async fn create_addresses(&self, addresses: Vec<AddressRecord>) -> Result<usize, Error> {
        let conn = self.acquire().await?;
        conn.interact(move |conn| {
            let mut created = 0;
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO addresses (wallet_id, address, derivation_path, used) \
                 VALUES (?, ?, ?, ?);",
            )?;
            for address in addresses {
                created += stmt.execute((
                    address.wallet_id,
                    address.address,
                    address.derivation_path,
                    address.used,
                ))?;
            }
            Ok(created)
        })
        .await?
    }

    pub async fn mark_address_used(
        &self,
        wallet_id: WalletId,
        address: &str,
    ) -> Result<(), Error> {
        let conn = self.acquire().await?;
        let address = address.to_string();
        conn.interact(move |conn| {
            conn.execute(
                "UPDATE addresses SET used = 1 WHERE wallet_id = ? AND address = ?;",
                (wallet_id, address),
            )?;
            Ok(())
        })
        .await?
    }

    /// Derive fresh addresses from the wallet's account xpub, starting after
    /// the highest stored index on the chain.
    pub async fn derive_addresses(
        &self,
        wallet_id: WalletId,
        chain: Chain,
        count: u32,
    ) -> Result<Vec<AddressRecord>, Error> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let wallet = self.wallet(wallet_id).await?;
        let xpub = wallet
            .account_xpub
            .as_deref()
            .ok_or(Error::NoAccountXpub(wallet_id))?;
        let xpub = ExtendedPubKey::from_str(xpub)?;

        let existing = self.addresses(wallet_id).await?;
        let next_index = existing
            .iter()
            .filter_map(|record| chain_index(&record.derivation_path))
            .filter(|(c, _)| *c == chain)
            .map(|(_, index)| index + 1)
            .max()
            .unwrap_or(0);

        let secp = Secp256k1::verification_only();
        let chain_key = xpub.ckd_pub(&secp, ChildNumber::from_normal_idx(chain.index())?)?;
        let coin_type = match wallet.network {
            Network::Bitcoin => 0,
            _ => 1,
        };

        let mut derived = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let index = next_index + offset;
            let child = chain_key.ckd_pub(&secp, ChildNumber::from_normal_idx(index)?)?;
            let address = Address::p2wpkh(&PublicKey::new(child.public_key), wallet.network)?;
            derived.push(AddressRecord {
                wallet_id,
                address: address.to_string(),
                derivation_path: format!(
                    "m/84'/{coin_type}'/0'/{}/{index}",
                    chain.index()
                ),
                used: false,
            });
        }

        self.create_addresses(derived.clone()).await?;
        Ok(derived)
    }
}
