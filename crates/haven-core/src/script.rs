// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Address and script codec.

use core::str::FromStr;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Address, Network, Script, ScriptBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Address(#[from] bitcoin::address::Error),
}

/// Parse an address string and return its scriptPubKey, checking the network.
pub fn script_of_address(address: &str, network: Network) -> Result<ScriptBuf, Error> {
    let address = Address::from_str(address)?.require_network(network)?;
    Ok(address.script_pubkey())
}

/// Electrum scripthash of a scriptPubKey: byte-reversed SHA-256, lowercase hex.
pub fn electrum_scripthash(script: &Script) -> String {
    let hash = sha256::Hash::hash(script.as_bytes());
    let mut bytes = hash.to_byte_array();
    bytes.reverse();
    hex::encode(bytes)
}

pub fn address_to_scripthash(address: &str, network: Network) -> Result<String, Error> {
    let script = script_of_address(address, network)?;
    Ok(electrum_scripthash(&script))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scripthash_of_known_p2pkh() {
        // The Electrum protocol documentation example.
        let scripthash =
            address_to_scripthash("1PMycacnJaSqwwJqjawXBErnLsZ7RkXUAs", Network::Bitcoin).unwrap();
        assert_eq!(
            scripthash,
            "8b01df4e368ea28f8dc0423bcf7a4923e3a12d307c875e47a0cfbf90b5c39161"
        );
    }

    #[test]
    fn scripthash_is_lowercase_hex() {
        let scripthash = address_to_scripthash(
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
            Network::Bitcoin,
        )
        .unwrap();
        assert_eq!(scripthash.len(), 64);
        assert!(scripthash
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn network_mismatch_is_rejected() {
        assert!(script_of_address("1PMycacnJaSqwwJqjawXBErnLsZ7RkXUAs", Network::Testnet).is_err());
    }
}
