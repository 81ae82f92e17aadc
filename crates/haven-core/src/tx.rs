// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Raw transaction decoding.
//!
//! Electrum servers are only required to serve `blockchain.transaction.get`
//! in non-verbose mode, so transactions always arrive as consensus-encoded
//! hex and are decoded locally.

use bitcoin::consensus::encode::{self, deserialize};
use bitcoin::{Address, Network, Transaction, Txid};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Consensus(#[from] encode::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInput {
    /// Previous txid in canonical (display) byte order.
    pub prev_txid: Txid,
    pub vout: u32,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedOutput {
    pub index: u32,
    pub value_sat: u64,
    pub script_hex: String,
    /// `None` for OP_RETURN and any other script without an address form.
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub txid: Txid,
    pub version: i32,
    pub size: usize,
    pub locktime: u32,
    pub inputs: Vec<DecodedInput>,
    pub outputs: Vec<DecodedOutput>,
}

impl DecodedTransaction {
    pub fn output(&self, index: u32) -> Option<&DecodedOutput> {
        self.outputs.get(index as usize)
    }
}

/// Decode a consensus-encoded transaction hex per network.
pub fn decode_raw_transaction(raw_hex: &str, network: Network) -> Result<DecodedTransaction, Error> {
    let bytes: Vec<u8> = hex::decode(raw_hex.trim())?;
    let tx: Transaction = deserialize(&bytes)?;

    let inputs = tx
        .input
        .iter()
        .map(|txin| DecodedInput {
            prev_txid: txin.previous_output.txid,
            vout: txin.previous_output.vout,
            sequence: txin.sequence.0,
        })
        .collect();

    let outputs = tx
        .output
        .iter()
        .enumerate()
        .map(|(index, txout)| DecodedOutput {
            index: index as u32,
            value_sat: txout.value,
            script_hex: hex::encode(txout.script_pubkey.as_bytes()),
            address: Address::from_script(&txout.script_pubkey, network)
                .ok()
                .map(|address| address.to_string()),
        })
        .collect();

    Ok(DecodedTransaction {
        txid: tx.txid(),
        version: tx.version,
        size: bytes.len(),
        locktime: tx.lock_time.to_consensus_u32(),
        inputs,
        outputs,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    // Mainnet coinbase spend with one P2PKH output and one OP_RETURN-free
    // change output: txid f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16
    const FIRST_P2PKH_SPEND: &str = "0100000001c997a5e56e104102fa209c6a852dd90660a20b2d9c352423edce25857fcd3704000000004847304402204e45e16932b8af514961a1d3a1a25fdf3f4f7732e9d624c6c61548ab5fb8cd410220181522ec8eca07de4860a4acdd12909d831cc56cbbac4622082221a8768d1d0901ffffffff0200ca9a3b00000000434104ae1a62fe09c5f51b13905f07f06b99a2f7159b2225f374cd378d71302fa28414e7aab37397f554a7df5f142c21c1b7303b8a0626f1baded5c72a704f7e6cd84cac00286bee0000000043410411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3ac00000000";

    #[test]
    fn decodes_inputs_and_outputs() {
        let decoded = decode_raw_transaction(FIRST_P2PKH_SPEND, Network::Bitcoin).unwrap();
        assert_eq!(
            decoded.txid.to_string(),
            "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16"
        );
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.locktime, 0);
        assert_eq!(decoded.inputs.len(), 1);
        assert_eq!(
            decoded.inputs[0].prev_txid.to_string(),
            "0437cd7f8525ceed2324359c2d0ba26006d92d856a9c20fa0241106ee5a597c9"
        );
        assert_eq!(decoded.inputs[0].vout, 0);
        assert_eq!(decoded.outputs.len(), 2);
        assert_eq!(decoded.outputs[0].value_sat, 1_000_000_000);
        assert_eq!(decoded.outputs[1].value_sat, 4_000_000_000);
        assert_eq!(decoded.size, FIRST_P2PKH_SPEND.len() / 2);
    }

    #[test]
    fn bare_pubkey_outputs_have_no_address() {
        // Both outputs of the first P2PK spend are bare pubkey scripts.
        let decoded = decode_raw_transaction(FIRST_P2PKH_SPEND, Network::Bitcoin).unwrap();
        assert!(decoded.outputs.iter().all(|out| out.address.is_none()));
    }

    #[test]
    fn garbage_hex_is_rejected() {
        assert!(decode_raw_transaction("zz", Network::Bitcoin).is_err());
        assert!(decode_raw_transaction("00", Network::Bitcoin).is_err());
    }
}
