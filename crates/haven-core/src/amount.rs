// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Satoshi conversions for values coming off the wire.

pub const SAT_PER_BTC: f64 = 100_000_000.0;

/// Convert a BTC float, as Electrum servers report values, to integer satoshis.
pub fn btc_to_sat(btc: f64) -> i64 {
    (btc * SAT_PER_BTC).round() as i64
}

/// Convert a previous-output value to satoshis.
///
/// Most servers report BTC floats, but some already return satoshis for
/// `prev_output.value`; anything above 10^6 is treated as satoshis.
pub fn prev_output_value_sat(value: f64) -> i64 {
    if value > 1_000_000.0 {
        value.round() as i64
    } else {
        btc_to_sat(value)
    }
}

/// Convert a `blockchain.estimatefee` result (BTC/kB) to sat/vB, floored at 1.
pub fn sat_per_vb_from_btc_per_kb(btc_per_kb: f64) -> u64 {
    let sat_per_vb = (btc_per_kb * SAT_PER_BTC / 1_000.0).round();
    if sat_per_vb < 1.0 {
        1
    } else {
        sat_per_vb as u64
    }
}
