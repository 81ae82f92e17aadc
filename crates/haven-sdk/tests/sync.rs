// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use std::str::FromStr;
use std::sync::Arc;

use haven_core::bitcoin::absolute::LockTime;
use haven_core::bitcoin::consensus::encode::serialize;
use haven_core::bitcoin::{
    Address, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, WPubkeyHash,
    Witness,
};
use haven_core::hashes::Hash;
use haven_core::model::{
    AddressRecord, Chain, RbfStatus, TransactionRecord, TransactionType, TxInputRecord,
    TxOutputKind, TxOutputRecord, WalletRecord,
};
use haven_core::script::address_to_scripthash;
use haven_core::store::{MemoryStore, WalletStore};
use haven_electrum::testing::{mock_header_time, MockElectrumServer};
use haven_electrum::{BackoffOptions, ConnectionPool, PoolOptions};
use haven_sdk::{Message, SyncOptions, SyncProfile, WalletSyncer};

const WALLET: i64 = 1;

fn addr(n: u8) -> String {
    let script = ScriptBuf::new_v0_p2wpkh(&WPubkeyHash::from_byte_array([n; 20]));
    Address::from_script(&script, Network::Regtest)
        .unwrap()
        .to_string()
}

fn spk(address: &str) -> ScriptBuf {
    Address::from_str(address)
        .unwrap()
        .require_network(Network::Regtest)
        .unwrap()
        .script_pubkey()
}

fn sh(address: &str) -> String {
    address_to_scripthash(address, Network::Regtest).unwrap()
}

fn record(address: &str, chain: u32, index: u32, used: bool) -> AddressRecord {
    AddressRecord {
        wallet_id: WALLET,
        address: address.to_string(),
        derivation_path: format!("m/84'/1'/0'/{chain}/{index}"),
        used,
    }
}

/// Build a transaction; an empty address means an unknown external script.
fn make_tx(inputs: &[(Txid, u32)], outputs: &[(&str, u64)]) -> (Txid, String) {
    let tx = Transaction {
        version: 2,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|(txid, vout)| TxIn {
                previous_output: OutPoint {
                    txid: *txid,
                    vout: *vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .iter()
            .map(|(address, value)| TxOut {
                value: *value,
                script_pubkey: if address.is_empty() {
                    ScriptBuf::new()
                } else {
                    spk(address)
                },
            })
            .collect(),
    };
    (tx.txid(), hex::encode(serialize(&tx)))
}

fn coinbase_input() -> (Txid, u32) {
    (Txid::all_zeros(), 0)
}

async fn setup(server: &MockElectrumServer) -> (Arc<MemoryStore>, WalletSyncer) {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_wallet(WalletRecord {
            id: WALLET,
            network: Network::Regtest,
            balance_sat: 0,
            account_xpub: None,
        })
        .await;
    let pool = ConnectionPool::new(
        Network::Regtest,
        vec![server.server_record(1, 0)],
        PoolOptions::default(),
        BackoffOptions::default(),
        None,
    );
    pool.initialize().await.unwrap();
    let syncer = WalletSyncer::new(pool, store.clone());
    (store, syncer)
}

#[tokio::test]
async fn received_transaction_is_classified_and_stored() {
    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;

    let a = addr(1);
    store.insert_address(record(&a, 0, 0, false)).await;

    let (fund_txid, fund_raw) = make_tx(&[coinbase_input()], &[(&a, 50_000)]);
    server.set_height(105);
    server.set_transaction(&fund_txid.to_string(), &fund_raw);
    server.add_history(&sh(&a), &fund_txid.to_string(), 100);
    server.add_unspent(&sh(&a), &fund_txid.to_string(), 0, 50_000, 100);

    let mut events = syncer.subscribe();
    let stats = syncer.sync(WALLET, &SyncOptions::default()).await.unwrap();
    assert_eq!(stats.new_transactions, 1);
    assert_eq!(stats.new_utxos, 1);
    assert_eq!(stats.balance_sat, 50_000);

    let tx = store
        .transaction(WALLET, fund_txid, TransactionType::Received)
        .await
        .expect("received tx stored");
    assert_eq!(tx.amount_sat, 50_000);
    assert_eq!(tx.fee_sat, None);
    assert_eq!(tx.confirmations, 6);
    assert_eq!(tx.block_height, Some(100));
    assert_eq!(tx.block_time, Some(mock_header_time(100)));
    assert_eq!(tx.rbf_status, RbfStatus::Confirmed);

    let outputs = store.tx_outputs(WALLET, fund_txid).await.unwrap();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].is_ours);
    assert_eq!(outputs[0].kind, TxOutputKind::Recipient);

    // The address is now used.
    let addresses = store.addresses(WALLET).await.unwrap();
    assert!(addresses.iter().find(|r| r.address == a).unwrap().used);

    // An event was emitted for the insertion.
    loop {
        match events.try_recv().unwrap() {
            Message::NewTransaction { txid, amount_sat, .. } => {
                assert_eq!(txid, fund_txid);
                assert_eq!(amount_sat, 50_000);
                break;
            }
            _ => continue,
        }
    }

    // A second run discovers nothing new.
    let again = syncer.sync(WALLET, &SyncOptions::default()).await.unwrap();
    assert_eq!(again.new_transactions, 0);
    assert_eq!(again.new_utxos, 0);
    assert_eq!(store.transactions(WALLET).await.unwrap().len(), 1);

    syncer.pool().shutdown().await;
}

#[tokio::test]
async fn sent_transaction_fee_change_and_spent_utxo() {
    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;

    let a = addr(1);
    let change = addr(2);
    let external = addr(9);
    store.insert_address(record(&a, 0, 0, false)).await;
    store.insert_address(record(&change, 1, 0, false)).await;

    let (fund_txid, fund_raw) = make_tx(&[coinbase_input()], &[(&a, 100_000)]);
    let (spend_txid, spend_raw) = make_tx(
        &[(fund_txid, 0)],
        &[(&external, 40_000), (&change, 55_000)],
    );

    server.set_height(110);
    server.set_transaction(&fund_txid.to_string(), &fund_raw);
    server.set_transaction(&spend_txid.to_string(), &spend_raw);
    server.add_history(&sh(&a), &fund_txid.to_string(), 100);
    server.add_history(&sh(&a), &spend_txid.to_string(), 102);
    server.add_history(&sh(&change), &spend_txid.to_string(), 102);
    server.add_unspent(&sh(&change), &spend_txid.to_string(), 1, 55_000, 102);

    let stats = syncer.sync(WALLET, &SyncOptions::default()).await.unwrap();
    assert_eq!(stats.new_transactions, 2);

    let sent = store
        .transaction(WALLET, spend_txid, TransactionType::Sent)
        .await
        .expect("sent tx stored");
    assert_eq!(sent.fee_sat, Some(5_000));
    assert_eq!(sent.amount_sat, -45_000);

    let outputs = store.tx_outputs(WALLET, spend_txid).await.unwrap();
    let to_external = outputs.iter().find(|o| o.index == 0).unwrap();
    assert_eq!(to_external.kind, TxOutputKind::Recipient);
    assert!(!to_external.is_ours);
    let to_change = outputs.iter().find(|o| o.index == 1).unwrap();
    assert_eq!(to_change.kind, TxOutputKind::Change);
    assert!(to_change.is_ours);

    let inputs = store.tx_inputs(WALLET, spend_txid).await.unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].address.as_deref(), Some(a.as_str()));
    assert!(inputs[0].derivation_path.is_some());
    assert_eq!(inputs[0].amount_sat, Some(100_000));

    assert_eq!(stats.balance_sat, 55_000);

    syncer.pool().shutdown().await;
}

#[tokio::test]
async fn self_spend_is_a_consolidation() {
    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;

    let a = addr(1);
    let b = addr(2);
    store.insert_address(record(&a, 0, 0, false)).await;
    store.insert_address(record(&b, 0, 1, false)).await;

    let (fund_txid, fund_raw) = make_tx(&[coinbase_input()], &[(&a, 80_000)]);
    let (cons_txid, cons_raw) = make_tx(&[(fund_txid, 0)], &[(&b, 79_000)]);

    server.set_height(120);
    server.set_transaction(&fund_txid.to_string(), &fund_raw);
    server.set_transaction(&cons_txid.to_string(), &cons_raw);
    server.add_history(&sh(&a), &fund_txid.to_string(), 100);
    server.add_history(&sh(&a), &cons_txid.to_string(), 115);
    server.add_history(&sh(&b), &cons_txid.to_string(), 115);
    server.add_unspent(&sh(&b), &cons_txid.to_string(), 0, 79_000, 115);

    syncer.sync(WALLET, &SyncOptions::default()).await.unwrap();

    let consolidation = store
        .transaction(WALLET, cons_txid, TransactionType::Consolidation)
        .await
        .expect("consolidation stored");
    assert_eq!(consolidation.fee_sat, Some(1_000));
    assert_eq!(consolidation.amount_sat, -1_000);

    let outputs = store.tx_outputs(WALLET, cons_txid).await.unwrap();
    assert!(outputs
        .iter()
        .all(|o| o.kind == TxOutputKind::Consolidation && o.is_ours));

    syncer.pool().shutdown().await;
}

#[tokio::test]
async fn confirmed_transaction_replaces_pending_one_in_sync() {
    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;

    let a = addr(1);
    store.insert_address(record(&a, 0, 0, true)).await;

    // The contested coin: output 0 of T belongs to us.
    let (t_txid, t_raw) = make_tx(&[coinbase_input()], &[(&a, 60_000)]);
    // The stored-but-unconfirmed spend of (T, 0).
    let (pending_txid, _) = make_tx(&[(t_txid, 0)], &[(&addr(8), 59_000)]);
    store
        .insert_transaction(TransactionRecord {
            wallet_id: WALLET,
            txid: pending_txid,
            tx_type: TransactionType::Sent,
            amount_sat: -59_500,
            fee_sat: Some(500),
            confirmations: 0,
            block_height: None,
            block_time: None,
            rbf_status: RbfStatus::Active,
            replaced_by_txid: None,
            label: None,
        })
        .await;
    store
        .insert_tx_input(TxInputRecord {
            wallet_id: WALLET,
            txid: pending_txid,
            index: 0,
            prev_txid: t_txid,
            prev_vout: 0,
            address: Some(a.clone()),
            derivation_path: Some("m/84'/1'/0'/0/0".to_string()),
            amount_sat: Some(60_000),
        })
        .await;

    // The fee-bumped replacement confirms on chain.
    let (bump_txid, bump_raw) = make_tx(&[(t_txid, 0)], &[(&addr(8), 58_000)]);
    server.set_height(130);
    server.set_transaction(&t_txid.to_string(), &t_raw);
    server.set_transaction(&bump_txid.to_string(), &bump_raw);
    server.add_history(&sh(&a), &t_txid.to_string(), 100);
    server.add_history(&sh(&a), &bump_txid.to_string(), 128);

    let stats = syncer.sync(WALLET, &SyncOptions::default()).await.unwrap();
    assert!(stats.rbf_replacements >= 1);

    let pending = store
        .transaction(WALLET, pending_txid, TransactionType::Sent)
        .await
        .unwrap();
    assert_eq!(pending.rbf_status, RbfStatus::Replaced);
    assert_eq!(pending.replaced_by_txid, Some(bump_txid));

    syncer.pool().shutdown().await;
}

#[tokio::test]
async fn rbf_cleanup_links_previously_confirmed_replacement() {
    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;

    let a = addr(1);
    store.insert_address(record(&a, 0, 0, true)).await;

    let (t_txid, _) = make_tx(&[coinbase_input()], &[(&a, 60_000)]);
    let (pending_txid, _) = make_tx(&[(t_txid, 0)], &[(&addr(8), 59_000)]);
    let (winner_txid, _) = make_tx(&[(t_txid, 0)], &[(&addr(8), 58_000)]);

    for (txid, confirmations, status) in [
        (pending_txid, 0u32, RbfStatus::Active),
        (winner_txid, 3, RbfStatus::Confirmed),
    ] {
        store
            .insert_transaction(TransactionRecord {
                wallet_id: WALLET,
                txid,
                tx_type: TransactionType::Sent,
                amount_sat: -59_000,
                fee_sat: None,
                confirmations,
                block_height: (confirmations > 0).then_some(128),
                block_time: None,
                rbf_status: status,
                replaced_by_txid: None,
                label: None,
            })
            .await;
        store
            .insert_tx_input(TxInputRecord {
                wallet_id: WALLET,
                txid,
                index: 0,
                prev_txid: t_txid,
                prev_vout: 0,
                address: Some(a.clone()),
                derivation_path: None,
                amount_sat: Some(60_000),
            })
            .await;
    }

    server.set_height(130);
    let stats = syncer.sync(WALLET, &SyncOptions::default()).await.unwrap();
    assert_eq!(stats.rbf_replacements, 1);

    let pending = store
        .transaction(WALLET, pending_txid, TransactionType::Sent)
        .await
        .unwrap();
    assert_eq!(pending.rbf_status, RbfStatus::Replaced);
    assert_eq!(pending.replaced_by_txid, Some(winner_txid));

    syncer.pool().shutdown().await;
}

#[tokio::test]
async fn late_address_discovery_retypes_a_consolidation() {
    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;

    let a = addr(1);
    let hidden = addr(2);
    store.insert_address(record(&a, 0, 0, true)).await;

    // A spend recorded as "sent" while its only destination was unknown.
    let (t_txid, _) = make_tx(&[coinbase_input()], &[(&a, 70_000)]);
    let (spend_txid, _) = make_tx(&[(t_txid, 0)], &[(&hidden, 68_000)]);
    store
        .insert_transaction(TransactionRecord {
            wallet_id: WALLET,
            txid: spend_txid,
            tx_type: TransactionType::Sent,
            amount_sat: -70_000,
            fee_sat: Some(2_000),
            confirmations: 4,
            block_height: Some(140),
            block_time: None,
            rbf_status: RbfStatus::Confirmed,
            replaced_by_txid: None,
            label: None,
        })
        .await;
    store
        .insert_tx_output(TxOutputRecord {
            wallet_id: WALLET,
            txid: spend_txid,
            index: 0,
            address: Some(hidden.clone()),
            amount_sat: 68_000,
            script_hex: hex::encode(spk(&hidden).as_bytes()),
            kind: TxOutputKind::Recipient,
            is_ours: false,
        })
        .await;

    // The destination is derivable after all.
    store
        .seed_derivable(WALLET, Chain::External, vec![record(&hidden, 0, 1, false)])
        .await;
    server.set_height(150);
    server.add_history(&sh(&hidden), &spend_txid.to_string(), 144);

    let mut events = syncer.subscribe();
    let stats = syncer.sync(WALLET, &SyncOptions::default()).await.unwrap();
    assert!(stats.new_addresses >= 1);
    assert_eq!(stats.retyped_consolidations, 1);

    assert!(store
        .transaction(WALLET, spend_txid, TransactionType::Sent)
        .await
        .is_none());
    let retyped = store
        .transaction(WALLET, spend_txid, TransactionType::Consolidation)
        .await
        .expect("retyped consolidation");
    assert_eq!(retyped.amount_sat, -2_000);

    let mut saw_retype = false;
    while let Ok(message) = events.try_recv() {
        if let Message::TransactionRetyped { txid, tx_type, .. } = message {
            assert_eq!(txid, spend_txid);
            assert_eq!(tx_type, TransactionType::Consolidation);
            saw_retype = true;
        }
    }
    assert!(saw_retype);

    syncer.pool().shutdown().await;
}

#[tokio::test]
async fn quick_profile_skips_discovery_and_retype() {
    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;

    let a = addr(1);
    let hidden = addr(2);
    store.insert_address(record(&a, 0, 0, true)).await;
    let (t_txid, _) = make_tx(&[coinbase_input()], &[(&a, 70_000)]);
    let (spend_txid, _) = make_tx(&[(t_txid, 0)], &[(&hidden, 68_000)]);
    store
        .insert_transaction(TransactionRecord {
            wallet_id: WALLET,
            txid: spend_txid,
            tx_type: TransactionType::Sent,
            amount_sat: -70_000,
            fee_sat: Some(2_000),
            confirmations: 4,
            block_height: Some(140),
            block_time: None,
            rbf_status: RbfStatus::Confirmed,
            replaced_by_txid: None,
            label: None,
        })
        .await;
    store
        .seed_derivable(WALLET, Chain::External, vec![record(&hidden, 0, 1, false)])
        .await;
    server.set_height(150);

    let options = SyncOptions {
        profile: SyncProfile::Quick,
        ..SyncOptions::default()
    };
    let stats = syncer.sync(WALLET, &options).await.unwrap();
    assert_eq!(stats.new_addresses, 0);
    assert_eq!(stats.retyped_consolidations, 0);
    assert!(store
        .transaction(WALLET, spend_txid, TransactionType::Sent)
        .await
        .is_some());

    syncer.pool().shutdown().await;
}

#[tokio::test]
async fn gap_discovery_pulls_in_history_of_fresh_addresses() {
    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;

    let a = addr(1);
    let fresh = addr(3);
    store.insert_address(record(&a, 0, 0, true)).await;
    store
        .seed_derivable(WALLET, Chain::External, vec![record(&fresh, 0, 1, false)])
        .await;

    let (gift_txid, gift_raw) = make_tx(&[coinbase_input()], &[(&fresh, 25_000)]);
    server.set_height(160);
    server.set_transaction(&gift_txid.to_string(), &gift_raw);
    server.add_history(&sh(&fresh), &gift_txid.to_string(), 155);
    server.add_unspent(&sh(&fresh), &gift_txid.to_string(), 0, 25_000, 155);

    let stats = syncer.sync(WALLET, &SyncOptions::default()).await.unwrap();
    assert!(stats.new_addresses >= 1);
    assert_eq!(stats.new_transactions, 1);
    assert_eq!(stats.balance_sat, 25_000);

    let gift = store
        .transaction(WALLET, gift_txid, TransactionType::Received)
        .await
        .expect("discovered tx stored");
    assert_eq!(gift.amount_sat, 25_000);

    syncer.pool().shutdown().await;
}

#[tokio::test]
async fn watching_a_wallet_surfaces_address_activity() {
    use std::time::Duration;

    use haven_electrum::{ClientEvent, PoolEvent};

    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;
    let a = addr(1);
    store.insert_address(record(&a, 0, 0, false)).await;
    server.set_height(90);

    let mut events = syncer.pool().subscribe_events();
    assert_eq!(syncer.watch_wallet(WALLET).await.unwrap(), 1);

    server.notify_scripthash(&sh(&a), "beef").await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("address activity before the deadline")
            .unwrap();
        if let PoolEvent::Client(ClientEvent::AddressActivity {
            address, status, ..
        }) = event
        {
            assert_eq!(address.as_deref(), Some(a.as_str()));
            assert_eq!(status.as_deref(), Some("beef"));
            break;
        }
    }
    syncer.pool().shutdown().await;
}

#[tokio::test]
async fn wallet_and_pool_networks_must_match() {
    let server = MockElectrumServer::start().await;
    let (store, syncer) = setup(&server).await;
    store
        .insert_wallet(WalletRecord {
            id: 2,
            network: Network::Bitcoin,
            balance_sat: 0,
            account_xpub: None,
        })
        .await;

    match syncer.sync(2, &SyncOptions::default()).await {
        Err(haven_sdk::Error::NetworkMismatch { .. }) => {}
        other => panic!("expected a network mismatch, got {other:?}"),
    }
    syncer.pool().shutdown().await;
}
