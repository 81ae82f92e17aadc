// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use std::time::Duration;

use haven_core::bitcoin::absolute::LockTime;
use haven_core::bitcoin::consensus::encode::serialize;
use haven_core::bitcoin::{
    Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use haven_core::hashes::Hash;
use haven_electrum::testing::{mock_header_time, MockElectrumServer};
use haven_electrum::{ClientConfig, ClientEvent, ElectrumClient, Endpoint, Error, Timeouts};
use serde_json::json;

fn test_client(server: &MockElectrumServer) -> ElectrumClient {
    let addr = server.address();
    ElectrumClient::new(ClientConfig {
        endpoint: Endpoint::new(addr.ip().to_string(), addr.port(), false),
        proxy: None,
        network: Network::Regtest,
        timeouts: Timeouts {
            connect: Duration::from_secs(2),
            request: Duration::from_millis(800),
            batch: Duration::from_millis(800),
        },
    })
}

fn dummy_tx(lock_time: u32) -> (Txid, String) {
    let tx = Transaction {
        version: 2,
        lock_time: LockTime::from_consensus(lock_time),
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::all_zeros(),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: 1_000,
            script_pubkey: ScriptBuf::new(),
        }],
    };
    (tx.txid(), hex::encode(serialize(&tx)))
}

#[tokio::test]
async fn single_request_round_trip() {
    let server = MockElectrumServer::start().await;
    server.set_height(812_345);

    let client = test_client(&server);
    assert_eq!(client.get_block_height().await.unwrap(), 812_345);

    // server.version was negotiated exactly once for the connection.
    client.ping().await.unwrap();
    client.ping().await.unwrap();
    assert_eq!(server.request_count("server.version"), 1);
    assert_eq!(
        client.server_version(),
        Some(("MockElectrum 1.0".to_string(), "1.4".to_string()))
    );
}

#[tokio::test]
async fn batch_results_come_back_in_input_order() {
    let server = MockElectrumServer::start().await;
    server.add_history("aa", "1111111111111111111111111111111111111111111111111111111111111111", 10);
    server.add_history("bb", "2222222222222222222222222222222222222222222222222222222222222222", 20);

    let client = test_client(&server);
    let results = client
        .batch_request(&[
            ("blockchain.scripthash.get_history", json!(["aa"])),
            ("blockchain.scripthash.get_history", json!(["bb"])),
            ("blockchain.scripthash.get_history", json!(["cc"])),
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    let first = results[0].as_ref().unwrap();
    assert_eq!(first[0]["height"], json!(10));
    let second = results[1].as_ref().unwrap();
    assert_eq!(second[0]["height"], json!(20));
    assert_eq!(results[2].as_ref().unwrap(), &json!([]));
}

#[tokio::test]
async fn batch_timeout_hits_one_id_and_spares_the_socket() {
    let server = MockElectrumServer::start().await;
    let (txid, raw) = dummy_tx(1);
    server.set_transaction(&txid.to_string(), &raw);
    // The first transaction.get response never arrives.
    server.drop_responses("blockchain.transaction.get", 1);

    let client = test_client(&server);
    client.connect().await.unwrap();

    let results = client
        .batch_request(&[
            ("blockchain.transaction.get", json!([txid.to_string(), false])),
            ("blockchain.transaction.get", json!([txid.to_string(), false])),
        ])
        .await
        .unwrap();

    assert!(matches!(results[0], Err(Error::Timeout(_))));
    assert_eq!(results[1].as_ref().unwrap(), &json!(raw));

    // The connection survived the per-id timeout.
    client.ping().await.unwrap();
    assert_eq!(server.request_count("server.version"), 1);
}

#[tokio::test]
async fn pending_requests_fail_on_disconnect_and_the_client_recovers() {
    let server = MockElectrumServer::start().await;
    server.set_height(100);
    let client = test_client(&server);
    client.connect().await.unwrap();

    server.drop_responses("server.ping", 1);
    let pending = tokio::spawn({
        let client = std::sync::Arc::new(client);
        let inner = client.clone();
        async move { (inner.ping().await, client) }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    server.kill_connections();

    let (result, client) = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::ConnectionLost) | Err(Error::Timeout(_))
    ));

    // Next call reconnects on its own.
    assert_eq!(client.get_block_height().await.unwrap(), 100);
    assert_eq!(server.request_count("server.version"), 2);
}

#[tokio::test]
async fn transactions_batch_retries_timed_out_ids() {
    let server = MockElectrumServer::start().await;
    let (txid, raw) = dummy_tx(7);
    server.set_transaction(&txid.to_string(), &raw);
    server.drop_responses("blockchain.transaction.get", 1);

    let client = test_client(&server);
    let decoded = client.get_transactions_batch(&[txid]).await.unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].txid, txid);
    assert_eq!(server.request_count("blockchain.transaction.get"), 2);
}

#[tokio::test]
async fn scripthash_notifications_carry_the_subscribed_address() {
    let server = MockElectrumServer::start().await;
    let client = test_client(&server);
    let mut events = client.subscribe_events();

    let status = client
        .subscribe_scripthash("ab".repeat(32).as_str(), Some("bcrt1qexample"))
        .await
        .unwrap();
    assert_eq!(status, None);

    server
        .notify_scripthash(&"ab".repeat(32), "deadbeef")
        .await;

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        ClientEvent::AddressActivity {
            scripthash,
            address,
            status,
        } => {
            assert_eq!(scripthash, "ab".repeat(32));
            assert_eq!(address.as_deref(), Some("bcrt1qexample"));
            assert_eq!(status.as_deref(), Some("deadbeef"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn header_subscription_is_sticky_across_reconnect() {
    let server = MockElectrumServer::start().await;
    server.set_height(50);
    let client = test_client(&server);
    let mut events = client.subscribe_events();

    assert_eq!(client.get_block_height().await.unwrap(), 50);

    server.kill_connections();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Any request reconnects and re-arms the header subscription.
    client.ping().await.unwrap();

    server.notify_new_block(51).await;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let ClientEvent::NewBlock { height, .. } = event {
            if height == 51 {
                break;
            }
        }
    }
}

#[tokio::test]
async fn block_timestamp_parses_the_header_time_field() {
    let server = MockElectrumServer::start().await;
    let client = test_client(&server);
    assert_eq!(
        client.block_timestamp(120).await.unwrap(),
        mock_header_time(120)
    );
}

#[tokio::test]
async fn fee_estimates_convert_to_sat_per_vb() {
    let server = MockElectrumServer::start().await;
    let client = test_client(&server);

    server.set_fee_estimate(0.00002);
    assert_eq!(client.estimate_fee(6).await.unwrap(), 2);

    // Servers without an estimate answer -1.
    server.set_fee_estimate(-1.0);
    assert_eq!(client.estimate_fee(6).await.unwrap(), 1);
}

#[tokio::test]
async fn server_errors_surface_their_message() {
    let server = MockElectrumServer::start().await;
    let client = test_client(&server);
    let missing = Txid::all_zeros();
    match client.get_transaction(missing).await {
        Err(Error::Server(message)) => assert!(message.contains("No such mempool")),
        other => panic!("expected a server error, got {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_returns_the_canonical_txid() {
    let server = MockElectrumServer::start().await;
    let client = test_client(&server);
    let (txid, raw) = dummy_tx(3);
    assert_eq!(client.broadcast_transaction(&raw).await.unwrap(), txid);
    // The mock indexes what it accepted.
    assert_eq!(client.get_transaction(txid).await.unwrap().txid, txid);
}
