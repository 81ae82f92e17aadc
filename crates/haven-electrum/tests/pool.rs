// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use std::sync::Arc;
use std::time::Duration;

use haven_core::bitcoin::Network;
use haven_electrum::testing::MockElectrumServer;
use haven_electrum::{
    BackoffOptions, ClientEvent, ConnectionPool, FailureKind, PoolError, PoolEvent, PoolOptions,
};

fn pool_with(
    servers: Vec<haven_core::model::ElectrumServerRecord>,
    options: PoolOptions,
) -> Arc<ConnectionPool> {
    ConnectionPool::new(
        Network::Regtest,
        servers,
        options,
        BackoffOptions::default(),
        None,
    )
}

#[tokio::test]
async fn single_server_single_request() {
    let server = MockElectrumServer::start().await;
    server.set_height(42);

    let pool = pool_with(vec![server.server_record(1, 0)], PoolOptions::default());
    pool.initialize().await.unwrap();

    let handle = pool.acquire().await.unwrap();
    let height = handle
        .with_client(|client| async move { client.get_block_height().await })
        .await
        .unwrap();
    assert_eq!(height, 42);
    handle.release();

    let stats = pool.stats();
    assert_eq!(stats.total_acquisitions, 1);
    assert!(stats.avg_acquire_time_ms > 0.0);

    pool.shutdown().await;
}

#[tokio::test]
async fn effective_bounds_follow_the_server_count() {
    let pool = pool_with(Vec::new(), PoolOptions::default());
    assert_eq!(pool.effective_min(), 1);
    assert_eq!(pool.effective_max(), 5);

    let a = MockElectrumServer::start().await;
    let b = MockElectrumServer::start().await;
    let many = vec![
        a.server_record(1, 0),
        b.server_record(2, 1),
        b.server_record(3, 2),
        b.server_record(4, 3),
        b.server_record(5, 4),
        b.server_record(6, 5),
        a.server_record(7, 6),
    ];
    let pool = pool_with(many, PoolOptions::default());
    assert_eq!(pool.effective_min(), 7);
    assert_eq!(pool.effective_max(), 7);
}

#[tokio::test]
async fn initialization_is_idempotent_and_concurrent() {
    let server = MockElectrumServer::start().await;
    let pool = pool_with(vec![server.server_record(1, 0)], PoolOptions::default());

    let (a, b, c) = tokio::join!(pool.initialize(), pool.initialize(), pool.initialize());
    a.unwrap();
    b.unwrap();
    c.unwrap();

    // effective_min is 1; three racing initializers must not triple it.
    assert_eq!(pool.stats().connections, 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn cooled_down_server_receives_no_new_connections() {
    let a = MockElectrumServer::start().await;
    let b = MockElectrumServer::start().await;
    let c = MockElectrumServer::start().await;
    let servers = vec![
        a.server_record(1, 0),
        b.server_record(2, 1),
        c.server_record(3, 2),
    ];

    let options = PoolOptions {
        max_connections: 50,
        ..PoolOptions::default()
    };
    let pool = pool_with(servers, options);
    pool.initialize().await.unwrap();

    // Two timeouts put server 1 well past the failure threshold.
    pool.record_server_failure(1, FailureKind::Timeout);
    pool.record_server_failure(1, FailureKind::Timeout);

    let mut handles = Vec::new();
    for _ in 0..20 {
        handles.push(pool.acquire().await.unwrap());
    }
    // Connections created during initialize may sit on server 1; everything
    // acquired after the cooldown must avoid it.
    let fresh: Vec<i64> = handles
        .iter()
        .skip(3)
        .map(|handle| handle.server_id())
        .collect();
    assert!(fresh.iter().all(|id| *id != 1), "server ids: {fresh:?}");

    let stats = pool.stats();
    let s1 = stats
        .servers
        .iter()
        .find(|snapshot| snapshot.server_id == 1)
        .unwrap();
    assert!(s1.in_cooldown);
    assert!(s1.weight < 1.0);

    drop(handles);
    pool.shutdown().await;
}

#[tokio::test]
async fn waiters_are_woken_in_fifo_order() {
    let server = MockElectrumServer::start().await;
    let options = PoolOptions {
        min_connections: 1,
        max_connections: 1,
        acquisition_timeout_ms: 3_000,
        ..PoolOptions::default()
    };
    let pool = pool_with(vec![server.server_record(1, 0)], options);
    pool.initialize().await.unwrap();

    let held = pool.acquire().await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    held.release();
    let handle = waiter.await.unwrap().unwrap();
    handle.release();
    pool.shutdown().await;
}

#[tokio::test]
async fn full_queue_fails_fast_and_waiting_times_out() {
    let server = MockElectrumServer::start().await;
    let options = PoolOptions {
        min_connections: 1,
        max_connections: 1,
        max_waiting_requests: 1,
        acquisition_timeout_ms: 200,
        ..PoolOptions::default()
    };
    let pool = pool_with(vec![server.server_record(1, 0)], options);
    pool.initialize().await.unwrap();

    let held = pool.acquire().await.unwrap();

    let waiting = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The queue already holds one waiter.
    match pool.acquire().await {
        Err(PoolError::QueueFull) => {}
        other => panic!("expected QueueFull, got {other:?}"),
    }

    match waiting.await.unwrap() {
        Err(PoolError::AcquireTimeout) => {}
        other => panic!("expected AcquireTimeout, got {other:?}"),
    }

    held.release();
    pool.shutdown().await;
}

#[tokio::test]
async fn dedicated_connection_survives_a_forced_disconnect() {
    let server = MockElectrumServer::start().await;
    server.set_height(10);
    let pool = pool_with(vec![server.server_record(1, 0)], PoolOptions::default());
    pool.initialize().await.unwrap();

    let mut events = pool.subscribe_events();
    let subscription = pool.subscription_connection().await.unwrap();
    let scripthash = "cd".repeat(32);
    subscription
        .subscribe_scripthash(&scripthash, Some("bcrt1qdedicated"))
        .await
        .unwrap();

    server.kill_connections();
    tokio::time::sleep(Duration::from_millis(100)).await;

    pool.health_check().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("subscription_reconnected before the deadline")
            .unwrap();
        if matches!(event, PoolEvent::SubscriptionReconnected) {
            break;
        }
    }

    // The scripthash map survived: a notification still carries the address.
    server.notify_scripthash(&scripthash, "f00d").await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("address_activity before the deadline")
            .unwrap();
        if let PoolEvent::Client(ClientEvent::AddressActivity { address, .. }) = event {
            assert_eq!(address.as_deref(), Some("bcrt1qdedicated"));
            break;
        }
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn reload_servers_disconnects_removed_ones() {
    let a = MockElectrumServer::start().await;
    let b = MockElectrumServer::start().await;
    let pool = pool_with(
        vec![a.server_record(1, 0), b.server_record(2, 1)],
        PoolOptions::default(),
    );
    pool.initialize().await.unwrap();

    pool.reload_servers(vec![a.server_record(1, 0)]).await;

    // Acquire a few times; everything must land on the surviving server.
    for _ in 0..5 {
        let handle = pool.acquire().await.unwrap();
        assert_eq!(handle.server_id(), 1);
        handle.release();
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_final_and_idempotent() {
    let server = MockElectrumServer::start().await;
    let pool = pool_with(vec![server.server_record(1, 0)], PoolOptions::default());
    pool.initialize().await.unwrap();

    pool.shutdown().await;
    pool.shutdown().await;

    match pool.acquire().await {
        Err(PoolError::Shutdown) => {}
        other => panic!("expected Shutdown, got {other:?}"),
    }
    assert_eq!(pool.stats().connections, 0);
}

#[tokio::test]
async fn all_servers_in_cooldown_still_yields_a_connection() {
    let a = MockElectrumServer::start().await;
    let b = MockElectrumServer::start().await;
    let pool = pool_with(
        vec![a.server_record(1, 0), b.server_record(2, 1)],
        PoolOptions {
            max_connections: 50,
            ..PoolOptions::default()
        },
    );
    pool.initialize().await.unwrap();

    for id in [1, 2] {
        pool.record_server_failure(id, FailureKind::Timeout);
        pool.record_server_failure(id, FailureKind::Timeout);
    }

    // Last resort: the server closest to recovery still serves.
    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(pool.acquire().await.unwrap());
    }
    drop(handles);
    pool.shutdown().await;
}
