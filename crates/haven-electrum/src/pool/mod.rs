// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Multi-server connection pool.
//!
//! The pool owns every Electrum client. Callers acquire a handle, use the
//! client for one logical operation, and release it (drop releases too).
//! One dedicated connection per pool carries subscriptions and is never
//! handed out by ordinary acquisition.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use haven_core::bitcoin::Network;
use haven_core::model::ElectrumServerRecord;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

mod connection;
mod strategy;

pub use self::connection::ConnectionState;
use self::connection::PooledConnection;
use self::strategy::Candidate;
use crate::client::{ClientConfig, ElectrumClient, Timeouts};
use crate::error::{Error as ClientError, TimeoutKind};
use crate::health::{FailureKind, ServerStats, ServerStatsSnapshot};
use crate::options::{BackoffOptions, PoolOptions};
use crate::socks::Socks5Config;
use crate::stream::Endpoint;
use crate::types::ClientEvent;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("pool is disabled")]
    Disabled,
    #[error("pool has been shut down")]
    Shutdown,
    #[error("no electrum servers available")]
    NoServers,
    #[error("acquisition queue is full")]
    QueueFull,
    #[error("acquisition timed out")]
    AcquireTimeout,
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// The dedicated subscription connection came back after a reconnect;
    /// observers should re-register anything the server may have dropped.
    SubscriptionReconnected,
    Client(ClientEvent),
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_acquisitions: u64,
    pub avg_acquire_time_ms: f64,
    pub connections: usize,
    pub idle_connections: usize,
    pub active_connections: usize,
    pub waiting_requests: usize,
    pub servers: Vec<ServerStatsSnapshot>,
}

struct PoolState {
    /// Enabled servers, priority-sorted.
    servers: Vec<ElectrumServerRecord>,
    stats: HashMap<i64, ServerStats>,
    connections: HashMap<u64, PooledConnection>,
    dedicated_id: Option<u64>,
    rr_cursor: f64,
}

type Waiter = oneshot::Sender<(u64, Arc<ElectrumClient>)>;

pub struct ConnectionPool {
    me: Weak<ConnectionPool>,
    network: Network,
    options: PoolOptions,
    backoff: BackoffOptions,
    proxy: Option<Socks5Config>,
    state: RwLock<PoolState>,
    waiters: Mutex<VecDeque<Waiter>>,
    init_lock: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    shut_down: AtomicBool,
    next_connection_id: AtomicU64,
    total_acquisitions: AtomicU64,
    total_acquire_nanos: AtomicU64,
    events: broadcast::Sender<PoolEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(
        network: Network,
        servers: Vec<ElectrumServerRecord>,
        options: PoolOptions,
        backoff: BackoffOptions,
        proxy: Option<Socks5Config>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            network,
            options,
            backoff,
            proxy,
            state: RwLock::new(PoolState {
                servers: prepare_servers(servers, network),
                stats: HashMap::new(),
                connections: HashMap::new(),
                dedicated_id: None,
                rr_cursor: 0.0,
            }),
            waiters: Mutex::new(VecDeque::new()),
            init_lock: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            total_acquisitions: AtomicU64::new(0),
            total_acquire_nanos: AtomicU64::new(0),
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn me(&self) -> Arc<Self> {
        self.me.upgrade().expect("pool outlives its own methods")
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// At least one connection per enabled server, whatever the configured
    /// bounds say.
    pub fn effective_min(&self) -> usize {
        self.options.min_connections.max(self.server_count())
    }

    pub fn effective_max(&self) -> usize {
        self.options.max_connections.max(self.server_count())
    }

    fn server_count(&self) -> usize {
        self.state.read().servers.len()
    }

    /// Bring the pool up. Safe to call concurrently and repeatedly; only the
    /// first caller does the work, everyone else awaits it.
    pub async fn initialize(&self) -> Result<(), Error> {
        if !self.options.enabled {
            return Err(Error::Disabled);
        }
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let wanted = self.effective_min();
        tracing::info!(
            "Initializing {} electrum pool with {wanted} connections",
            self.network
        );
        let created =
            futures::future::join_all((0..wanted).map(|_| self.create_connection(false))).await;
        for result in created {
            if let Err(e) = result {
                // A server being down must not abort pool startup.
                tracing::warn!("Pool connection creation failed during init: {e}");
            }
        }

        self.spawn_timers();
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Acquire a connection handle: an idle one if any, a fresh one while
    /// under `effective_max`, otherwise wait in the queue.
    pub async fn acquire(&self) -> Result<PoolHandle, Error> {
        if !self.options.enabled {
            return Err(Error::Disabled);
        }
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        if !self.initialized.load(Ordering::SeqCst) {
            self.initialize().await?;
        }

        let started = Instant::now();

        if let Some((id, client)) = self.checkout_idle() {
            return Ok(self.finish_acquire(started, id, client));
        }

        let under_max = {
            let state = self.state.read();
            live_connections(&state) < self.effective_max()
        };
        if under_max {
            let (id, client) = self.create_connection(true).await?;
            return Ok(self.finish_acquire(started, id, client));
        }

        let rx = {
            let mut waiters = self.waiters.lock();
            if waiters.len() >= self.options.max_waiting_requests {
                return Err(Error::QueueFull);
            }
            let (tx, rx) = oneshot::channel();
            waiters.push_back(tx);
            rx
        };

        match timeout(self.options.acquisition_timeout(), rx).await {
            Ok(Ok((id, client))) => Ok(self.finish_acquire(started, id, client)),
            Ok(Err(_)) => Err(Error::Shutdown),
            Err(_) => Err(Error::AcquireTimeout),
        }
    }

    /// Acquire, run one operation against the client, release.
    pub async fn with_client<T, F, Fut>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(Arc<ElectrumClient>) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let handle = self.acquire().await?;
        let result = f(handle.client_arc()).await;
        handle.release();
        Ok(result)
    }

    fn finish_acquire(&self, started: Instant, id: u64, client: Arc<ElectrumClient>) -> PoolHandle {
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        let nanos = started.elapsed().as_nanos().max(1) as u64;
        self.total_acquire_nanos.fetch_add(nanos, Ordering::Relaxed);
        PoolHandle {
            pool: self.me(),
            connection_id: id,
            client,
            released: false,
        }
    }

    fn checkout_idle(&self) -> Option<(u64, Arc<ElectrumClient>)> {
        let mut state = self.state.write();
        let id = state
            .connections
            .values()
            .find(|conn| conn.state == ConnectionState::Idle && !conn.dedicated)
            .map(|conn| conn.id)?;
        let conn = state.connections.get_mut(&id)?;
        conn.mark_acquired();
        Some((id, conn.client.clone()))
    }

    /// Pick a server and open a connection to it. `acquired` decides whether
    /// the new connection starts out owned by the caller or idle.
    async fn create_connection(&self, acquired: bool) -> Result<(u64, Arc<ElectrumClient>), Error> {
        let server = self.select_server().ok_or(Error::NoServers)?;
        let client = self.connect_client(&server).await?;

        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let mut conn = PooledConnection::new(id, client.clone(), server.id, false);
        if acquired {
            conn.mark_acquired();
        }
        self.state.write().connections.insert(id, conn);
        tracing::debug!(
            "Opened pool connection {id} to {}:{} ({})",
            server.host,
            server.port,
            server.label
        );
        Ok((id, client))
    }

    async fn connect_client(
        &self,
        server: &ElectrumServerRecord,
    ) -> Result<Arc<ElectrumClient>, Error> {
        let client = Arc::new(ElectrumClient::new(self.client_config(server)));
        match client.connect().await {
            Ok(()) => {
                self.record_server_success(server.id);
                Ok(client)
            }
            Err(e) => {
                self.record_server_failure(server.id, FailureKind::of(&e));
                Err(e.into())
            }
        }
    }

    fn client_config(&self, server: &ElectrumServerRecord) -> ClientConfig {
        ClientConfig {
            endpoint: Endpoint::new(server.host.clone(), server.port, server.tls),
            proxy: self.proxy.clone(),
            network: self.network,
            timeouts: Timeouts {
                connect: self.options.connection_timeout(),
                ..Timeouts::default()
            },
        }
    }

    fn select_server(&self) -> Option<ElectrumServerRecord> {
        let now = Instant::now();
        let mut state = self.state.write();
        let candidates: Vec<Candidate> = state
            .servers
            .iter()
            .map(|server| {
                let stats = state.stats.get(&server.id);
                let active = state
                    .connections
                    .values()
                    .filter(|conn| conn.server_id == server.id && conn.is_live())
                    .count();
                Candidate {
                    server_id: server.id,
                    weight: stats.map(ServerStats::weight).unwrap_or(1.0),
                    active_connections: active,
                    in_cooldown: stats.map(|s| s.in_cooldown(now)).unwrap_or(false),
                    remaining_cooldown: stats
                        .map(|s| s.remaining_cooldown(now))
                        .unwrap_or_default(),
                }
            })
            .collect();
        let picked =
            strategy::select(self.options.load_balancing, &candidates, &mut state.rr_cursor)?;
        state.servers.iter().find(|s| s.id == picked).cloned()
    }

    /// Hand the connection back. The oldest waiter gets it directly; with no
    /// waiters it goes idle.
    fn release(&self, connection_id: u64) {
        loop {
            let waiter = self.waiters.lock().pop_front();
            let Some(waiter) = waiter else { break };

            let client = {
                let mut state = self.state.write();
                match state.connections.get_mut(&connection_id) {
                    Some(conn) if conn.is_live() && !conn.dedicated => {
                        conn.mark_acquired();
                        Some(conn.client.clone())
                    }
                    _ => None,
                }
            };
            let Some(client) = client else { break };
            if waiter.send((connection_id, client)).is_ok() {
                return;
            }
            // That waiter timed out meanwhile; try the next one.
        }

        let mut state = self.state.write();
        if let Some(conn) = state.connections.get_mut(&connection_id) {
            if conn.is_live() && !conn.dedicated {
                conn.mark_idle();
            }
        }
    }

    /// The pool's subscription connection, designating one if needed.
    pub async fn subscription_connection(&self) -> Result<Arc<ElectrumClient>, Error> {
        if let Some(client) = {
            let state = self.state.read();
            state
                .dedicated_id
                .and_then(|id| state.connections.get(&id))
                .filter(|conn| conn.is_live())
                .map(|conn| conn.client.clone())
        } {
            return Ok(client);
        }

        let server = self.select_server().ok_or(Error::NoServers)?;
        let client = self.connect_client(&server).await?;

        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let mut conn = PooledConnection::new(id, client.clone(), server.id, true);
        conn.state = ConnectionState::Active;
        {
            let mut state = self.state.write();
            state.connections.insert(id, conn);
            state.dedicated_id = Some(id);
        }
        self.forward_client_events(&client);
        tracing::info!(
            "Designated dedicated subscription connection {id} via {}",
            server.label
        );
        Ok(client)
    }

    fn forward_client_events(&self, client: &ElectrumClient) {
        let mut rx = client.subscribe_events();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = events.send(PoolEvent::Client(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Subscription event forwarder lagged by {missed} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().push(task);
    }

    pub fn record_server_success(&self, server_id: i64) {
        let mut state = self.state.write();
        state
            .stats
            .entry(server_id)
            .or_default()
            .record_success(&self.backoff);
    }

    pub fn record_server_failure(&self, server_id: i64, kind: FailureKind) {
        let mut state = self.state.write();
        state
            .stats
            .entry(server_id)
            .or_default()
            .record_failure(kind, &self.backoff);
    }

    /// Run one health-check pass: probe idle and dedicated connections,
    /// aggregate per server, reconnect the dedicated connection if it died,
    /// and restore minimum coverage.
    pub async fn health_check(&self) {
        let targets: Vec<(u64, Arc<ElectrumClient>, i64, bool)> = {
            let state = self.state.read();
            state
                .connections
                .values()
                .filter(|conn| {
                    conn.state == ConnectionState::Idle
                        || (conn.dedicated && conn.state == ConnectionState::Active)
                })
                .map(|conn| (conn.id, conn.client.clone(), conn.server_id, conn.dedicated))
                .collect()
        };

        let mut outcome_by_server: HashMap<i64, (bool, bool)> = HashMap::new();
        let mut failed: Vec<(u64, bool)> = Vec::new();

        for (id, client, server_id, dedicated) in targets {
            let started = Instant::now();
            // A socket the reader already saw die must count as a failure
            // here; probing it would quietly reconnect instead.
            let result = if client.is_connected() {
                client.get_block_height().await.map(|_| ())
            } else {
                Err(ClientError::ConnectionLost)
            };
            let latency = started.elapsed();

            let mut state = self.state.write();
            let stats = state.stats.entry(server_id).or_default();
            match &result {
                Ok(_) => {
                    stats.record_health_check(true, latency, None);
                    stats.record_success(&self.backoff);
                    outcome_by_server.entry(server_id).or_insert((false, false)).0 = true;
                }
                Err(e) => {
                    let message = e.to_string();
                    stats.record_health_check(false, latency, Some(&message));
                    stats.record_failure(FailureKind::of(e), &self.backoff);
                    outcome_by_server.entry(server_id).or_insert((false, false)).1 = true;
                    failed.push((id, dedicated));
                }
            }
            if let Some(conn) = state.connections.get_mut(&id) {
                conn.last_health_check = Some(Instant::now());
            }
        }

        {
            // A server is unhealthy only when every checked connection to it
            // failed; one good socket clears the flag.
            let mut state = self.state.write();
            for (server_id, (any_success, any_failure)) in outcome_by_server {
                let stats = state.stats.entry(server_id).or_default();
                if any_success {
                    stats.healthy = true;
                } else if any_failure {
                    stats.healthy = false;
                }
            }
        }

        for (id, dedicated) in failed {
            if dedicated {
                self.reconnect_dedicated(id).await;
            } else {
                self.drop_connection(id).await;
            }
        }

        self.ensure_minimum_connections().await;
    }

    async fn drop_connection(&self, connection_id: u64) {
        let client = {
            let mut state = self.state.write();
            let Some(mut conn) = state.connections.remove(&connection_id) else {
                return;
            };
            conn.state = ConnectionState::Closed;
            if state.dedicated_id == Some(connection_id) {
                state.dedicated_id = None;
            }
            conn.client
        };
        client.disconnect().await;
        tracing::debug!("Dropped pool connection {connection_id}");
    }

    /// Bounded exponential reconnect of the subscription connection. Success
    /// emits [`PoolEvent::SubscriptionReconnected`] so observers re-register.
    async fn reconnect_dedicated(&self, connection_id: u64) {
        let client = {
            let mut state = self.state.write();
            let Some(conn) = state.connections.get_mut(&connection_id) else {
                return;
            };
            conn.state = ConnectionState::Reconnecting;
            conn.client.clone()
        };

        for attempt in 1..=self.options.max_reconnect_attempts {
            match client.reconnect().await {
                Ok(()) => {
                    let server_id = {
                        let mut state = self.state.write();
                        match state.connections.get_mut(&connection_id) {
                            Some(conn) => {
                                conn.state = ConnectionState::Active;
                                Some(conn.server_id)
                            }
                            None => None,
                        }
                    };
                    if let Some(server_id) = server_id {
                        self.record_server_success(server_id);
                    }
                    let _ = self.events.send(PoolEvent::SubscriptionReconnected);
                    tracing::info!(
                        "Dedicated subscription connection {connection_id} reconnected (attempt {attempt})"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "Dedicated reconnect attempt {attempt}/{} failed: {e}",
                        self.options.max_reconnect_attempts
                    );
                    if attempt < self.options.max_reconnect_attempts {
                        let delay = self
                            .options
                            .reconnect_delay()
                            .saturating_mul(2u32.saturating_pow(attempt - 1));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        // Give up on this socket; the next subscription_connection() call
        // designates a fresh one.
        self.drop_connection(connection_id).await;
    }

    /// Restore one connection per server and the overall minimum.
    async fn ensure_minimum_connections(&self) {
        let uncovered: Vec<i64> = {
            let state = self.state.read();
            let covered: HashSet<i64> = state
                .connections
                .values()
                .filter(|conn| conn.is_live())
                .map(|conn| conn.server_id)
                .collect();
            state
                .servers
                .iter()
                .map(|server| server.id)
                .filter(|id| !covered.contains(id))
                .collect()
        };

        for server_id in uncovered {
            if let Err(e) = self.create_connection_to(server_id).await {
                tracing::warn!("Could not restore a connection to server {server_id}: {e}");
            }
        }

        while live_connections(&self.state.read()) < self.effective_min() {
            if let Err(e) = self.create_connection(false).await {
                tracing::warn!("Could not restore minimum connections: {e}");
                break;
            }
        }
    }

    async fn create_connection_to(&self, server_id: i64) -> Result<(), Error> {
        let server = {
            let state = self.state.read();
            state
                .servers
                .iter()
                .find(|server| server.id == server_id)
                .cloned()
        }
        .ok_or(Error::NoServers)?;

        let client = self.connect_client(&server).await?;
        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let conn = PooledConnection::new(id, client, server.id, false);
        self.state.write().connections.insert(id, conn);
        Ok(())
    }

    /// Ping idle non-dedicated connections so middleboxes keep the sockets
    /// alive. Failures are left for the health check to judge.
    pub async fn keepalive(&self) {
        let targets: Vec<(u64, Arc<ElectrumClient>)> = {
            let state = self.state.read();
            state
                .connections
                .values()
                .filter(|conn| conn.state == ConnectionState::Idle && !conn.dedicated)
                .map(|conn| (conn.id, conn.client.clone()))
                .collect()
        };
        for (id, client) in targets {
            if let Err(e) = client.ping().await {
                tracing::debug!("Keepalive ping failed on connection {id}: {e}");
            }
        }
    }

    /// Close idle non-dedicated connections past the idle timeout, never
    /// dropping below `effective_min`.
    pub async fn cleanup_idle(&self) {
        let idle_timeout = self.options.idle_timeout();
        let min = self.effective_min();
        let now = Instant::now();

        let expired: Vec<u64> = {
            let state = self.state.read();
            let mut live = live_connections(&state);
            let mut expired = Vec::new();
            for conn in state.connections.values() {
                if live <= min {
                    break;
                }
                if conn.state == ConnectionState::Idle
                    && !conn.dedicated
                    && now.duration_since(conn.last_used) > idle_timeout
                {
                    expired.push(conn.id);
                    live -= 1;
                }
            }
            expired
        };

        for id in expired {
            self.drop_connection(id).await;
            tracing::debug!("Closed idle pool connection {id}");
        }
    }

    /// Apply a changed server list: connections to removed or disabled
    /// servers are disconnected; a removed dedicated connection clears the
    /// slot for the next `subscription_connection()` call.
    pub async fn reload_servers(&self, servers: Vec<ElectrumServerRecord>) {
        let servers = prepare_servers(servers, self.network);
        let keep: HashSet<i64> = servers.iter().map(|server| server.id).collect();

        let stale: Vec<u64> = {
            let mut state = self.state.write();
            state.servers = servers;
            state
                .connections
                .values()
                .filter(|conn| !keep.contains(&conn.server_id))
                .map(|conn| conn.id)
                .collect()
        };

        let dropped = stale.len();
        for id in stale {
            self.drop_connection(id).await;
        }
        tracing::info!(
            "Reloaded electrum servers: {} kept, {dropped} connections dropped",
            keep.len()
        );
    }

    /// Tear everything down. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // Waiters see their sender dropped and fail with Shutdown.
        self.waiters.lock().clear();

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let clients: Vec<Arc<ElectrumClient>> = {
            let mut state = self.state.write();
            state.dedicated_id = None;
            state
                .connections
                .drain()
                .map(|(_, conn)| conn.client)
                .collect()
        };
        for client in clients {
            client.disconnect().await;
        }

        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("{} electrum pool shut down", self.network);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.read();
        let total = self.total_acquisitions.load(Ordering::Relaxed);
        let nanos = self.total_acquire_nanos.load(Ordering::Relaxed);
        PoolStats {
            total_acquisitions: total,
            avg_acquire_time_ms: if total == 0 {
                0.0
            } else {
                nanos as f64 / total as f64 / 1_000_000.0
            },
            connections: state.connections.len(),
            idle_connections: state
                .connections
                .values()
                .filter(|conn| conn.state == ConnectionState::Idle)
                .count(),
            active_connections: state
                .connections
                .values()
                .filter(|conn| conn.state == ConnectionState::Active)
                .count(),
            waiting_requests: self.waiters.lock().len(),
            servers: state
                .stats
                .iter()
                .map(|(id, stats)| ServerStatsSnapshot::of(*id, stats))
                .collect(),
        }
    }

    fn spawn_timers(&self) {
        let mut tasks = self.tasks.lock();

        let weak = self.me.clone();
        let interval = self.options.health_check_interval();
        tasks.push(tokio::spawn(timer_loop(weak, interval, |pool| async move {
            pool.health_check().await;
        })));

        let weak = self.me.clone();
        let interval = self.options.keepalive_interval();
        tasks.push(tokio::spawn(timer_loop(weak, interval, |pool| async move {
            pool.keepalive().await;
        })));

        let weak = self.me.clone();
        let interval = self.options.idle_timeout() / 2;
        tasks.push(tokio::spawn(timer_loop(weak, interval, |pool| async move {
            pool.cleanup_idle().await;
        })));
    }
}

async fn timer_loop<F, Fut>(pool: Weak<ConnectionPool>, period: std::time::Duration, tick: F)
where
    F: Fn(Arc<ConnectionPool>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(pool) = pool.upgrade() else { break };
        if pool.shut_down.load(Ordering::SeqCst) {
            break;
        }
        tick(pool).await;
    }
}

fn live_connections(state: &PoolState) -> usize {
    state
        .connections
        .values()
        .filter(|conn| conn.is_live())
        .count()
}

fn prepare_servers(
    mut servers: Vec<ElectrumServerRecord>,
    network: Network,
) -> Vec<ElectrumServerRecord> {
    servers.retain(|server| server.enabled && server.network == network);
    servers.sort_by_key(|server| server.priority);
    servers
}

/// An acquired connection. Dropping the handle releases the connection; the
/// inner client must not be retained past that point.
pub struct PoolHandle {
    pool: Arc<ConnectionPool>,
    connection_id: u64,
    client: Arc<ElectrumClient>,
    released: bool,
}

impl PoolHandle {
    pub fn client(&self) -> &ElectrumClient {
        &self.client
    }

    pub(crate) fn client_arc(&self) -> Arc<ElectrumClient> {
        self.client.clone()
    }

    pub fn server_id(&self) -> i64 {
        self.pool
            .state
            .read()
            .connections
            .get(&self.connection_id)
            .map(|conn| conn.server_id)
            .unwrap_or_default()
    }

    /// Run one logical operation against the client.
    pub async fn with_client<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce(Arc<ElectrumClient>) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        f(self.client.clone()).await
    }

    /// Feed a request outcome into the owning server's health accounting.
    /// Transport and timeout failures also retire the connection.
    pub fn report_result<T>(&self, result: &Result<T, ClientError>) {
        match result {
            Ok(_) => self.pool.record_server_success(self.server_id()),
            Err(e) => {
                let kind = FailureKind::of(e);
                self.pool.record_server_failure(self.server_id(), kind);
                if matches!(kind, FailureKind::Timeout | FailureKind::Disconnect) {
                    let pool = self.pool.clone();
                    let id = self.connection_id;
                    tokio::spawn(async move {
                        pool.drop_connection(id).await;
                        pool.ensure_minimum_connections().await;
                    });
                }
            }
        }
    }

    pub fn release(mut self) {
        self.released = true;
        self.pool.release(self.connection_id);
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if !self.released {
            self.pool.release(self.connection_id);
        }
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("connection_id", &self.connection_id)
            .field("server_id", &self.server_id())
            .finish()
    }
}

impl FailureKind {
    pub fn of(error: &ClientError) -> Self {
        match error {
            ClientError::Timeout(TimeoutKind::Connect) => Self::Disconnect,
            ClientError::Timeout(_) => Self::Timeout,
            ClientError::Io(_)
            | ClientError::Tls(_)
            | ClientError::InvalidServerName
            | ClientError::Socks(_)
            | ClientError::ConnectionLost => Self::Disconnect,
            ClientError::Json(_)
            | ClientError::Server(_)
            | ClientError::Protocol(_)
            | ClientError::Script(_)
            | ClientError::Tx(_) => Self::Error,
        }
    }
}
