// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Electrum client: one socket, multiplexed JSON-RPC.
//!
//! Outbound requests get a monotonically increasing id and one line on the
//! socket; a reader task matches response lines back to their callers and
//! dispatches server-initiated notifications. A connection that dies fails
//! every in-flight request with [`Error::ConnectionLost`]; the next call
//! reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use haven_core::amount::sat_per_vb_from_btc_per_kb;
use haven_core::bitcoin::Network;
use haven_core::bitcoin::Txid;
use haven_core::tx::{decode_raw_transaction, DecodedTransaction};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;

use crate::error::{Error, TimeoutKind};
use crate::socks::Socks5Config;
use crate::stream::{ElectrumStream, Endpoint};
use crate::types::{Balance, ClientEvent, HeaderNotification, HistoryEntry, UnspentEntry};

const CLIENT_NAME: &str = "haven 0.1";
const PROTOCOL_VERSION: &str = "1.4";

/// Circuit establishment makes everything slower behind a SOCKS5 proxy.
const TOR_TIMEOUT_MULTIPLIER: u32 = 3;

const TX_BATCH_EXTRA_ATTEMPTS: u32 = 2;
const TX_BATCH_RETRY_STEP: Duration = Duration::from_millis(500);

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Duration,
    pub batch: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
            batch: Duration::from_secs(60),
        }
    }
}

impl Timeouts {
    fn behind_proxy(self) -> Self {
        Self {
            connect: self.connect * TOR_TIMEOUT_MULTIPLIER,
            request: self.request * TOR_TIMEOUT_MULTIPLIER,
            batch: self.batch * TOR_TIMEOUT_MULTIPLIER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub proxy: Option<Socks5Config>,
    pub network: Network,
    pub timeouts: Timeouts,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint, network: Network) -> Self {
        Self {
            endpoint,
            proxy: None,
            network,
            timeouts: Timeouts::default(),
        }
    }
}

type PendingSender = oneshot::Sender<Result<Value, Error>>;

struct Shared {
    pending: Mutex<HashMap<u64, PendingSender>>,
    /// scripthash -> address, for attaching addresses to inbound
    /// `blockchain.scripthash.subscribe` notifications.
    subscriptions: Mutex<HashMap<String, Option<String>>>,
    events: broadcast::Sender<ClientEvent>,
    connected: AtomicBool,
    headers_subscribed: AtomicBool,
    generation: AtomicU64,
}

impl Shared {
    fn fail_pending(&self, make_error: impl Fn() -> Error) {
        let pending: Vec<PendingSender> = {
            let mut map = self.pending.lock();
            map.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(make_error()));
        }
    }
}

struct Connection {
    writer: WriteHalf<ElectrumStream>,
}

pub struct ElectrumClient {
    config: ClientConfig,
    timeouts: Timeouts,
    next_id: AtomicU64,
    conn: tokio::sync::Mutex<Option<Connection>>,
    shared: Arc<Shared>,
    server_version: Mutex<Option<(String, String)>>,
}

impl ElectrumClient {
    pub fn new(config: ClientConfig) -> Self {
        let timeouts = if config.proxy.is_some() {
            config.timeouts.behind_proxy()
        } else {
            config.timeouts
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            timeouts,
            next_id: AtomicU64::new(1),
            conn: tokio::sync::Mutex::new(None),
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(HashMap::new()),
                events,
                connected: AtomicBool::new(false),
                headers_subscribed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
            server_version: Mutex::new(None),
        }
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Negotiated `server.version` response, once a connection has been
    /// established.
    pub fn server_version(&self) -> Option<(String, String)> {
        self.server_version.lock().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub async fn connect(&self) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;
        self.ensure_connected(&mut conn).await
    }

    pub async fn disconnect(&self) {
        let mut conn = self.conn.lock().await;
        self.teardown(&mut conn);
    }

    /// Drop the current socket and establish a fresh one.
    pub async fn reconnect(&self) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;
        self.teardown(&mut conn);
        self.ensure_connected(&mut conn).await
    }

    fn teardown(&self, conn: &mut Option<Connection>) {
        *conn = None;
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.fail_pending(|| Error::ConnectionLost);
    }

    async fn ensure_connected(&self, conn: &mut Option<Connection>) -> Result<(), Error> {
        if conn.is_some() && self.is_connected() {
            return Ok(());
        }
        *conn = None;
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        let stream = timeout(
            self.timeouts.connect,
            ElectrumStream::connect(&self.config.endpoint, self.config.proxy.as_ref()),
        )
        .await
        .map_err(|_| Error::Timeout(TimeoutKind::Connect))??;

        let (read_half, write_half) = tokio::io::split(stream);
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);
        spawn_reader(self.shared.clone(), read_half, generation);

        let mut connection = Connection { writer: write_half };

        // The protocol allows exactly one version negotiation per connection.
        let rx = self
            .send_on(&mut connection, "server.version", json!([CLIENT_NAME, PROTOCOL_VERSION]))
            .await?;
        let version = self.await_response(rx, self.timeouts.request).await?;
        if let Some((server, protocol)) = parse_version(&version) {
            tracing::debug!(
                "Connected to {}:{} ({server}, protocol {protocol})",
                self.config.endpoint.host,
                self.config.endpoint.port
            );
            *self.server_version.lock() = Some((server, protocol));
        }

        // Re-arm sticky subscriptions from the previous connection.
        if self.shared.headers_subscribed.load(Ordering::SeqCst) {
            let rx = self
                .send_on(&mut connection, "blockchain.headers.subscribe", json!([]))
                .await?;
            let tip = self.await_response(rx, self.timeouts.request).await?;
            if let Ok(tip) = serde_json::from_value::<HeaderNotification>(tip) {
                let _ = self.shared.events.send(ClientEvent::NewBlock {
                    height: tip.height,
                    header_hex: tip.hex,
                });
            }
        }
        let scripthashes: Vec<String> = {
            let subscriptions = self.shared.subscriptions.lock();
            subscriptions.keys().cloned().collect()
        };
        for scripthash in scripthashes {
            let rx = self
                .send_on(
                    &mut connection,
                    "blockchain.scripthash.subscribe",
                    json!([scripthash]),
                )
                .await?;
            self.await_response(rx, self.timeouts.request).await?;
        }

        *conn = Some(connection);
        Ok(())
    }

    /// Register a pending entry and write one request line.
    async fn send_on(
        &self,
        conn: &mut Connection,
        method: &str,
        params: Value,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, Error>>), Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let mut line = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        }))?;
        line.push(b'\n');

        if let Err(e) = conn.writer.write_all(&line).await {
            self.shared.pending.lock().remove(&id);
            self.shared.connected.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok((id, rx))
    }

    async fn await_response(
        &self,
        (id, rx): (u64, oneshot::Receiver<Result<Value, Error>>),
        limit: Duration,
    ) -> Result<Value, Error> {
        match timeout(limit, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(Error::Timeout(TimeoutKind::Request))
            }
        }
    }

    /// Issue a single request, reconnecting first if the socket is gone.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
        let pending = {
            let mut conn = self.conn.lock().await;
            self.ensure_connected(&mut conn).await?;
            let connection = conn.as_mut().ok_or(Error::ConnectionLost)?;
            self.send_on(connection, method, params).await?
        };
        self.await_response(pending, self.timeouts.request).await
    }

    /// Issue many requests in one socket write; results come back in input
    /// order, each id timing out independently.
    pub async fn batch_request(
        &self,
        requests: &[(&str, Value)],
    ) -> Result<Vec<Result<Value, Error>>, Error> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let pendings = {
            let mut conn = self.conn.lock().await;
            self.ensure_connected(&mut conn).await?;
            let connection = conn.as_mut().ok_or(Error::ConnectionLost)?;

            let mut buffer = Vec::new();
            let mut pendings = Vec::with_capacity(requests.len());
            for (method, params) in requests {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = oneshot::channel();
                self.shared.pending.lock().insert(id, tx);
                let mut line = serde_json::to_vec(&json!({
                    "jsonrpc": "2.0",
                    "method": method,
                    "params": params,
                    "id": id,
                }))?;
                line.push(b'\n');
                buffer.extend_from_slice(&line);
                pendings.push((id, rx));
            }

            if let Err(e) = connection.writer.write_all(&buffer).await {
                let mut pending = self.shared.pending.lock();
                for (id, _) in &pendings {
                    pending.remove(id);
                }
                self.shared.connected.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
            pendings
        };

        let batch_timeout = self.timeouts.batch;
        let shared = &self.shared;
        let results = futures::future::join_all(pendings.into_iter().map(|(id, rx)| async move {
            match timeout(batch_timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::ConnectionLost),
                Err(_) => {
                    shared.pending.lock().remove(&id);
                    Err(Error::Timeout(TimeoutKind::Batch))
                }
            }
        }))
        .await;
        Ok(results)
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.request("server.ping", json!([])).await?;
        Ok(())
    }

    /// Current tip height. Subscribing is the protocol's way of asking, so
    /// the header subscription becomes sticky as a side effect.
    pub async fn get_block_height(&self) -> Result<u64, Error> {
        let tip = self.subscribe_headers().await?;
        Ok(tip.height)
    }

    pub async fn subscribe_headers(&self) -> Result<HeaderNotification, Error> {
        let result = self.request("blockchain.headers.subscribe", json!([])).await?;
        self.shared.headers_subscribed.store(true, Ordering::SeqCst);
        Ok(serde_json::from_value(result)?)
    }

    /// Subscribe to a scripthash, remembering its address so notification
    /// events can carry it.
    pub async fn subscribe_scripthash(
        &self,
        scripthash: &str,
        address: Option<&str>,
    ) -> Result<Option<String>, Error> {
        self.shared
            .subscriptions
            .lock()
            .insert(scripthash.to_string(), address.map(String::from));
        let result = self
            .request("blockchain.scripthash.subscribe", json!([scripthash]))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn get_balance(&self, scripthash: &str) -> Result<Balance, Error> {
        let result = self
            .request("blockchain.scripthash.get_balance", json!([scripthash]))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn get_history(&self, scripthash: &str) -> Result<Vec<HistoryEntry>, Error> {
        let result = self
            .request("blockchain.scripthash.get_history", json!([scripthash]))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Histories for many scripthashes, in input order.
    pub async fn get_history_batch(
        &self,
        scripthashes: &[String],
    ) -> Result<Vec<Vec<HistoryEntry>>, Error> {
        let requests: Vec<(&str, Value)> = scripthashes
            .iter()
            .map(|scripthash| ("blockchain.scripthash.get_history", json!([scripthash])))
            .collect();
        self.batch_request(&requests)
            .await?
            .into_iter()
            .map(|result| Ok(serde_json::from_value(result?)?))
            .collect()
    }

    pub async fn list_unspent(&self, scripthash: &str) -> Result<Vec<UnspentEntry>, Error> {
        let result = self
            .request("blockchain.scripthash.listunspent", json!([scripthash]))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_unspent_batch(
        &self,
        scripthashes: &[String],
    ) -> Result<Vec<Vec<UnspentEntry>>, Error> {
        let requests: Vec<(&str, Value)> = scripthashes
            .iter()
            .map(|scripthash| ("blockchain.scripthash.listunspent", json!([scripthash])))
            .collect();
        self.batch_request(&requests)
            .await?
            .into_iter()
            .map(|result| Ok(serde_json::from_value(result?)?))
            .collect()
    }

    pub async fn get_transaction_hex(&self, txid: Txid) -> Result<String, Error> {
        // Verbose mode is optional server-side, so always fetch hex.
        let result = self
            .request(
                "blockchain.transaction.get",
                json!([txid.to_string(), false]),
            )
            .await?;
        result
            .as_str()
            .map(String::from)
            .ok_or_else(|| Error::protocol("transaction.get did not return a hex string"))
    }

    pub async fn get_transaction(&self, txid: Txid) -> Result<DecodedTransaction, Error> {
        let raw = self.get_transaction_hex(txid).await?;
        Ok(decode_raw_transaction(&raw, self.config.network)?)
    }

    /// Fetch many transactions, retrying ids that time out with a linear
    /// backoff before giving up.
    pub async fn get_transactions_batch(
        &self,
        txids: &[Txid],
    ) -> Result<Vec<DecodedTransaction>, Error> {
        let mut decoded: HashMap<Txid, DecodedTransaction> = HashMap::with_capacity(txids.len());
        let mut missing: Vec<Txid> = txids.to_vec();

        let mut attempt = 0;
        loop {
            let requests: Vec<(&str, Value)> = missing
                .iter()
                .map(|txid| {
                    (
                        "blockchain.transaction.get",
                        json!([txid.to_string(), false]),
                    )
                })
                .collect();
            let results = self.batch_request(&requests).await?;

            let mut timed_out = Vec::new();
            for (txid, result) in missing.iter().zip(results) {
                match result {
                    Ok(value) => {
                        let raw = value.as_str().ok_or_else(|| {
                            Error::protocol("transaction.get did not return a hex string")
                        })?;
                        decoded.insert(*txid, decode_raw_transaction(raw, self.config.network)?);
                    }
                    Err(e) if e.is_timeout() => timed_out.push(*txid),
                    Err(e) => return Err(e),
                }
            }

            if timed_out.is_empty() {
                break;
            }
            if attempt >= TX_BATCH_EXTRA_ATTEMPTS {
                return Err(Error::Timeout(TimeoutKind::Batch));
            }
            attempt += 1;
            tokio::time::sleep(TX_BATCH_RETRY_STEP * attempt).await;
            missing = timed_out;
        }

        Ok(txids
            .iter()
            .filter_map(|txid| decoded.remove(txid))
            .collect())
    }

    pub async fn get_block_header(&self, height: u64) -> Result<String, Error> {
        let result = self
            .request("blockchain.block.header", json!([height]))
            .await?;
        result
            .as_str()
            .map(String::from)
            .ok_or_else(|| Error::protocol("block.header did not return a hex string"))
    }

    /// Timestamp of the block at `height`, from its raw header.
    pub async fn block_timestamp(&self, height: u64) -> Result<u64, Error> {
        let header = self.get_block_header(height).await?;
        let bytes = hex::decode(&header).map_err(|_| Error::protocol("malformed block header"))?;
        let time = bytes
            .get(68..72)
            .ok_or_else(|| Error::protocol("block header shorter than 80 bytes"))?;
        Ok(u32::from_le_bytes([time[0], time[1], time[2], time[3]]) as u64)
    }

    /// Fee estimate in sat/vB, floored at 1.
    pub async fn estimate_fee(&self, target_blocks: u16) -> Result<u64, Error> {
        let result = self
            .request("blockchain.estimatefee", json!([target_blocks]))
            .await?;
        let btc_per_kb = result
            .as_f64()
            .ok_or_else(|| Error::protocol("estimatefee did not return a number"))?;
        Ok(sat_per_vb_from_btc_per_kb(btc_per_kb))
    }

    pub async fn broadcast_transaction(&self, raw_hex: &str) -> Result<Txid, Error> {
        let result = self
            .request("blockchain.transaction.broadcast", json!([raw_hex]))
            .await?;
        let txid = result
            .as_str()
            .ok_or_else(|| Error::protocol("broadcast did not return a txid"))?;
        txid.parse()
            .map_err(|_| Error::protocol("broadcast returned a malformed txid"))
    }
}

impl std::fmt::Debug for ElectrumClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectrumClient")
            .field("endpoint", &self.config.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn parse_version(value: &Value) -> Option<(String, String)> {
    let array = value.as_array()?;
    Some((
        array.first()?.as_str()?.to_string(),
        array.get(1)?.as_str()?.to_string(),
    ))
}

fn spawn_reader(shared: Arc<Shared>, read_half: ReadHalf<ElectrumStream>, generation: u64) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => handle_line(&shared, &line),
                Err(e) => {
                    tracing::debug!("Electrum socket read error: {e}");
                    break;
                }
            }
        }
        // Only the reader of the live connection may fail the pending map;
        // a stale reader from a replaced socket must not touch it.
        if shared.generation.load(Ordering::SeqCst) == generation {
            shared.connected.store(false, Ordering::SeqCst);
            shared.fail_pending(|| Error::ConnectionLost);
        }
    });
}

fn handle_line(shared: &Shared, line: &str) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    let message: Value = match serde_json::from_str(trimmed) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Dropping malformed Electrum message: {e}");
            return;
        }
    };

    let id = message.get("id").filter(|id| !id.is_null());
    match id {
        None => handle_notification(shared, &message),
        Some(id) => {
            let Some(id) = id.as_u64() else {
                tracing::warn!("Dropping response with non-numeric id");
                return;
            };
            let Some(sender) = shared.pending.lock().remove(&id) else {
                tracing::debug!("Response for unknown id {id}");
                return;
            };
            let outcome = match message.get("error") {
                Some(error) if !error.is_null() => Err(Error::Server(
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .unwrap_or_else(|| error.to_string()),
                )),
                _ => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = sender.send(outcome);
        }
    }
}

fn handle_notification(shared: &Shared, message: &Value) {
    let Some(method) = message.get("method").and_then(Value::as_str) else {
        return;
    };
    let params = message.get("params").and_then(Value::as_array);
    match method {
        "blockchain.headers.subscribe" => {
            let Some(tip) = params
                .and_then(|params| params.first())
                .and_then(|tip| serde_json::from_value::<HeaderNotification>(tip.clone()).ok())
            else {
                tracing::warn!("Malformed headers.subscribe notification");
                return;
            };
            let _ = shared.events.send(ClientEvent::NewBlock {
                height: tip.height,
                header_hex: tip.hex,
            });
        }
        "blockchain.scripthash.subscribe" => {
            let Some(params) = params else { return };
            let Some(scripthash) = params.first().and_then(Value::as_str) else {
                tracing::warn!("Malformed scripthash.subscribe notification");
                return;
            };
            let status = params
                .get(1)
                .and_then(Value::as_str)
                .map(String::from);
            let address = shared
                .subscriptions
                .lock()
                .get(scripthash)
                .cloned()
                .flatten();
            let _ = shared.events.send(ClientEvent::AddressActivity {
                scripthash: scripthash.to_string(),
                address,
                status,
            });
        }
        other => {
            tracing::debug!("Ignoring notification {other}");
        }
    }
}
