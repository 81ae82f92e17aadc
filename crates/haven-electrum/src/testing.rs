// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Scripted in-process Electrum server for tests: a real TCP listener
//! speaking line-delimited JSON-RPC, with canned per-method state and fault
//! injection (dropped responses, forced disconnects).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use haven_core::bitcoin::Network;
use haven_core::model::ElectrumServerRecord;
use haven_core::tx::decode_raw_transaction;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Default)]
struct MockState {
    height: Mutex<u64>,
    /// scripthash -> history entries, already in wire shape.
    histories: Mutex<HashMap<String, Vec<Value>>>,
    /// scripthash -> listunspent entries, already in wire shape.
    unspent: Mutex<HashMap<String, Vec<Value>>>,
    /// scripthash -> subscription status.
    statuses: Mutex<HashMap<String, Value>>,
    /// txid -> raw transaction hex.
    transactions: Mutex<HashMap<String, String>>,
    fee_btc_per_kb: Mutex<f64>,
    /// method -> how many upcoming responses to swallow.
    dropped: Mutex<HashMap<String, usize>>,
    request_counts: Mutex<HashMap<String, usize>>,
}

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

pub struct MockElectrumServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    writers: Arc<Mutex<Vec<SharedWriter>>>,
    kill: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl Drop for MockElectrumServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl MockElectrumServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock electrum listener");
        let addr = listener.local_addr().expect("mock listener address");
        let state = Arc::new(MockState {
            fee_btc_per_kb: Mutex::new(0.00002),
            ..MockState::default()
        });
        let writers: Arc<Mutex<Vec<SharedWriter>>> = Arc::new(Mutex::new(Vec::new()));
        let (kill, _) = broadcast::channel(8);

        let accept_state = state.clone();
        let accept_writers = writers.clone();
        let accept_kill = kill.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let (read_half, write_half) = socket.into_split();
                let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(write_half));
                accept_writers.lock().push(writer.clone());

                let state = accept_state.clone();
                let mut kill_rx = accept_kill.subscribe();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(read_half);
                    let mut line = String::new();
                    loop {
                        line.clear();
                        tokio::select! {
                            read = reader.read_line(&mut line) => {
                                match read {
                                    Ok(0) | Err(_) => break,
                                    Ok(_) => {
                                        if let Some(response) = handle_request(&state, &line) {
                                            let mut out = response.to_string();
                                            out.push('\n');
                                            if writer.lock().await.write_all(out.as_bytes()).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                }
                            }
                            _ = kill_rx.recv() => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            state,
            writers,
            kill,
            accept_task,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// A store-shaped record pointing at this server.
    pub fn server_record(&self, id: i64, priority: i32) -> ElectrumServerRecord {
        ElectrumServerRecord {
            id,
            label: format!("mock-{id}"),
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            tls: false,
            priority,
            enabled: true,
            network: Network::Regtest,
        }
    }

    pub fn set_height(&self, height: u64) {
        *self.state.height.lock() = height;
    }

    pub fn add_history(&self, scripthash: &str, txid: &str, height: i64) {
        self.state
            .histories
            .lock()
            .entry(scripthash.to_string())
            .or_default()
            .push(json!({ "tx_hash": txid, "height": height }));
    }

    pub fn clear_history(&self, scripthash: &str) {
        self.state.histories.lock().remove(scripthash);
    }

    pub fn set_status(&self, scripthash: &str, status: &str) {
        self.state
            .statuses
            .lock()
            .insert(scripthash.to_string(), json!(status));
    }

    pub fn add_unspent(&self, scripthash: &str, txid: &str, vout: u32, value: u64, height: u64) {
        self.state
            .unspent
            .lock()
            .entry(scripthash.to_string())
            .or_default()
            .push(json!({ "tx_hash": txid, "tx_pos": vout, "value": value, "height": height }));
    }

    pub fn remove_unspent(&self, scripthash: &str, txid: &str, vout: u32) {
        if let Some(entries) = self.state.unspent.lock().get_mut(scripthash) {
            entries.retain(|entry| {
                entry["tx_hash"] != json!(txid) || entry["tx_pos"] != json!(vout)
            });
        }
    }

    pub fn set_transaction(&self, txid: &str, raw_hex: &str) {
        self.state
            .transactions
            .lock()
            .insert(txid.to_string(), raw_hex.to_string());
    }

    pub fn set_fee_estimate(&self, btc_per_kb: f64) {
        *self.state.fee_btc_per_kb.lock() = btc_per_kb;
    }

    /// Swallow the next `count` responses to `method`, simulating a server
    /// that accepted the request and never answered.
    pub fn drop_responses(&self, method: &str, count: usize) {
        *self
            .state
            .dropped
            .lock()
            .entry(method.to_string())
            .or_default() += count;
    }

    /// Hard-close every open socket.
    pub fn kill_connections(&self) {
        let _ = self.kill.send(());
        self.writers.lock().clear();
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.state
            .request_counts
            .lock()
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    pub async fn notify_new_block(&self, height: u64) {
        self.set_height(height);
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "blockchain.headers.subscribe",
            "params": [{ "height": height, "hex": mock_header_hex(height) }],
        });
        self.broadcast_line(notification).await;
    }

    pub async fn notify_scripthash(&self, scripthash: &str, status: &str) {
        self.set_status(scripthash, status);
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "blockchain.scripthash.subscribe",
            "params": [scripthash, status],
        });
        self.broadcast_line(notification).await;
    }

    async fn broadcast_line(&self, message: Value) {
        let writers: Vec<SharedWriter> = self.writers.lock().clone();
        let mut line = message.to_string();
        line.push('\n');
        for writer in writers {
            let _ = writer.lock().await.write_all(line.as_bytes()).await;
        }
    }
}

fn handle_request(state: &MockState, line: &str) -> Option<Value> {
    let request: Value = serde_json::from_str(line.trim()).ok()?;
    let method = request.get("method")?.as_str()?.to_string();
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let params = request
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    *state.request_counts.lock().entry(method.clone()).or_default() += 1;

    {
        let mut dropped = state.dropped.lock();
        if let Some(remaining) = dropped.get_mut(&method) {
            if *remaining > 0 {
                *remaining -= 1;
                return None;
            }
        }
    }

    let result: Result<Value, Value> = match method.as_str() {
        "server.version" => Ok(json!(["MockElectrum 1.0", "1.4"])),
        "server.ping" => Ok(Value::Null),
        "blockchain.headers.subscribe" => {
            let height = *state.height.lock();
            Ok(json!({ "height": height, "hex": mock_header_hex(height) }))
        }
        "blockchain.block.header" => match params.first().and_then(Value::as_u64) {
            Some(height) => Ok(json!(mock_header_hex(height))),
            None => Err(json!({ "code": 1, "message": "missing height" })),
        },
        "blockchain.scripthash.subscribe" => {
            let scripthash = params.first().and_then(Value::as_str).unwrap_or_default();
            Ok(state
                .statuses
                .lock()
                .get(scripthash)
                .cloned()
                .unwrap_or(Value::Null))
        }
        "blockchain.scripthash.get_history" => {
            let scripthash = params.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::Array(
                state
                    .histories
                    .lock()
                    .get(scripthash)
                    .cloned()
                    .unwrap_or_default(),
            ))
        }
        "blockchain.scripthash.listunspent" => {
            let scripthash = params.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::Array(
                state
                    .unspent
                    .lock()
                    .get(scripthash)
                    .cloned()
                    .unwrap_or_default(),
            ))
        }
        "blockchain.scripthash.get_balance" => {
            let scripthash = params.first().and_then(Value::as_str).unwrap_or_default();
            let confirmed: u64 = state
                .unspent
                .lock()
                .get(scripthash)
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| entry["value"].as_u64())
                        .sum()
                })
                .unwrap_or(0);
            Ok(json!({ "confirmed": confirmed, "unconfirmed": 0 }))
        }
        "blockchain.transaction.get" => {
            let txid = params.first().and_then(Value::as_str).unwrap_or_default();
            match state.transactions.lock().get(txid) {
                Some(raw) => Ok(json!(raw)),
                None => Err(json!({
                    "code": 2,
                    "message": format!("No such mempool or blockchain transaction: {txid}"),
                })),
            }
        }
        "blockchain.transaction.broadcast" => {
            let raw = params.first().and_then(Value::as_str).unwrap_or_default();
            match decode_raw_transaction(raw, Network::Regtest) {
                Ok(decoded) => {
                    let txid = decoded.txid.to_string();
                    state
                        .transactions
                        .lock()
                        .insert(txid.clone(), raw.to_string());
                    Ok(json!(txid))
                }
                Err(e) => Err(json!({ "code": 1, "message": format!("bad transaction: {e}") })),
            }
        }
        "blockchain.estimatefee" => Ok(json!(*state.fee_btc_per_kb.lock())),
        other => Err(json!({ "code": -32601, "message": format!("unknown method {other}") })),
    };

    Some(match result {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
    })
}

/// An 80-byte header whose timestamp field decodes to a stable value.
pub fn mock_header_hex(height: u64) -> String {
    let mut header = [0u8; 80];
    header[0] = 0x04;
    let time = 1_700_000_000u32.wrapping_add((height as u32).wrapping_mul(600));
    header[68..72].copy_from_slice(&time.to_le_bytes());
    hex::encode(header)
}

/// The timestamp `mock_header_hex` encodes for a height.
pub fn mock_header_time(height: u64) -> u64 {
    1_700_000_000u64 + height * 600
}
