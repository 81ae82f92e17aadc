// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Per-network pool registry.
//!
//! Pools are owned values handed to sync operations; this registry is the
//! one place that builds them from store-configured servers, replacing the
//! per-network process globals of older wallet servers.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use haven_core::bitcoin::Network;
use haven_core::store::WalletStore;
use haven_electrum::pool::PoolEvent;
use haven_electrum::types::ClientEvent;
use haven_electrum::{BackoffOptions, ConnectionPool, PoolOptions, Socks5Config};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::RwLock;

use crate::message::Message;
use crate::Error;

/// Node configuration as stored per network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    pub pool: PoolOptions,
    pub backoff: BackoffOptions,
}

pub struct PoolRegistry {
    store: Arc<dyn WalletStore>,
    proxy: Option<Socks5Config>,
    pools: RwLock<HashMap<Network, Arc<ConnectionPool>>>,
    events: broadcast::Sender<Message>,
}

impl PoolRegistry {
    pub fn new(store: Arc<dyn WalletStore>, proxy: Option<Socks5Config>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            store,
            proxy,
            pools: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    /// The pool for a network, building and initializing it on first use.
    pub async fn pool(&self, network: Network) -> Result<Arc<ConnectionPool>, Error> {
        if let Some(pool) = self.pools.read().await.get(&network) {
            return Ok(pool.clone());
        }

        let servers = self.store.electrum_servers(network).await?;
        let config: NodeConfig = match self.store.node_config(network).await? {
            Some(value) => serde_json::from_value(value)?,
            None => NodeConfig::default(),
        };

        let mut pools = self.pools.write().await;
        match pools.entry(network) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let pool = ConnectionPool::new(
                    network,
                    servers,
                    config.pool,
                    config.backoff,
                    self.proxy.clone(),
                );
                pool.initialize().await?;
                self.bridge_events(&pool);
                tracing::info!("Built electrum pool for {network}");
                Ok(entry.insert(pool).clone())
            }
        }
    }

    /// Re-read the server list from the store and apply it to a live pool.
    pub async fn reload(&self, network: Network) -> Result<(), Error> {
        let pool = {
            let pools = self.pools.read().await;
            pools.get(&network).cloned()
        };
        if let Some(pool) = pool {
            let servers = self.store.electrum_servers(network).await?;
            pool.reload_servers(servers).await;
        }
        Ok(())
    }

    pub async fn shutdown_all(&self) {
        let pools: Vec<Arc<ConnectionPool>> = {
            let mut pools = self.pools.write().await;
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            pool.shutdown().await;
        }
    }

    fn bridge_events(&self, pool: &Arc<ConnectionPool>) {
        let mut rx = pool.subscribe_events();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(PoolEvent::SubscriptionReconnected) => {
                        let _ = events.send(Message::SubscriptionReconnected);
                    }
                    Ok(PoolEvent::Client(ClientEvent::NewBlock { height, .. })) => {
                        let _ = events.send(Message::NewBlock { height });
                    }
                    Ok(PoolEvent::Client(ClientEvent::AddressActivity {
                        scripthash,
                        address,
                        status,
                    })) => {
                        let _ = events.send(Message::AddressActivity {
                            scripthash,
                            address,
                            status,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Pool event bridge lagged by {missed} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
