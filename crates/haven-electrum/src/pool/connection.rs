// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use std::sync::Arc;

use tokio::time::Instant;

use crate::client::ElectrumClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Active,
    Reconnecting,
    Closed,
}

/// A pooled connection. The pool is the sole owner of the client; callers
/// borrow it through a handle for the lifetime of one acquisition.
pub(crate) struct PooledConnection {
    pub id: u64,
    pub client: Arc<ElectrumClient>,
    pub state: ConnectionState,
    pub server_id: i64,
    /// Subscription connection: never handed out by ordinary acquire and
    /// never recycled on release.
    pub dedicated: bool,
    pub created_at: Instant,
    pub last_used: Instant,
    pub last_health_check: Option<Instant>,
    pub use_count: u64,
}

impl PooledConnection {
    pub fn new(id: u64, client: Arc<ElectrumClient>, server_id: i64, dedicated: bool) -> Self {
        let now = Instant::now();
        Self {
            id,
            client,
            state: ConnectionState::Idle,
            server_id,
            dedicated,
            created_at: now,
            last_used: now,
            last_health_check: None,
            use_count: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    pub fn mark_acquired(&mut self) {
        self.state = ConnectionState::Active;
        self.last_used = Instant::now();
        self.use_count += 1;
    }

    pub fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.last_used = Instant::now();
    }
}
