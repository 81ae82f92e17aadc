// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Pool and backoff tunables.
//!
//! Both shapes deserialize from the camelCase node-config JSON kept in the
//! store, with every field optional.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    FailoverOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolOptions {
    pub enabled: bool,
    pub min_connections: usize,
    pub max_connections: usize,
    pub load_balancing: LoadBalancingStrategy,
    pub connection_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub acquisition_timeout_ms: u64,
    pub max_waiting_requests: usize,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    /// Some Electrum servers drop idle sockets around 30 s; lower this if a
    /// deployment keeps losing idle connections.
    pub keepalive_interval_ms: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            min_connections: 1,
            max_connections: 5,
            load_balancing: LoadBalancingStrategy::default(),
            connection_timeout_ms: 10_000,
            idle_timeout_ms: 300_000,
            health_check_interval_ms: 30_000,
            acquisition_timeout_ms: 5_000,
            max_waiting_requests: 100,
            max_reconnect_attempts: 3,
            reconnect_delay_ms: 1_000,
            keepalive_interval_ms: 15_000,
        }
    }
}

impl PoolOptions {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.acquisition_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffOptions {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Weighted consecutive failures before a server enters cooldown;
    /// timeouts count double.
    pub failure_threshold: f64,
    pub recovery_threshold: u32,
    pub weight_penalty: f64,
    pub min_weight: f64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base_delay_ms: 30_000,
            max_delay_ms: 300_000,
            failure_threshold: 2.0,
            recovery_threshold: 3,
            weight_penalty: 0.3,
            min_weight: 0.1,
        }
    }
}

impl BackoffOptions {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_documented_config() {
        let options = PoolOptions::default();
        assert!(options.enabled);
        assert_eq!(options.min_connections, 1);
        assert_eq!(options.max_connections, 5);
        assert_eq!(options.load_balancing, LoadBalancingStrategy::RoundRobin);
        assert_eq!(options.connection_timeout_ms, 10_000);
        assert_eq!(options.idle_timeout_ms, 300_000);
        assert_eq!(options.health_check_interval_ms, 30_000);
        assert_eq!(options.acquisition_timeout_ms, 5_000);
        assert_eq!(options.max_waiting_requests, 100);
        assert_eq!(options.max_reconnect_attempts, 3);
        assert_eq!(options.reconnect_delay_ms, 1_000);
        assert_eq!(options.keepalive_interval_ms, 15_000);

        let backoff = BackoffOptions::default();
        assert_eq!(backoff.base_delay_ms, 30_000);
        assert_eq!(backoff.max_delay_ms, 300_000);
        assert_eq!(backoff.failure_threshold, 2.0);
        assert_eq!(backoff.recovery_threshold, 3);
        assert_eq!(backoff.weight_penalty, 0.3);
        assert_eq!(backoff.min_weight, 0.1);
    }

    #[test]
    fn camel_case_keys_partially_override_defaults() {
        let options: PoolOptions = serde_json::from_str(
            r#"{"maxConnections": 8, "loadBalancing": "least_connections", "keepaliveIntervalMs": 5000}"#,
        )
        .unwrap();
        assert_eq!(options.max_connections, 8);
        assert_eq!(
            options.load_balancing,
            LoadBalancingStrategy::LeastConnections
        );
        assert_eq!(options.keepalive_interval_ms, 5_000);
        assert_eq!(options.min_connections, 1);

        let backoff: BackoffOptions =
            serde_json::from_str(r#"{"weightPenalty": 0.5, "failureThreshold": 3}"#).unwrap();
        assert_eq!(backoff.weight_penalty, 0.5);
        assert_eq!(backoff.failure_threshold, 3.0);
        assert_eq!(backoff.min_weight, 0.1);
    }
}
