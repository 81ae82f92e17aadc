// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Per-server health accounting: weighted failure tracking, exponential
//! cooldown with jitter, and a short ring of recent health-check results.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;

use crate::options::BackoffOptions;

pub const MAX_BACKOFF_LEVEL: u8 = 5;
pub const HEALTH_HISTORY_CAPACITY: usize = 20;
const ERROR_TRUNCATE_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Error,
    Disconnect,
}

impl FailureKind {
    /// Timeouts count double toward the failure threshold.
    fn score(self) -> f64 {
        match self {
            Self::Timeout => 2.0,
            Self::Error | Self::Disconnect => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub at: Instant,
    pub success: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    consecutive_failure_score: f64,
    consecutive_successes: u32,
    backoff_level: u8,
    cooldown_until: Option<Instant>,
    weight: f64,
    pub healthy: bool,
    pub last_health_check: Option<Instant>,
    history: VecDeque<HealthCheckResult>,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self {
            total_requests: 0,
            failed_requests: 0,
            consecutive_failure_score: 0.0,
            consecutive_successes: 0,
            backoff_level: 0,
            cooldown_until: None,
            weight: 1.0,
            healthy: true,
            last_health_check: None,
            history: VecDeque::with_capacity(HEALTH_HISTORY_CAPACITY),
        }
    }
}

impl ServerStats {
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn backoff_level(&self) -> u8 {
        self.backoff_level
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        self.cooldown_until
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.map(|until| until > now).unwrap_or(false)
    }

    pub fn remaining_cooldown(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    pub fn history(&self) -> &VecDeque<HealthCheckResult> {
        &self.history
    }

    pub fn record_success(&mut self, options: &BackoffOptions) {
        self.total_requests += 1;
        self.consecutive_failure_score = 0.0;
        // A working server should not sit out its cooldown.
        self.cooldown_until = None;

        self.consecutive_successes += 1;
        if self.consecutive_successes >= options.recovery_threshold {
            self.consecutive_successes = 0;
            if self.backoff_level > 0 {
                self.backoff_level -= 1;
                self.reweight(options);
            }
        }
    }

    pub fn record_failure(&mut self, kind: FailureKind, options: &BackoffOptions) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.consecutive_successes = 0;
        self.consecutive_failure_score += kind.score();

        if self.consecutive_failure_score >= options.failure_threshold {
            self.consecutive_failure_score = 0.0;
            self.backoff_level = (self.backoff_level + 1).min(MAX_BACKOFF_LEVEL);
            self.cooldown_until = Some(Instant::now() + calibrated_delay(self.backoff_level, options));
            self.reweight(options);
        }
    }

    pub fn record_health_check(
        &mut self,
        success: bool,
        latency: Duration,
        error: Option<&str>,
    ) {
        let at = Instant::now();
        self.last_health_check = Some(at);
        if self.history.len() == HEALTH_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(HealthCheckResult {
            at,
            success,
            latency,
            error: error.map(|e| {
                let mut e = e.to_string();
                e.truncate(ERROR_TRUNCATE_LEN);
                e
            }),
        });
    }

    fn reweight(&mut self, options: &BackoffOptions) {
        let weight = 1.0 - f64::from(self.backoff_level) * options.weight_penalty;
        self.weight = weight.clamp(options.min_weight, 1.0);
    }
}

/// `min(base · 2^(level-1), max)` with ±20% jitter so a fleet of pools does
/// not retry a recovering server in lockstep.
fn calibrated_delay(level: u8, options: &BackoffOptions) -> Duration {
    let exponent = level.saturating_sub(1).min(31) as u32;
    let base = options
        .base_delay()
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(options.max_delay());
    let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
    base.mul_f64(1.0 + jitter)
}

/// Read-only view of a server's stats for pool introspection.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatsSnapshot {
    pub server_id: i64,
    pub healthy: bool,
    pub weight: f64,
    pub backoff_level: u8,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub in_cooldown: bool,
    pub remaining_cooldown_ms: u64,
}

impl ServerStatsSnapshot {
    pub fn of(server_id: i64, stats: &ServerStats) -> Self {
        let now = Instant::now();
        Self {
            server_id,
            healthy: stats.healthy,
            weight: stats.weight(),
            backoff_level: stats.backoff_level(),
            total_requests: stats.total_requests,
            failed_requests: stats.failed_requests,
            in_cooldown: stats.in_cooldown(now),
            remaining_cooldown_ms: stats.remaining_cooldown(now).as_millis() as u64,
        }
    }
}
