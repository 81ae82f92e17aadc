// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

//! Server selection.
//!
//! Candidates arrive enabled-filtered and priority-sorted. Servers in
//! cooldown are excluded; when every server is cooling down, the one
//! closest to recovery is used as a last resort.

use std::time::Duration;

use crate::options::LoadBalancingStrategy;

/// Weighted round-robin walks the cumulative weight space with a
/// golden-ratio stride: proportional selection without bursts.
const GOLDEN_RATIO_CONJUGATE: f64 = 0.618_033_988_749_894_8;

#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub server_id: i64,
    pub weight: f64,
    pub active_connections: usize,
    pub in_cooldown: bool,
    pub remaining_cooldown: Duration,
}

pub(crate) fn select(
    strategy: LoadBalancingStrategy,
    candidates: &[Candidate],
    rr_cursor: &mut f64,
) -> Option<i64> {
    if candidates.is_empty() {
        return None;
    }

    let available: Vec<&Candidate> = candidates.iter().filter(|c| !c.in_cooldown).collect();
    if available.is_empty() {
        return candidates
            .iter()
            .min_by_key(|c| c.remaining_cooldown)
            .map(|c| c.server_id);
    }

    match strategy {
        LoadBalancingStrategy::FailoverOnly => available.first().map(|c| c.server_id),
        LoadBalancingStrategy::LeastConnections => available
            .iter()
            .max_by(|a, b| {
                score(a)
                    .partial_cmp(&score(b))
                    .unwrap_or(core::cmp::Ordering::Equal)
            })
            .map(|c| c.server_id),
        LoadBalancingStrategy::RoundRobin => {
            let total: f64 = available.iter().map(|c| c.weight).sum();
            if total <= 0.0 {
                return available.first().map(|c| c.server_id);
            }
            *rr_cursor = (*rr_cursor + GOLDEN_RATIO_CONJUGATE).fract();
            let point = *rr_cursor * total;
            let mut cumulative = 0.0;
            for candidate in &available {
                cumulative += candidate.weight;
                if point < cumulative {
                    return Some(candidate.server_id);
                }
            }
            available.last().map(|c| c.server_id)
        }
    }
}

fn score(candidate: &Candidate) -> f64 {
    10.0 * candidate.weight - candidate.active_connections as f64
}

#[cfg(test)]
mod test {
    use super::*;

    fn candidate(server_id: i64, weight: f64) -> Candidate {
        Candidate {
            server_id,
            weight,
            active_connections: 0,
            in_cooldown: false,
            remaining_cooldown: Duration::ZERO,
        }
    }

    #[test]
    fn failover_prefers_the_first_available() {
        let mut cursor = 0.0;
        let mut candidates = vec![candidate(1, 1.0), candidate(2, 1.0), candidate(3, 1.0)];
        assert_eq!(
            select(LoadBalancingStrategy::FailoverOnly, &candidates, &mut cursor),
            Some(1)
        );

        candidates[0].in_cooldown = true;
        assert_eq!(
            select(LoadBalancingStrategy::FailoverOnly, &candidates, &mut cursor),
            Some(2)
        );
    }

    #[test]
    fn least_connections_balances_weight_against_load() {
        let mut cursor = 0.0;
        let mut candidates = vec![candidate(1, 1.0), candidate(2, 1.0)];
        candidates[0].active_connections = 3;
        assert_eq!(
            select(
                LoadBalancingStrategy::LeastConnections,
                &candidates,
                &mut cursor
            ),
            Some(2)
        );

        // A heavy penalty outweighs a few connections.
        candidates[1].weight = 0.1;
        assert_eq!(
            select(
                LoadBalancingStrategy::LeastConnections,
                &candidates,
                &mut cursor
            ),
            Some(1)
        );
    }

    #[test]
    fn round_robin_is_proportional() {
        let mut cursor = 0.0;
        let candidates = vec![candidate(1, 1.0), candidate(2, 1.0), candidate(3, 1.0)];
        let mut counts = [0usize; 3];
        for _ in 0..300 {
            let picked = select(LoadBalancingStrategy::RoundRobin, &candidates, &mut cursor).unwrap();
            counts[(picked - 1) as usize] += 1;
        }
        for count in counts {
            assert!((90..=110).contains(&count), "counts: {counts:?}");
        }
    }

    #[test]
    fn round_robin_respects_weights() {
        let mut cursor = 0.0;
        let candidates = vec![candidate(1, 1.0), candidate(2, 0.1)];
        let mut first = 0usize;
        for _ in 0..1_000 {
            if select(LoadBalancingStrategy::RoundRobin, &candidates, &mut cursor) == Some(1) {
                first += 1;
            }
        }
        // ~91% of the cumulative weight space belongs to server 1.
        assert!(first > 850, "server 1 picked {first} times");
    }

    #[test]
    fn full_cooldown_falls_back_to_shortest_remaining() {
        let mut cursor = 0.0;
        let mut candidates = vec![candidate(1, 1.0), candidate(2, 1.0)];
        for (c, secs) in candidates.iter_mut().zip([30u64, 5]) {
            c.in_cooldown = true;
            c.remaining_cooldown = Duration::from_secs(secs);
        }
        for strategy in [
            LoadBalancingStrategy::RoundRobin,
            LoadBalancingStrategy::LeastConnections,
            LoadBalancingStrategy::FailoverOnly,
        ] {
            assert_eq!(select(strategy, &candidates, &mut cursor), Some(2));
        }
    }

    #[test]
    fn no_candidates_means_no_selection() {
        let mut cursor = 0.0;
        assert_eq!(
            select(LoadBalancingStrategy::RoundRobin, &[], &mut cursor),
            None
        );
    }
}
