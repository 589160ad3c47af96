//! Dynamic quorum sizing (`spec.md` §4.P): scales `K` with network size,
//! activity, and optimizer reputation.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DynamicQuorumConfig {
    pub base: i64,
    pub min_quorum: i64,
    pub max_quorum_cap: i64,
    /// `(activity_level_threshold, bonus)`, checked in order; first match
    /// wins.
    pub activity_thresholds: Vec<(f64, i64)>,
    /// `(reputation_threshold, discount)`, checked in order; first match
    /// wins.
    pub reputation_thresholds: Vec<(f64, i64)>,
}

impl Default for DynamicQuorumConfig {
    fn default() -> Self {
        Self {
            base: 3,
            min_quorum: 3,
            max_quorum_cap: 15,
            activity_thresholds: vec![(0.75, 3), (0.50, 2), (0.25, 1)],
            reputation_thresholds: vec![(0.9, 2), (0.7, 1)],
        }
    }
}

pub struct DynamicQuorum {
    config: DynamicQuorumConfig,
}

impl DynamicQuorum {
    pub fn new(config: DynamicQuorumConfig) -> Self {
        Self { config }
    }

    /// `K = clamp(base + floor(log2(N_active)) + activity_bonus -
    /// reputation_discount, min_quorum, max_quorum)` where
    /// `max_quorum = max(min_quorum, min(cap, floor(N_active/2)))`.
    /// Returns `min_quorum` when `active_evaluator_count <= 0`.
    pub fn compute_quorum_size(
        &self,
        optimizer_reputation: f64,
        active_evaluator_count: i64,
        domain_activity_level: f64,
    ) -> i64 {
        let cfg = &self.config;
        if active_evaluator_count <= 0 {
            return cfg.min_quorum;
        }

        let max_quorum = cfg.max_quorum_cap.min(active_evaluator_count / 2).max(cfg.min_quorum);

        let log_component = (active_evaluator_count as f64).log2().floor() as i64;
        let activity_bonus = Self::threshold_lookup(&cfg.activity_thresholds, domain_activity_level);
        let reputation_discount = Self::threshold_lookup(&cfg.reputation_thresholds, optimizer_reputation);

        let raw = cfg.base + log_component + activity_bonus - reputation_discount;
        raw.clamp(cfg.min_quorum, max_quorum)
    }

    fn threshold_lookup(thresholds: &[(f64, i64)], value: f64) -> i64 {
        thresholds
            .iter()
            .find(|(threshold, _)| value >= *threshold)
            .map(|(_, bonus)| *bonus)
            .unwrap_or(0)
    }
}
