//! Verified Utility Weights (`spec.md` §4.H): dynamic per-domain weight
//! from demand, progress, and verification strength, computed entirely
//! from blockchain data over a lookback window.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::transaction::{Transaction, TxType};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DomainStats {
    pub domain_id: String,
    pub base_weight: f64,
    pub has_synthetic_data: bool,
    pub inference_tasks_completed: u64,
    pub verification_tasks_completed: u64,
    pub optimae_accepted: u64,
    pub optimae_rejected: u64,
    pub total_performance_increment: f64,
}

impl DomainStats {
    fn new(domain_id: String, base_weight: f64, has_synthetic_data: bool) -> Self {
        Self {
            domain_id,
            base_weight,
            has_synthetic_data,
            inference_tasks_completed: 0,
            verification_tasks_completed: 0,
            optimae_accepted: 0,
            optimae_rejected: 0,
            total_performance_increment: 0.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WeightConfig {
    pub lookback_blocks: u64,
    pub demand_smoothing: f64,
    pub progress_cap: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            lookback_blocks: 100,
            demand_smoothing: 0.1,
            progress_cap: 2.0,
        }
    }
}

/// Computes dynamic domain weights from blockchain data. Call
/// [`Self::update_from_block`] for each block in the lookback window,
/// then [`Self::compute_weights`] for the resulting per-domain weights.
pub struct VerifiedUtilityWeights {
    config: WeightConfig,
    stats: HashMap<String, DomainStats>,
}

impl VerifiedUtilityWeights {
    pub fn new(config: WeightConfig) -> Self {
        Self {
            config,
            stats: HashMap::new(),
        }
    }

    pub fn register_domain(&mut self, domain_id: &str, base_weight: f64, has_synthetic_data: bool) {
        self.stats.insert(
            domain_id.to_string(),
            DomainStats::new(domain_id.to_string(), base_weight, has_synthetic_data),
        );
    }

    /// Folds a block's transactions into domain statistics.
    pub fn update_from_block(&mut self, transactions: &[Transaction]) {
        for tx in transactions {
            let Some(domain_id) = &tx.domain_id else { continue };
            let Some(stats) = self.stats.get_mut(domain_id) else { continue };

            match tx.tx_type {
                TxType::TaskCompleted => {
                    match tx.payload.get("task_type").and_then(|v| v.as_str()) {
                        Some("inference_request") => stats.inference_tasks_completed += 1,
                        Some("optimae_verification") => stats.verification_tasks_completed += 1,
                        _ => {}
                    }
                }
                TxType::OptimaeAccepted => {
                    stats.optimae_accepted += 1;
                    let increment = tx.payload.get("increment").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    stats.total_performance_increment += increment.abs();
                }
                TxType::OptimaeRejected => {
                    stats.optimae_rejected += 1;
                }
                _ => {}
            }
        }
    }

    /// `weight = base_weight · demand · (1 + progress) · verification_strength`.
    pub fn compute_weights(&self) -> HashMap<String, f64> {
        if self.stats.is_empty() {
            return HashMap::new();
        }

        let total_inference: u64 = self.stats.values().map(|s| s.inference_tasks_completed).sum();
        let domain_count = self.stats.len() as f64;

        self.stats
            .values()
            .map(|stats| {
                let verification_strength = if stats.has_synthetic_data { 1.0 } else { 0.5 };

                let demand = if total_inference > 0 {
                    stats.inference_tasks_completed as f64 / total_inference as f64
                } else {
                    1.0 / domain_count
                };
                let demand_factor = demand.max(self.config.demand_smoothing);

                let progress_factor = if stats.optimae_accepted > 0 {
                    let avg_increment = stats.total_performance_increment / stats.optimae_accepted as f64;
                    avg_increment.min(self.config.progress_cap)
                } else {
                    0.0
                };

                let weight = stats.base_weight * demand_factor * (1.0 + progress_factor) * verification_strength;
                (stats.domain_id.clone(), weight)
            })
            .collect()
    }

    /// Resets rolling per-block stats, keeping registered domains and
    /// their static configuration (`base_weight`, `has_synthetic_data`).
    pub fn reset_stats(&mut self) {
        for stats in self.stats.values_mut() {
            stats.inference_tasks_completed = 0;
            stats.verification_tasks_completed = 0;
            stats.optimae_accepted = 0;
            stats.optimae_rejected = 0;
            stats.total_performance_increment = 0.0;
        }
    }

    pub fn get_stats(&self, domain_id: &str) -> Option<&DomainStats> {
        self.stats.get(domain_id)
    }

    pub fn domain_count(&self) -> usize {
        self.stats.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_data_domain_gets_full_verification_strength() {
        let mut w = VerifiedUtilityWeights::new(WeightConfig::default());
        w.register_domain("d1", 1.0, true);
        w.register_domain("d2", 1.0, false);
        let weights = w.compute_weights();
        // Equal demand (no inference yet) so the only difference is
        // verification strength: d1 should be exactly 2x d2.
        assert!((weights["d1"] / weights["d2"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn task_completed_transactions_feed_demand_stats() {
        let mut w = VerifiedUtilityWeights::new(WeightConfig::default());
        w.register_domain("d1", 1.0, false);
        let now = chrono::Utc::now();
        let inference_tx = Transaction::new(
            TxType::TaskCompleted,
            Some("d1".into()),
            "eval".into(),
            serde_json::json!({"task_type": "inference_request"}),
            now,
        );
        let verification_tx = Transaction::new(
            TxType::TaskCompleted,
            Some("d1".into()),
            "eval".into(),
            serde_json::json!({"task_type": "optimae_verification"}),
            now,
        );
        w.update_from_block(&[inference_tx, verification_tx]);
        let stats = w.get_stats("d1").unwrap();
        assert_eq!(stats.inference_tasks_completed, 1);
        assert_eq!(stats.verification_tasks_completed, 1);
    }

    #[test]
    fn progress_factor_increases_weight_up_to_cap() {
        let mut w = VerifiedUtilityWeights::new(WeightConfig {
            progress_cap: 1.0,
            ..Default::default()
        });
        w.register_domain("d1", 1.0, true);
        let now = chrono::Utc::now();
        let tx = Transaction::new(
            TxType::OptimaeAccepted,
            Some("d1".into()),
            "opt".into(),
            serde_json::json!({"increment": 5.0}),
            now,
        );
        w.update_from_block(&[tx]);
        let weights = w.compute_weights();
        // progress factor capped at 1.0 -> weight = 1 * 1 * (1+1) * 1 = 2.0
        assert!((weights["d1"] - 2.0).abs() < 1e-9);
    }
}
