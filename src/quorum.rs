//! Quorum engine (`spec.md` §4.F): deterministic K-of-N evaluator
//! selection, vote intake, and the median-based acceptance decision.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::hashing::sha256_hex;

const STRUCTURAL_EPSILON: f64 = 1e-10;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuorumConfig {
    pub min_evaluators: usize,
    pub quorum_fraction: f64,
    pub tolerance: f64,
    pub max_wait_seconds: f64,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            min_evaluators: 3,
            quorum_fraction: 0.67,
            tolerance: 0.05,
            max_wait_seconds: 3600.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VerificationVote {
    pub evaluator_id: String,
    pub verified_performance: f64,
    pub used_synthetic: bool,
    pub synthetic_data_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuorumState {
    pub optimae_id: String,
    pub domain_id: String,
    pub optimizer_id: String,
    pub reported_performance: f64,
    pub required_evaluators: Vec<String>,
    pub votes: Vec<VerificationVote>,
    pub decided: bool,
    pub accepted: bool,
    pub median_performance: Option<f64>,
}

impl QuorumState {
    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn has_quorum(&self) -> bool {
        !self.required_evaluators.is_empty() && self.vote_count() >= self.required_evaluators.len()
    }

    fn voter_ids(&self) -> HashSet<&str> {
        self.votes.iter().map(|v| v.evaluator_id.as_str()).collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuorumResult {
    pub accepted: bool,
    pub reason: String,
    pub median_performance: Option<f64>,
    pub reported_performance: Option<f64>,
    pub report_divergence: Option<f64>,
    pub agree_fraction: Option<f64>,
    pub agreements: HashMap<String, bool>,
}

/// Manages quorum-based verification for optimae. Selection is
/// deterministic; votes are collected until quorum, then decided once.
pub struct QuorumManager {
    config: QuorumConfig,
    pending: HashMap<String, QuorumState>,
}

impl QuorumManager {
    pub fn new(config: QuorumConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
        }
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    /// Deterministically selects `K = min(min_evaluators, |candidates|)`
    /// evaluators, excluding the optimizer, seeded by
    /// `chain_tip_hash:optimae_id`.
    pub fn select_evaluators(
        &mut self,
        optimae_id: &str,
        domain_id: &str,
        optimizer_id: &str,
        reported_performance: f64,
        eligible_evaluators: &[String],
        chain_tip_hash: &str,
    ) -> Vec<String> {
        let candidates: Vec<&String> = eligible_evaluators.iter().filter(|e| e.as_str() != optimizer_id).collect();
        if candidates.is_empty() {
            return vec![];
        }

        let k = self.config.min_evaluators.min(candidates.len());
        let seed = sha256_hex(format!("{chain_tip_hash}:{optimae_id}").as_bytes());

        let mut scored: Vec<(String, String)> = candidates
            .into_iter()
            .map(|c| (sha256_hex(format!("{seed}:{c}").as_bytes()), c.clone()))
            .collect();
        scored.sort();

        let selected: Vec<String> = scored.into_iter().take(k).map(|(_, c)| c).collect();

        self.pending.insert(
            optimae_id.to_string(),
            QuorumState {
                optimae_id: optimae_id.to_string(),
                domain_id: domain_id.to_string(),
                optimizer_id: optimizer_id.to_string(),
                reported_performance,
                required_evaluators: selected.clone(),
                votes: vec![],
                decided: false,
                accepted: false,
                median_performance: None,
            },
        );

        selected
    }

    /// Adds an evaluator's vote. Returns `Some` once quorum is reached.
    pub fn add_vote(
        &mut self,
        optimae_id: &str,
        evaluator_id: &str,
        verified_performance: f64,
        used_synthetic: bool,
        synthetic_data_hash: String,
    ) -> Option<&QuorumState> {
        let state = self.pending.get_mut(optimae_id)?;
        if state.decided {
            return None;
        }
        if !state.required_evaluators.iter().any(|e| e == evaluator_id) {
            return None;
        }
        if state.voter_ids().contains(evaluator_id) {
            return None;
        }

        state.votes.push(VerificationVote {
            evaluator_id: evaluator_id.to_string(),
            verified_performance,
            used_synthetic,
            synthetic_data_hash,
        });

        if state.has_quorum() {
            Some(&*state)
        } else {
            None
        }
    }

    /// Decides accept/reject for `optimae_id`'s quorum.
    pub fn evaluate_quorum(&mut self, optimae_id: &str) -> QuorumResult {
        let Some(state) = self.pending.get_mut(optimae_id) else {
            return QuorumResult {
                accepted: false,
                reason: "not found".to_string(),
                median_performance: None,
                reported_performance: None,
                report_divergence: None,
                agree_fraction: None,
                agreements: HashMap::new(),
            };
        };

        if state.votes.is_empty() {
            return QuorumResult {
                accepted: false,
                reason: "no votes".to_string(),
                median_performance: None,
                reported_performance: Some(state.reported_performance),
                report_divergence: None,
                agree_fraction: None,
                agreements: HashMap::new(),
            };
        }

        let mut performances: Vec<f64> = state.votes.iter().map(|v| v.verified_performance).collect();
        let median_perf = median(&mut performances);
        state.median_performance = Some(median_perf);

        let divergence = |value: f64| -> f64 {
            if median_perf.abs() > STRUCTURAL_EPSILON {
                (value - median_perf).abs() / median_perf.abs()
            } else {
                (value - median_perf).abs()
            }
        };

        let tolerance = self.config.tolerance;
        let mut agreements = HashMap::new();
        for vote in &state.votes {
            agreements.insert(vote.evaluator_id.clone(), divergence(vote.verified_performance) <= tolerance);
        }
        let agree_count = agreements.values().filter(|a| **a).count();
        let agree_fraction = agree_count as f64 / state.votes.len() as f64;

        let report_divergence = divergence(state.reported_performance);
        let report_matches = report_divergence <= tolerance;
        let quorum_met = agree_fraction >= self.config.quorum_fraction;
        let accepted = quorum_met && report_matches;

        state.decided = true;
        state.accepted = accepted;

        let reason = if accepted {
            "accepted".to_string()
        } else if !quorum_met {
            format!(
                "quorum disagreement ({} < {})",
                format_percent(agree_fraction, 0),
                format_percent(self.config.quorum_fraction, 0)
            )
        } else {
            format!(
                "report diverges from median ({} > {})",
                format_percent(report_divergence, 2),
                format_percent(tolerance, 0)
            )
        };

        QuorumResult {
            accepted,
            reason,
            median_performance: Some(median_perf),
            reported_performance: Some(state.reported_performance),
            report_divergence: Some(report_divergence),
            agree_fraction: Some(agree_fraction),
            agreements,
        }
    }

    pub fn get_state(&self, optimae_id: &str) -> Option<&QuorumState> {
        self.pending.get(optimae_id)
    }

    pub fn cleanup_decided(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, s| !s.decided);
        before - self.pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().filter(|s| !s.decided).count()
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

fn format_percent(value: f64, decimals: usize) -> String {
    format!("{:.*}%", decimals, value * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimizer_never_selected() {
        let mut mgr = QuorumManager::new(QuorumConfig::default());
        let eligible: Vec<String> = vec!["opt".into(), "e1".into(), "e2".into(), "e3".into()];
        let selected = mgr.select_evaluators("optimae-1", "d", "opt", 0.5, &eligible, "tip");
        assert!(!selected.contains(&"opt".to_string()));
    }

    #[test]
    fn selection_is_deterministic() {
        let eligible: Vec<String> = vec!["e1".into(), "e2".into(), "e3".into(), "e4".into()];
        let mut a = QuorumManager::new(QuorumConfig::default());
        let mut b = QuorumManager::new(QuorumConfig::default());
        let sel_a = a.select_evaluators("oid", "d", "opt", 0.5, &eligible, "tip");
        let sel_b = b.select_evaluators("oid", "d", "opt", 0.5, &eligible, "tip");
        assert_eq!(sel_a, sel_b);
    }

    #[test]
    fn divergent_outlier_is_rejected() {
        // spec.md §8 scenario 3.
        let mut mgr = QuorumManager::new(QuorumConfig {
            min_evaluators: 3,
            quorum_fraction: 0.67,
            tolerance: 0.05,
            max_wait_seconds: 3600.0,
        });
        let eligible: Vec<String> = vec!["e1".into(), "e2".into(), "e3".into()];
        mgr.select_evaluators("oid", "d", "opt", -0.50, &eligible, "tip");
        mgr.add_vote("oid", "e1", -0.50, true, "h1".into());
        mgr.add_vote("oid", "e2", -0.51, true, "h2".into());
        mgr.add_vote("oid", "e3", -10.0, true, "h3".into());

        let result = mgr.evaluate_quorum("oid");
        assert!(!result.accepted);
        assert_eq!(result.agreements.get("e3"), Some(&false));
        assert!(result.reason.contains("quorum disagreement"));
    }

    #[test]
    fn not_found_and_no_votes_reasons() {
        let mut mgr = QuorumManager::new(QuorumConfig::default());
        assert_eq!(mgr.evaluate_quorum("missing").reason, "not found");

        let eligible: Vec<String> = vec!["e1".into(), "e2".into(), "e3".into()];
        mgr.select_evaluators("oid", "d", "opt", 0.5, &eligible, "tip");
        assert_eq!(mgr.evaluate_quorum("oid").reason, "no votes");
    }

    #[test]
    fn duplicate_vote_rejected() {
        let mut mgr = QuorumManager::new(QuorumConfig::default());
        let eligible: Vec<String> = vec!["e1".into(), "e2".into(), "e3".into()];
        mgr.select_evaluators("oid", "d", "opt", 0.5, &eligible, "tip");
        mgr.add_vote("oid", "e1", 0.5, true, "h".into());
        assert!(mgr.add_vote("oid", "e1", 0.6, true, "h2".into()).is_none());
        assert_eq!(mgr.get_state("oid").unwrap().vote_count(), 1);
    }
}
