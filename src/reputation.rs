//! Reputation tracker (`spec.md` §4.G): asymmetric rewards/penalties,
//! EMA time-decay, fully rebuildable from chain.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction::{Transaction, TxType};

pub const REWARD_OPTIMAE_ACCEPTED: f64 = 1.0;
pub const REWARD_EVAL_COMPLETED: f64 = 0.3;
pub const REWARD_EVAL_AGREED: f64 = 0.1;
pub const PENALTY_OPTIMAE_REJECTED: f64 = 3.0;
pub const PENALTY_EVAL_DIVERGENT: f64 = 2.0;
pub const PENALTY_DOUBLE_SIGN: f64 = 10.0;
pub const MIN_FOR_CONSENSUS: f64 = 2.0;

/// Half-life of the reputation EMA decay: one week.
pub fn default_half_life() -> chrono::Duration {
    chrono::Duration::days(7)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReputationScore {
    pub peer_id: String,
    pub score: f64,
    pub optimae_accepted: u64,
    pub optimae_rejected: u64,
    pub evaluations_completed: u64,
    pub evaluations_divergent: u64,
    pub last_activity: DateTime<Utc>,
}

impl ReputationScore {
    fn new(peer_id: String, now: DateTime<Utc>) -> Self {
        Self {
            peer_id,
            score: 0.0,
            optimae_accepted: 0,
            optimae_rejected: 0,
            evaluations_completed: 0,
            evaluations_divergent: 0,
            last_activity: now,
        }
    }

    pub fn acceptance_rate(&self) -> f64 {
        let total = self.optimae_accepted + self.optimae_rejected;
        if total == 0 {
            0.0
        } else {
            self.optimae_accepted as f64 / total as f64
        }
    }

    pub fn evaluation_accuracy(&self) -> f64 {
        if self.evaluations_completed == 0 {
            0.0
        } else {
            (self.evaluations_completed - self.evaluations_divergent) as f64 / self.evaluations_completed as f64
        }
    }
}

/// Tracks and updates reputation for all peers from on-chain events.
/// Rebuildable from the chain alone (`spec.md` §8 round-trip property).
pub struct ReputationTracker {
    scores: HashMap<String, ReputationScore>,
    half_life: chrono::Duration,
}

impl ReputationTracker {
    pub fn new(half_life: chrono::Duration) -> Self {
        Self {
            scores: HashMap::new(),
            half_life,
        }
    }

    fn entry(&mut self, peer_id: &str, now: DateTime<Utc>) -> &mut ReputationScore {
        self.scores
            .entry(peer_id.to_string())
            .or_insert_with(|| ReputationScore::new(peer_id.to_string(), now))
    }

    /// Decayed score as of `now`, without mutating the tracker.
    pub fn get_score(&self, peer_id: &str, now: DateTime<Utc>) -> f64 {
        match self.scores.get(peer_id) {
            Some(rep) => decayed(rep.score, rep.last_activity, now, self.half_life),
            None => 0.0,
        }
    }

    fn apply_decay(&mut self, peer_id: &str, now: DateTime<Utc>) {
        let half_life = self.half_life;
        let rep = self.entry(peer_id, now);
        rep.score = decayed(rep.score, rep.last_activity, now, half_life);
        rep.last_activity = now;
    }

    pub fn record_optimae_accepted(&mut self, peer_id: &str, now: DateTime<Utc>) {
        self.apply_decay(peer_id, now);
        let rep = self.entry(peer_id, now);
        rep.score += REWARD_OPTIMAE_ACCEPTED;
        rep.optimae_accepted += 1;
        rep.last_activity = now;
    }

    pub fn record_optimae_rejected(&mut self, peer_id: &str, now: DateTime<Utc>) {
        self.apply_decay(peer_id, now);
        let rep = self.entry(peer_id, now);
        rep.score = (rep.score - PENALTY_OPTIMAE_REJECTED).max(0.0);
        rep.optimae_rejected += 1;
        rep.last_activity = now;
    }

    pub fn record_evaluation_completed(&mut self, peer_id: &str, agreed_with_quorum: bool, now: DateTime<Utc>) {
        self.apply_decay(peer_id, now);
        let rep = self.entry(peer_id, now);
        rep.evaluations_completed += 1;
        if agreed_with_quorum {
            rep.score += REWARD_EVAL_COMPLETED + REWARD_EVAL_AGREED;
        } else {
            rep.score = (rep.score - PENALTY_EVAL_DIVERGENT).max(0.0);
            rep.evaluations_divergent += 1;
        }
        rep.last_activity = now;
    }

    /// Slashes reputation for signing blocks on multiple forks.
    pub fn record_double_sign(&mut self, peer_id: &str, now: DateTime<Utc>) {
        let rep = self.entry(peer_id, now);
        rep.score = (rep.score - PENALTY_DOUBLE_SIGN).max(0.0);
        rep.last_activity = now;
    }

    pub fn meets_threshold(&self, peer_id: &str, now: DateTime<Utc>) -> bool {
        self.get_score(peer_id, now) >= MIN_FOR_CONSENSUS
    }

    /// Rebuilds all scores from scratch by replaying chain transactions in
    /// order, producing state byte-equal to sequential live processing
    /// (`spec.md` §8).
    pub fn rebuild_from_chain(&mut self, transactions: &[Transaction]) {
        self.scores.clear();
        for tx in transactions {
            if tx.peer_id.is_empty() {
                continue;
            }
            match tx.tx_type {
                TxType::OptimaeAccepted => self.record_optimae_accepted(&tx.peer_id, tx.timestamp),
                TxType::OptimaeRejected => self.record_optimae_rejected(&tx.peer_id, tx.timestamp),
                TxType::EvaluationServed => {
                    let agreed = tx.payload.get("agreed").and_then(|v| v.as_bool()).unwrap_or(true);
                    self.record_evaluation_completed(&tx.peer_id, agreed, tx.timestamp);
                }
                _ => {}
            }
        }
    }

    pub fn all_scores(&self, now: DateTime<Utc>) -> HashMap<String, f64> {
        self.scores
            .keys()
            .map(|id| (id.clone(), self.get_score(id, now)))
            .collect()
    }

    pub fn top_peers(&self, n: usize, now: DateTime<Utc>) -> Vec<(String, f64)> {
        let mut scores: Vec<(String, f64)> = self.scores.keys().map(|id| (id.clone(), self.get_score(id, now))).collect();
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(n);
        scores
    }
}

fn decayed(score: f64, last_activity: DateTime<Utc>, now: DateTime<Utc>, half_life: chrono::Duration) -> f64 {
    let elapsed = (now - last_activity).num_milliseconds() as f64 / 1000.0;
    let half_life_secs = half_life.num_milliseconds() as f64 / 1000.0;
    if elapsed > 0.0 && half_life_secs > 0.0 {
        score * 0.5_f64.powf(elapsed / half_life_secs)
    } else {
        score
    }
}

/// `reputation_factor` used by the Proof-of-Optimization accumulator
/// (`spec.md` §4.G): `min(1, log(1+rep)/log(1+10))`, `0` if `rep <= 0`.
pub fn reputation_factor(reputation: f64) -> f64 {
    if reputation <= 0.0 {
        return 0.0;
    }
    ((1.0 + reputation).ln() / 11f64.ln()).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_law_matches_half_life() {
        let mut tracker = ReputationTracker::new(chrono::Duration::days(7));
        let t0 = Utc::now();
        tracker.record_optimae_accepted("p1", t0);
        let score_at_t0 = tracker.get_score("p1", t0);

        let later = t0 + chrono::Duration::days(7);
        let decayed_score = tracker.get_score("p1", later);
        assert!((decayed_score - score_at_t0 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn score_never_goes_negative() {
        let mut tracker = ReputationTracker::new(default_half_life());
        let now = Utc::now();
        tracker.record_optimae_rejected("p1", now);
        assert!(tracker.get_score("p1", now) >= 0.0);
    }

    #[test]
    fn rebuild_from_chain_matches_sequential_processing() {
        let now = Utc::now();
        let txs = vec![
            Transaction::new(TxType::OptimaeAccepted, None, "p1".into(), serde_json::json!({}), now),
            Transaction::new(
                TxType::OptimaeRejected,
                None,
                "p1".into(),
                serde_json::json!({}),
                now + chrono::Duration::seconds(1),
            ),
        ];

        let mut live = ReputationTracker::new(default_half_life());
        for tx in &txs {
            match tx.tx_type {
                TxType::OptimaeAccepted => live.record_optimae_accepted(&tx.peer_id, tx.timestamp),
                TxType::OptimaeRejected => live.record_optimae_rejected(&tx.peer_id, tx.timestamp),
                _ => {}
            }
        }

        let mut rebuilt = ReputationTracker::new(default_half_life());
        rebuilt.rebuild_from_chain(&txs);

        let t = now + chrono::Duration::seconds(10);
        assert_eq!(live.get_score("p1", t), rebuilt.get_score("p1", t));
    }

    #[test]
    fn rebuild_from_chain_credits_evaluators_from_evaluation_served() {
        // `EvaluationServed` is the transaction `engine.rs` actually emits per
        // evaluator vote; rebuild must recognize it, not a never-emitted
        // `TaskCompleted`, or replaying the chain would silently drop every
        // evaluator's reputation credit.
        let now = Utc::now();
        let tx = Transaction::new(
            TxType::EvaluationServed,
            Some("d1".into()),
            "eval-1".into(),
            serde_json::json!({"optimae_id": "o1", "agreed": true}),
            now,
        );

        let mut live = ReputationTracker::new(default_half_life());
        live.record_evaluation_completed("eval-1", true, now);

        let mut rebuilt = ReputationTracker::new(default_half_life());
        rebuilt.rebuild_from_chain(&[tx]);

        let t = now + chrono::Duration::seconds(1);
        assert_eq!(live.get_score("eval-1", t), rebuilt.get_score("eval-1", t));
        assert!(rebuilt.get_score("eval-1", t) > 0.0);
    }

    #[test]
    fn reputation_factor_bounds() {
        assert_eq!(reputation_factor(0.0), 0.0);
        assert_eq!(reputation_factor(-1.0), 0.0);
        assert!(reputation_factor(10.0) <= 1.0);
        assert!(reputation_factor(1000.0) <= 1.0);
    }
}
