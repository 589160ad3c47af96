//! Fork choice (`spec.md` §4.K): the canonical chain is the one with the
//! most accumulated verified optimization work, not the longest chain —
//! the Proof-of-Optimization analogue of Bitcoin's most-work rule.
//!
//! Grounded on `original_source/.../consensus/fork_choice.py`'s
//! `ChainScore`/`ForkChoiceRule` pair.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::transaction::{Transaction, TxType};

const INCREMENT_EPSILON: f64 = 1e-10;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChainScore {
    pub tip_hash: String,
    pub height: u64,
    pub cumulative_increment: f64,
    pub optimae_accepted_count: u64,
    pub is_checkpoint_consistent: bool,
}

impl ChainScore {
    /// Ranking key: checkpoint-consistent chains always beat inconsistent
    /// ones; then higher cumulative increment; then more accepted
    /// optimae; then, deterministically, the *lower* tip hash.
    fn rank_better_than(&self, other: &ChainScore) -> Ordering {
        if self.is_checkpoint_consistent != other.is_checkpoint_consistent {
            return self.is_checkpoint_consistent.cmp(&other.is_checkpoint_consistent);
        }
        if (self.cumulative_increment - other.cumulative_increment).abs() > INCREMENT_EPSILON {
            return self
                .cumulative_increment
                .partial_cmp(&other.cumulative_increment)
                .unwrap_or(Ordering::Equal);
        }
        if self.optimae_accepted_count != other.optimae_accepted_count {
            return self.optimae_accepted_count.cmp(&other.optimae_accepted_count);
        }
        // Lower hash wins, so it must rank as "greater" here.
        other.tip_hash.cmp(&self.tip_hash)
    }
}

pub struct ScoredBlock<'a> {
    pub height: u64,
    pub hash: &'a str,
    pub transactions: &'a [Transaction],
}

/// Selects the canonical chain from competing forks.
pub struct ForkChoiceRule {
    candidates: HashMap<String, ChainScore>,
}

impl Default for ForkChoiceRule {
    fn default() -> Self {
        Self::new()
    }
}

impl ForkChoiceRule {
    pub fn new() -> Self {
        Self {
            candidates: HashMap::new(),
        }
    }

    /// Scores one fork from its blocks in height order.
    pub fn score_chain(
        &mut self,
        tip_hash: &str,
        height: u64,
        blocks: &[ScoredBlock<'_>],
        finalized_height: Option<u64>,
        finalized_hash: Option<&str>,
    ) -> ChainScore {
        let mut cumulative = 0.0;
        let mut accepted_count = 0;
        let mut checkpoint_consistent = true;

        for block in blocks {
            if let (Some(f_height), Some(f_hash)) = (finalized_height, finalized_hash) {
                if block.height == f_height && block.hash != f_hash {
                    checkpoint_consistent = false;
                }
            }

            for tx in block.transactions {
                if tx.tx_type == TxType::OptimaeAccepted {
                    accepted_count += 1;
                    let increment = tx.payload.get("effective_increment").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    cumulative += increment.abs();
                }
            }
        }

        let score = ChainScore {
            tip_hash: tip_hash.to_string(),
            height,
            cumulative_increment: cumulative,
            optimae_accepted_count: accepted_count,
            is_checkpoint_consistent: checkpoint_consistent,
        };
        self.candidates.insert(tip_hash.to_string(), score.clone());
        score
    }

    /// The best-scored candidate currently known, if any.
    pub fn select_best(&self) -> Option<&ChainScore> {
        self.candidates
            .values()
            .max_by(|a, b| a.rank_better_than(b))
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accepted_tx(increment: f64) -> Transaction {
        Transaction::new(
            TxType::OptimaeAccepted,
            Some("d1".into()),
            "opt".into(),
            json!({"effective_increment": increment}),
            chrono::Utc::now(),
        )
    }

    #[test]
    fn higher_cumulative_increment_wins() {
        let mut rule = ForkChoiceRule::new();
        let tx_a = vec![accepted_tx(5.0)];
        let tx_b = vec![accepted_tx(1.0)];
        rule.score_chain("a", 10, &[ScoredBlock { height: 10, hash: "a", transactions: &tx_a }], None, None);
        rule.score_chain("b", 10, &[ScoredBlock { height: 10, hash: "b", transactions: &tx_b }], None, None);
        assert_eq!(rule.select_best().unwrap().tip_hash, "a");
    }

    #[test]
    fn checkpoint_inconsistent_chain_always_loses() {
        let mut rule = ForkChoiceRule::new();
        let tx_a = vec![accepted_tx(100.0)];
        let tx_b = vec![accepted_tx(1.0)];
        rule.score_chain("a", 10, &[ScoredBlock { height: 5, hash: "wrong", transactions: &tx_a }], Some(5), Some("right"));
        rule.score_chain("b", 10, &[ScoredBlock { height: 5, hash: "right", transactions: &tx_b }], Some(5), Some("right"));
        assert_eq!(rule.select_best().unwrap().tip_hash, "b");
    }

    #[test]
    fn tie_breaks_on_lower_hash() {
        let mut rule = ForkChoiceRule::new();
        rule.score_chain("zzz", 1, &[], None, None);
        rule.score_chain("aaa", 1, &[], None, None);
        assert_eq!(rule.select_best().unwrap().tip_hash, "aaa");
    }

    #[test]
    fn empty_candidates_select_none() {
        let rule = ForkChoiceRule::new();
        assert!(rule.select_best().is_none());
    }
}
