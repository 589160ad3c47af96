//! Fee market (`spec.md` §4.N): EIP-1559-style base fee adjustment,
//! per-peer rate limiting, a fee-priority mempool, and optimae staking.
//!
//! Grounded on `original_source/.../models/fee_market.py`, shaped with
//! the teacher's validated-constants-table style from
//! `blockchain/chain/src/store/base_fee.rs` and
//! `blockchain/message_pool/src/config.rs`.

use std::collections::{BinaryHeap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MIN_BASE_FEE: f64 = 0.001;
pub const MAX_BASE_FEE: f64 = 100.0;
pub const BASE_FEE_CHANGE_DENOM: u32 = 8;
pub const MEMPOOL_SIZE_LIMIT: usize = 10_000;
pub const OPTIMAE_STAKE_MULTIPLIER: f64 = 5.0;
pub const OPTIMAE_BURN_FRACTION: f64 = 0.2;
pub const RATE_LIMIT_WINDOW_SECONDS: i64 = 60;
pub const RATE_LIMIT_MAX_TX: usize = 20;
pub const RATE_LIMIT_MAX_OPTIMAE: usize = 5;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeeConfig {
    pub min_base_fee: f64,
    pub max_base_fee: f64,
    pub base_fee_change_denom: u32,
    pub target_block_size: u64,
    pub max_block_size: u64,
    pub optimae_stake_multiplier: f64,
    pub optimae_burn_fraction: f64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            min_base_fee: MIN_BASE_FEE,
            max_base_fee: MAX_BASE_FEE,
            base_fee_change_denom: BASE_FEE_CHANGE_DENOM,
            target_block_size: 100,
            max_block_size: 200,
            optimae_stake_multiplier: OPTIMAE_STAKE_MULTIPLIER,
            optimae_burn_fraction: OPTIMAE_BURN_FRACTION,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuggestedFees {
    pub base_fee: f64,
    pub tip: f64,
    pub total: f64,
    pub optimae_stake: f64,
}

#[derive(Clone, Debug)]
struct MempoolEntry {
    fee: f64,
    inserted_at: DateTime<Utc>,
    tx_id: String,
    tx_data: Value,
}

impl PartialEq for MempoolEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fee == other.fee && self.tx_id == other.tx_id
    }
}
impl Eq for MempoolEntry {}

impl PartialOrd for MempoolEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MempoolEntry {
    /// Highest fee first; FIFO (earlier insertion wins) on ties.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fee
            .partial_cmp(&other.fee)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| other.inserted_at.cmp(&self.inserted_at))
    }
}

/// Dynamic fee market and transaction mempool.
pub struct FeeMarket {
    config: FeeConfig,
    base_fee: f64,
    mempool: BinaryHeap<MempoolEntry>,
    rate_tracker: HashMap<String, VecDeque<DateTime<Utc>>>,
    optimae_tracker: HashMap<String, VecDeque<DateTime<Utc>>>,
    staked: HashMap<String, f64>,
    total_burned: f64,
}

impl FeeMarket {
    pub fn new(config: FeeConfig) -> Self {
        let base_fee = config.min_base_fee;
        Self {
            config,
            base_fee,
            mempool: BinaryHeap::new(),
            rate_tracker: HashMap::new(),
            optimae_tracker: HashMap::new(),
            staked: HashMap::new(),
            total_burned: 0.0,
        }
    }

    pub fn base_fee(&self) -> f64 {
        self.base_fee
    }

    pub fn mempool_size(&self) -> usize {
        self.mempool.len()
    }

    pub fn total_burned(&self) -> f64 {
        self.total_burned
    }

    pub fn get_suggested_fee(&self, priority: &str) -> SuggestedFees {
        let base = self.base_fee;
        let tip = match priority {
            "low" => base * 0.1,
            "high" => base * 1.0,
            "urgent" => base * 2.0,
            _ => base * 0.5,
        };
        SuggestedFees {
            base_fee: base,
            tip,
            total: base + tip,
            optimae_stake: base * self.config.optimae_stake_multiplier,
        }
    }

    pub fn validate_fee(&self, fee: f64, is_optimae: bool) -> Result<(), String> {
        if is_optimae {
            let min_fee = self.base_fee * self.config.optimae_stake_multiplier;
            if fee < min_fee {
                return Err(format!("Optimae stake {fee:.6} below minimum {min_fee:.6}"));
            }
        } else if fee < self.base_fee {
            return Err(format!("Fee {fee:.6} below base fee {:.6}", self.base_fee));
        }
        Ok(())
    }

    /// EIP-1559-style adjustment toward a half-full target.
    pub fn adjust_base_fee(&mut self, block_tx_count: u64) -> f64 {
        let target = self.config.target_block_size;
        if block_tx_count == target || target == 0 {
            return self.base_fee;
        }

        if block_tx_count > target {
            let delta = (block_tx_count - target) as f64;
            let change = (self.base_fee * delta / (target as f64 * self.config.base_fee_change_denom as f64)).max(1e-8);
            self.base_fee = (self.base_fee + change).min(self.config.max_base_fee);
        } else {
            let delta = (target - block_tx_count) as f64;
            let change = self.base_fee * delta / (target as f64 * self.config.base_fee_change_denom as f64);
            self.base_fee = (self.base_fee - change).max(self.config.min_base_fee);
        }

        self.base_fee
    }

    pub fn check_rate_limit(&mut self, peer_id: &str, is_optimae: bool, now: DateTime<Utc>) -> Result<(), String> {
        let cutoff = now - Duration::seconds(RATE_LIMIT_WINDOW_SECONDS);
        let (tracker, limit, label) = if is_optimae {
            (&mut self.optimae_tracker, RATE_LIMIT_MAX_OPTIMAE, "optimae")
        } else {
            (&mut self.rate_tracker, RATE_LIMIT_MAX_TX, "transaction")
        };

        let entries = tracker.entry(peer_id.to_string()).or_default();
        while entries.front().is_some_and(|t| *t <= cutoff) {
            entries.pop_front();
        }

        if entries.len() >= limit {
            return Err(format!(
                "Rate limit exceeded: {} {label}s in {RATE_LIMIT_WINDOW_SECONDS}s (limit: {limit})",
                entries.len()
            ));
        }

        entries.push_back(now);
        Ok(())
    }

    /// Adds a transaction to the mempool after fee and rate-limit
    /// validation; evicts the lowest-fee entry if full.
    pub fn add_to_mempool(&mut self, tx_id: String, fee: f64, tx_data: Value, peer_id: &str, is_optimae: bool, now: DateTime<Utc>) -> Result<(), String> {
        self.validate_fee(fee, is_optimae)?;
        if !peer_id.is_empty() {
            self.check_rate_limit(peer_id, is_optimae, now)?;
        }

        if self.mempool.len() >= MEMPOOL_SIZE_LIMIT {
            let worst_fee = self.mempool.iter().map(|e| e.fee).fold(f64::INFINITY, f64::min);
            if fee <= worst_fee {
                return Err("Mempool full and fee too low".to_string());
            }
            let mut entries: Vec<MempoolEntry> = self.mempool.drain().collect();
            entries.sort();
            entries.remove(0);
            self.mempool = entries.into_iter().collect();
        }

        self.mempool.push(MempoolEntry {
            fee,
            inserted_at: now,
            tx_id,
            tx_data,
        });
        Ok(())
    }

    /// Pops up to `max_count` (default `max_block_size`) highest-fee
    /// transactions for inclusion in the next block.
    pub fn get_block_transactions(&mut self, max_count: Option<usize>) -> Vec<(String, f64, Value)> {
        let limit = max_count.unwrap_or(self.config.max_block_size as usize);
        let mut result = Vec::new();
        while result.len() < limit {
            let Some(entry) = self.mempool.pop() else { break };
            result.push((entry.tx_id, entry.fee, entry.tx_data));
        }
        result
    }

    pub fn return_to_mempool(&mut self, transactions: Vec<(String, f64, Value)>, now: DateTime<Utc>) {
        for (tx_id, fee, tx_data) in transactions {
            self.mempool.push(MempoolEntry {
                fee,
                inserted_at: now,
                tx_id,
                tx_data,
            });
        }
    }

    pub fn stake_for_optimae(&mut self, optimae_id: &str, stake: f64) {
        self.staked.insert(optimae_id.to_string(), stake);
    }

    /// Full refund on accept; `optimae_burn_fraction` burned on reject.
    pub fn resolve_optimae(&mut self, optimae_id: &str, accepted: bool) -> f64 {
        let Some(stake) = self.staked.remove(optimae_id) else {
            return 0.0;
        };
        if stake <= 0.0 {
            return 0.0;
        }
        if accepted {
            stake
        } else {
            let burn = stake * self.config.optimae_burn_fraction;
            self.total_burned += burn;
            stake - burn
        }
    }

    pub fn staked_count(&self) -> usize {
        self.staked.len()
    }

    pub fn total_staked(&self) -> f64 {
        self.staked.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn base_fee_increases_when_overfull() {
        let mut fm = FeeMarket::new(FeeConfig::default());
        let before = fm.base_fee();
        fm.adjust_base_fee(150);
        assert!(fm.base_fee() > before);
    }

    #[test]
    fn base_fee_decreases_when_underfull() {
        let mut fm = FeeMarket::new(FeeConfig {
            target_block_size: 100,
            ..Default::default()
        });
        fm.adjust_base_fee(150);
        let after_increase = fm.base_fee();
        fm.adjust_base_fee(50);
        assert!(fm.base_fee() < after_increase);
    }

    #[test]
    fn rate_limit_caps_per_window() {
        let mut fm = FeeMarket::new(FeeConfig::default());
        for i in 0..RATE_LIMIT_MAX_TX {
            fm.check_rate_limit("peer1", false, at(i as i64)).unwrap();
        }
        assert!(fm.check_rate_limit("peer1", false, at(RATE_LIMIT_MAX_TX as i64)).is_err());
    }

    #[test]
    fn mempool_returns_highest_fee_first() {
        let mut fm = FeeMarket::new(FeeConfig::default());
        fm.add_to_mempool("tx-low".into(), 0.01, json!({}), "p1", false, at(0)).unwrap();
        fm.add_to_mempool("tx-high".into(), 0.5, json!({}), "p2", false, at(1)).unwrap();
        let batch = fm.get_block_transactions(None);
        assert_eq!(batch[0].0, "tx-high");
        assert_eq!(batch[1].0, "tx-low");
    }

    #[test]
    fn optimae_stake_refunded_fully_on_accept_partial_on_reject() {
        let mut fm = FeeMarket::new(FeeConfig::default());
        fm.stake_for_optimae("o1", 1.0);
        fm.stake_for_optimae("o2", 1.0);
        assert_eq!(fm.resolve_optimae("o1", true), 1.0);
        assert_eq!(fm.resolve_optimae("o2", false), 0.8);
        assert!((fm.total_burned() - 0.2).abs() < 1e-12);
    }
}
