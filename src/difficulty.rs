//! Difficulty controller (`spec.md` §4.I): two-level (epoch + per-block
//! EMA) threshold adjustment, bounded swings.
//!
//! Grounded on the hybrid Bitcoin/Ethereum scheme in
//! `original_source/.../consensus/difficulty.py`, following the Rust
//! teacher's constants-table-plus-clamped-adjustment shape used for
//! `compute_next_base_fee` (`blockchain/chain/src/store/base_fee.rs`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TARGET_BLOCK_TIME: f64 = 600.0;
pub const DEFAULT_EPOCH_LENGTH: u64 = 100;
pub const MAX_ADJUSTMENT_FACTOR: f64 = 4.0;
pub const EMA_ALPHA: f64 = 0.1;
pub const MIN_THRESHOLD: f64 = 1e-6;
pub const MAX_THRESHOLD: f64 = 1e9;
pub const PER_BLOCK_CORRECTION_LIMIT: f64 = 0.02;

fn to_unix_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + ts.timestamp_subsec_nanos() as f64 / 1e9
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DifficultyState {
    pub current_threshold: f64,
    pub target_block_time: f64,
    pub epoch_start_index: u64,
    pub epoch_start_time: f64,
    pub ema_block_time: f64,
    pub last_block_time: f64,
    pub blocks_in_epoch: u64,
    pub total_adjustments: u64,
}

/// Controls the Proof-of-Optimization threshold to maintain the target
/// block time.
pub struct DifficultyController {
    epoch_length: u64,
    state: DifficultyState,
}

impl DifficultyController {
    pub fn new(target_block_time: f64, initial_threshold: f64, epoch_length: u64, start: DateTime<Utc>) -> Self {
        let now = to_unix_seconds(start);
        Self {
            epoch_length,
            state: DifficultyState {
                current_threshold: initial_threshold,
                target_block_time,
                epoch_start_index: 0,
                epoch_start_time: now,
                ema_block_time: target_block_time,
                last_block_time: now,
                blocks_in_epoch: 0,
                total_adjustments: 0,
            },
        }
    }

    pub fn threshold(&self) -> f64 {
        self.state.current_threshold
    }

    pub fn ema_block_time(&self) -> f64 {
        self.state.ema_block_time
    }

    pub fn target_block_time(&self) -> f64 {
        self.state.target_block_time
    }

    pub fn state(&self) -> &DifficultyState {
        &self.state
    }

    /// Processes a new block and returns the updated threshold. Call
    /// after every block is appended to the chain.
    pub fn on_new_block(&mut self, block_index: u64, block_timestamp: DateTime<Utc>) -> f64 {
        let now = to_unix_seconds(block_timestamp);
        let elapsed = (now - self.state.last_block_time).max(0.001);

        self.state.ema_block_time = EMA_ALPHA * elapsed + (1.0 - EMA_ALPHA) * self.state.ema_block_time;

        self.apply_per_block_correction();

        self.state.blocks_in_epoch += 1;
        self.state.last_block_time = now;
        let _ = block_index;

        if self.state.blocks_in_epoch >= self.epoch_length {
            self.epoch_adjustment(now);
        }

        self.state.current_threshold
    }

    fn apply_per_block_correction(&mut self) {
        if self.state.ema_block_time <= 0.0 {
            return;
        }
        let ratio = self.state.target_block_time / self.state.ema_block_time;
        let correction = (ratio - 1.0).clamp(-PER_BLOCK_CORRECTION_LIMIT, PER_BLOCK_CORRECTION_LIMIT);
        self.state.current_threshold *= 1.0 + correction;
        self.clamp_threshold();
    }

    fn epoch_adjustment(&mut self, now: f64) {
        let actual_epoch_time = now - self.state.epoch_start_time;
        let target_epoch_time = self.epoch_length as f64 * self.state.target_block_time;

        if actual_epoch_time <= 0.0 || target_epoch_time <= 0.0 {
            self.reset_epoch(now);
            return;
        }

        let ratio = (target_epoch_time / actual_epoch_time).clamp(1.0 / MAX_ADJUSTMENT_FACTOR, MAX_ADJUSTMENT_FACTOR);
        self.state.current_threshold *= ratio;
        self.clamp_threshold();
        self.state.total_adjustments += 1;
        self.reset_epoch(now);
    }

    fn reset_epoch(&mut self, now: f64) {
        self.state.epoch_start_time = now;
        self.state.blocks_in_epoch = 0;
    }

    fn clamp_threshold(&mut self) {
        self.state.current_threshold = self.state.current_threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD);
    }
}
