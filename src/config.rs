//! Crate-wide configuration (`spec.md` §6 "Configuration (enumerated)").
//!
//! One aggregate matching the enumerated tree exactly, with a validated
//! constructor in the teacher's `MpoolConfig::new` style
//! (`blockchain/message_pool/src/config.rs`) and TOML load/save helpers.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channels::ChannelConfig;
use crate::dynamic_quorum::DynamicQuorumConfig;
use crate::fee_market::FeeConfig;
use crate::incentives::IncentiveConfig;
use crate::quorum::QuorumConfig;
use crate::weights::WeightConfig;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReputationConfig {
    pub half_life_seconds: i64,
    pub min_for_consensus: f64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            half_life_seconds: 7 * 24 * 60 * 60,
            min_for_consensus: crate::reputation::MIN_FOR_CONSENSUS,
        }
    }
}

impl ReputationConfig {
    pub fn half_life(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.half_life_seconds)
    }
}

/// Top-level configuration tree. Mirrors `spec.md` §6 field for field;
/// every sub-table is its owning module's own config type so a single
/// source of truth backs both validation and (de)serialization.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub target_block_time: f64,
    pub epoch_length: u64,
    pub confirmation_depth: u64,
    pub anchor_interval: u64,
    pub quorum: QuorumConfig,
    pub dynamic_quorum: DynamicQuorumConfig,
    pub incentives: IncentiveConfig,
    pub fees: FeeConfig,
    pub channels: ChannelConfig,
    pub reputation: ReputationConfig,
    pub weights: WeightConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_block_time: crate::difficulty::DEFAULT_TARGET_BLOCK_TIME,
            epoch_length: crate::difficulty::DEFAULT_EPOCH_LENGTH,
            confirmation_depth: 6,
            anchor_interval: 1000,
            quorum: QuorumConfig::default(),
            dynamic_quorum: DynamicQuorumConfig::default(),
            incentives: IncentiveConfig::default(),
            fees: FeeConfig::default(),
            channels: ChannelConfig::default(),
            reputation: ReputationConfig::default(),
            weights: WeightConfig::default(),
        }
    }
}

impl Config {
    /// Builds a config from `Default`, rejecting nonsensical values the
    /// way the teacher's `MpoolConfig::new` rejects an invalid
    /// `replace_by_fee_ratio`.
    pub fn new(overrides: Config) -> Result<Self, String> {
        overrides.validate()?;
        Ok(overrides)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.target_block_time <= 0.0 {
            return Err(format!("target_block_time must be positive, got {}", self.target_block_time));
        }
        if self.epoch_length == 0 {
            return Err("epoch_length must be at least 1".to_string());
        }
        if self.quorum.min_evaluators == 0 {
            return Err("quorum.min_evaluators must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.quorum.quorum_fraction) {
            return Err(format!(
                "quorum.quorum_fraction must be within [0, 1], got {}",
                self.quorum.quorum_fraction
            ));
        }
        if self.dynamic_quorum.min_quorum <= 0 {
            return Err("dynamic_quorum.min_quorum must be positive".to_string());
        }
        if self.incentives.tolerance_margin <= 0.0 {
            return Err("incentives.tolerance_margin must be positive".to_string());
        }
        if self.fees.min_base_fee <= 0.0 || self.fees.max_base_fee < self.fees.min_base_fee {
            return Err("fees.min_base_fee must be positive and at most max_base_fee".to_string());
        }
        if self.channels.min_deposit <= 0.0 || self.channels.max_deposit < self.channels.min_deposit {
            return Err("channels.min_deposit must be positive and at most max_deposit".to_string());
        }
        if self.reputation.half_life_seconds <= 0 {
            return Err("reputation.half_life_seconds must be positive".to_string());
        }
        if self.weights.lookback_blocks == 0 {
            return Err("weights.lookback_blocks must be at least 1".to_string());
        }
        Ok(())
    }

    /// Loads config from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| format!("could not read config {}: {e}", path.as_ref().display()))?;
        let config: Config = toml::from_str(&text).map_err(|e| format!("could not parse config {}: {e}", path.as_ref().display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), String> {
        let text = toml::to_string_pretty(self).map_err(|e| format!("could not serialize config: {e}"))?;
        fs::write(path.as_ref(), text).map_err(|e| format!("could not write config {}: {e}", path.as_ref().display()))
    }
}
