//! Incentive model (`spec.md` §4.E): maps (reported, verified)
//! performance to a reward fraction in `[0, max_bonus_multiplier]`.

use serde::{Deserialize, Serialize};

const STRUCTURAL_EPSILON: f64 = 1e-10;
const TOLERANCE_GUARD_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IncentiveConfig {
    pub higher_is_better: bool,
    pub tolerance_margin: f64,
    pub bonus_threshold: f64,
    pub min_reward_fraction: f64,
    pub max_bonus_multiplier: f64,
}

impl Default for IncentiveConfig {
    fn default() -> Self {
        Self {
            higher_is_better: true,
            tolerance_margin: 0.10,
            bonus_threshold: 0.05,
            min_reward_fraction: 0.3,
            max_bonus_multiplier: 1.2,
        }
    }
}

fn relative_gap(reported: f64, verified: f64, config: &IncentiveConfig) -> f64 {
    let gap = if config.higher_is_better {
        reported - verified
    } else {
        verified - reported
    };
    let abs_reported = reported.abs();
    if abs_reported > STRUCTURAL_EPSILON {
        gap / abs_reported
    } else {
        gap
    }
}

/// Reward fraction `φ` per `spec.md` §4.E's five-case piecewise function.
pub fn compute_reward_fraction(reported: f64, verified: f64, config: &IncentiveConfig) -> f64 {
    let rel = relative_gap(reported, verified, config);

    if rel < 0.0 {
        let bonus_fraction = rel.abs();
        if bonus_fraction <= config.bonus_threshold {
            let t = if config.bonus_threshold > 0.0 {
                bonus_fraction / config.bonus_threshold
            } else {
                0.0
            };
            return 1.0 + t * (config.max_bonus_multiplier - 1.0);
        }
        return config.max_bonus_multiplier;
    }

    if rel <= STRUCTURAL_EPSILON {
        return 1.0;
    }

    if rel <= config.tolerance_margin + TOLERANCE_GUARD_EPSILON {
        let t = rel / config.tolerance_margin;
        return 1.0 - t * (1.0 - config.min_reward_fraction);
    }

    0.0
}

/// `effective = raw_increment · domain_weight · reputation_factor · φ`
/// — what actually counts toward the PoO threshold.
pub fn compute_effective_increment(
    raw_increment: f64,
    domain_weight: f64,
    reputation_factor: f64,
    reward_fraction: f64,
) -> f64 {
    raw_increment * domain_weight * reputation_factor * reward_fraction
}

#[derive(Clone, Debug, PartialEq)]
pub struct VerificationIncentiveResult {
    pub reward_fraction: f64,
    pub relative_gap: f64,
    pub reported_performance: f64,
    pub verified_performance: f64,
    pub within_tolerance: bool,
    pub effective_increment: f64,
    pub reason: String,
}

impl VerificationIncentiveResult {
    pub fn is_accepted(&self) -> bool {
        self.reward_fraction > 0.0
    }
}

/// Full incentive evaluation for a single verification: reward fraction,
/// diagnostics, and the resulting effective increment.
pub fn evaluate_verification_incentive(
    reported: f64,
    verified: f64,
    raw_increment: f64,
    domain_weight: f64,
    reputation_factor: f64,
    config: &IncentiveConfig,
) -> VerificationIncentiveResult {
    let reward = compute_reward_fraction(reported, verified, config);
    let rel = relative_gap(reported, verified, config);
    let within_tolerance = rel <= config.tolerance_margin + TOLERANCE_GUARD_EPSILON;
    let effective = compute_effective_increment(raw_increment, domain_weight, reputation_factor, reward);

    let reason = if reward == 0.0 {
        format!(
            "rejected: gap {:.2}% exceeds tolerance {:.0}%",
            rel * 100.0,
            config.tolerance_margin * 100.0
        )
    } else if reward < 1.0 {
        format!("partial reward {reward:.2}: gap {:.2}% within tolerance", rel * 100.0)
    } else if reward == 1.0 {
        "full reward: verified matches reported".to_string()
    } else {
        format!("bonus {reward:.2}: verified exceeds reported by {:.2}%", rel.abs() * 100.0)
    };

    VerificationIncentiveResult {
        reward_fraction: reward,
        relative_gap: rel,
        reported_performance: reported,
        verified_performance: verified,
        within_tolerance,
        effective_increment: effective,
        reason,
    }
}
