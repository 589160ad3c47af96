//! Bounds & resource validator (`spec.md` §4.D).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resource caps checked before dispatch to evaluators to prevent
/// adversarial resource exhaustion.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    pub max_training_seconds: f64,
    pub max_memory_mb: f64,
    pub max_epochs: u64,
    pub max_batch_size: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_training_seconds: 3600.0,
            max_memory_mb: 8192.0,
            max_epochs: 5000,
            max_batch_size: 512,
        }
    }
}

/// Validates hyperparameters against configured per-name `(low, high)`
/// bounds. Unknown or non-numeric keys are skipped — plugins may use
/// domain-specific types.
#[derive(Default)]
pub struct BoundsValidator {
    bounds: HashMap<String, (f64, f64)>,
}

impl BoundsValidator {
    pub fn new(bounds: HashMap<String, (f64, f64)>) -> Self {
        Self { bounds }
    }

    pub fn set_bounds(&mut self, bounds: HashMap<String, (f64, f64)>) {
        self.bounds = bounds;
    }

    /// Validates `parameters`, returning the first out-of-bounds reason
    /// encountered, matching `spec.md` §7's example text exactly:
    /// `"Parameter 'lr' = 1.0 outside bounds [1e-05, 0.01]"`.
    pub fn validate(&self, parameters: &Map<String, Value>) -> Result<(), String> {
        for (key, value) in parameters {
            let Some(&(low, high)) = self.bounds.get(key) else {
                continue;
            };
            let Some(num_value) = numeric_value(value) else {
                continue;
            };
            if num_value < low || num_value > high {
                return Err(format!(
                    "Parameter '{key}' = {} outside bounds [{}, {}]",
                    format_f64(num_value),
                    format_f64(low),
                    format_f64(high)
                ));
            }
        }
        Ok(())
    }

    /// Validates `parameters`' declared `epochs`/`batch_size` against
    /// `limits`.
    pub fn validate_resource_limits(
        &self,
        parameters: &Map<String, Value>,
        limits: &ResourceLimits,
    ) -> Result<(), String> {
        if let Some(epochs) = parameters.get("epochs").and_then(numeric_value) {
            if epochs > limits.max_epochs as f64 {
                return Err(format!("epochs={} exceeds max {}", format_f64(epochs), limits.max_epochs));
            }
        }
        if let Some(batch_size) = parameters.get("batch_size").and_then(numeric_value) {
            if batch_size > limits.max_batch_size as f64 {
                return Err(format!(
                    "batch_size={} exceeds max {}",
                    format_f64(batch_size),
                    limits.max_batch_size
                ));
            }
        }
        Ok(())
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Formats an `f64` the way Python's `str(float)` would for the ranges
/// this crate's bounds actually use: scientific notation outside
/// `[1e-4, 1e16)`, otherwise plain decimal with a trailing `.0` for
/// whole numbers.
fn format_f64(value: f64) -> String {
    if value == 0.0 {
        return "0.0".to_string();
    }
    let abs = value.abs();
    if abs < 1e-4 || abs >= 1e16 {
        let formatted = format!("{value:e}");
        // Rust renders `1e-5` as "1e-5"; Python renders "1e-05" (zero-padded
        // two-digit exponent). Normalize the exponent width.
        if let Some((mantissa, exp)) = formatted.split_once('e') {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ("-", d),
                None => ("+", exp),
            };
            let digits = if digits.len() < 2 { format!("0{digits}") } else { digits.to_string() };
            return format!("{mantissa}e{sign}{digits}");
        }
        formatted
    } else if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> BoundsValidator {
        let mut b = HashMap::new();
        b.insert("lr".to_string(), (1e-5, 0.01));
        BoundsValidator::new(b)
    }

    fn params_with_lr(lr: f64) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("lr".into(), serde_json::Number::from_f64(lr).unwrap().into());
        m
    }

    #[test]
    fn out_of_bounds_message_matches_spec_example() {
        let err = bounds().validate(&params_with_lr(1.0)).unwrap_err();
        assert_eq!(err, "Parameter 'lr' = 1.0 outside bounds [1e-05, 0.01]");
    }

    #[test]
    fn in_bounds_passes() {
        assert!(bounds().validate(&params_with_lr(0.001)).is_ok());
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let mut m = Map::new();
        m.insert("unregistered".into(), Value::from(999999.0));
        assert!(bounds().validate(&m).is_ok());
    }

    #[test]
    fn non_numeric_values_are_skipped() {
        let mut b = HashMap::new();
        b.insert("tag".to_string(), (0.0, 1.0));
        let validator = BoundsValidator::new(b);
        let mut m = Map::new();
        m.insert("tag".into(), Value::String("hello".into()));
        assert!(validator.validate(&m).is_ok());
    }

    #[test]
    fn resource_limits_reject_excess_epochs() {
        let validator = BoundsValidator::default();
        let limits = ResourceLimits::default();
        let mut m = Map::new();
        m.insert("epochs".into(), Value::from(999_999));
        let err = validator.validate_resource_limits(&m, &limits).unwrap_err();
        assert!(err.contains("exceeds max"));
    }
}
