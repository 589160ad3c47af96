//! Capability interfaces (`spec.md` §9): the typed contract between the
//! consensus core and the opaque optimization/inference/synthetic-data
//! plugins it invokes. Concrete plugin implementations are out of scope
//! (`spec.md` §1) — this defines the traits and a null/mock
//! implementation for tests.
//!
//! Grounded on `original_source/.../plugins/base.py`'s
//! `OptimizationPlugin`/`InferencePlugin`/`SyntheticDataPlugin` ABCs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not configured")]
    NotConfigured,
    #[error("no improvement found")]
    NoImprovement,
    #[error("plugin error: {0}")]
    Other(String),
    #[error("plugin deadline exceeded")]
    DeadlineExceeded,
}

/// Performs the actual optimization work for a domain and reports
/// parameters when they surpass the current network best.
pub trait OptimizationPlugin: Send + Sync {
    fn configure(&mut self, config: &Map<String, Value>) -> Result<(), PluginError>;

    /// Runs one optimization step. Returns `(parameters,
    /// reported_performance)` only when it improves on
    /// `current_best_performance`; otherwise `Err(NoImprovement)`.
    fn optimize(
        &mut self,
        current_best_params: Option<&Map<String, Value>>,
        current_best_performance: Option<f64>,
    ) -> Result<(Map<String, Value>, f64), PluginError>;

    fn domain_metadata(&self) -> Map<String, Value>;
}

/// Verifies reported optimae performance by re-running inference with
/// the submitted parameters.
pub trait InferencePlugin: Send + Sync {
    fn configure(&mut self, config: &Map<String, Value>) -> Result<(), PluginError>;

    fn evaluate(&self, parameters: &Map<String, Value>, data: Option<&Map<String, Value>>) -> Result<f64, PluginError>;
}

/// Generates deterministic synthetic evaluation data. Mandatory for
/// quorum trust: a domain without one gets zero verification strength
/// (`spec.md` §4.H).
pub trait SyntheticDataPlugin: Send + Sync {
    fn configure(&mut self, config: &Map<String, Value>) -> Result<(), PluginError>;

    /// Must be deterministic: identical `seed` always yields identical
    /// output, since every evaluator in a quorum derives the same seed.
    fn generate(&self, seed: u32) -> Result<Value, PluginError>;

    /// Generates synthetic data and its content hash in one call — the
    /// hash is what gets embedded in a verification vote so the quorum
    /// can confirm every evaluator used identical data.
    fn generate_with_hash(&self, seed: u32) -> Result<(Value, String), PluginError> {
        let data = self.generate(seed)?;
        let hash = hash_synthetic_data(&data);
        Ok((data, hash))
    }
}

/// Deterministic, order-independent hash of synthetic data: object keys
/// sorted, each value type fed to the digest distinctly so `1` and
/// `"1"` never collide.
pub fn hash_synthetic_data(data: &Value) -> String {
    let mut hasher = Sha256::new();
    feed(data, &mut hasher);
    hex::encode(hasher.finalize())
}

fn feed(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(key.as_bytes());
                feed(&map[key], hasher);
            }
        }
        Value::Array(items) => {
            for item in items {
                feed(item, hasher);
            }
        }
        Value::String(s) => hasher.update(s.as_bytes()),
        Value::Number(n) => hasher.update(n.to_string().as_bytes()),
        Value::Bool(b) => hasher.update(if *b { b"T" } else { b"F" }),
        Value::Null => hasher.update(b"None"),
    }
}

/// Generates synthetic data and evaluates it against `parameters`,
/// off the calling task's thread and bounded by `deadline`. Both plugin
/// calls are synchronous/CPU-bound, so they run on `spawn_blocking`
/// rather than directly in an `async fn` body, which would never yield
/// and so would never actually let the timeout fire.
///
/// Returns the synthetic data's content hash alongside the evaluated
/// score — the hash is what a caller embeds in its quorum vote.
pub async fn run_verification_plugins(
    synthetic: Arc<dyn SyntheticDataPlugin>,
    inference: Arc<dyn InferencePlugin>,
    seed: u32,
    parameters: Map<String, Value>,
    deadline: Duration,
) -> Result<(String, f64), PluginError> {
    let task = tokio::task::spawn_blocking(move || -> Result<(String, f64), PluginError> {
        let (data, hash) = synthetic.generate_with_hash(seed)?;
        let score = inference.evaluate(&parameters, data.as_object())?;
        Ok((hash, score))
    });

    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(_join_error)) => Err(PluginError::Other("plugin task panicked".to_string())),
        Err(_elapsed) => Err(PluginError::DeadlineExceeded),
    }
}

/// A no-op plugin set for tests and nodes without real plugins wired
/// up: `optimize` never improves, `evaluate` echoes back the reported
/// performance it's handed, `generate` produces an empty object.
#[derive(Default)]
pub struct NullOptimizationPlugin;

impl OptimizationPlugin for NullOptimizationPlugin {
    fn configure(&mut self, _config: &Map<String, Value>) -> Result<(), PluginError> {
        Ok(())
    }

    fn optimize(
        &mut self,
        _current_best_params: Option<&Map<String, Value>>,
        _current_best_performance: Option<f64>,
    ) -> Result<(Map<String, Value>, f64), PluginError> {
        Err(PluginError::NoImprovement)
    }

    fn domain_metadata(&self) -> Map<String, Value> {
        Map::new()
    }
}

#[derive(Default)]
pub struct NullInferencePlugin {
    pub fixed_performance: f64,
}

impl InferencePlugin for NullInferencePlugin {
    fn configure(&mut self, _config: &Map<String, Value>) -> Result<(), PluginError> {
        Ok(())
    }

    fn evaluate(&self, _parameters: &Map<String, Value>, _data: Option<&Map<String, Value>>) -> Result<f64, PluginError> {
        Ok(self.fixed_performance)
    }
}

#[derive(Default)]
pub struct NullSyntheticDataPlugin;

impl SyntheticDataPlugin for NullSyntheticDataPlugin {
    fn configure(&mut self, _config: &Map<String, Value>) -> Result<(), PluginError> {
        Ok(())
    }

    fn generate(&self, seed: u32) -> Result<Value, PluginError> {
        Ok(serde_json::json!({ "seed": seed }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_data_hash_is_deterministic() {
        let data = serde_json::json!({"b": 1, "a": [1, 2, 3]});
        assert_eq!(hash_synthetic_data(&data), hash_synthetic_data(&data));
    }

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = serde_json::json!({"a": 1, "b": 2});
        let b = serde_json::json!({"b": 2, "a": 1});
        assert_eq!(hash_synthetic_data(&a), hash_synthetic_data(&b));
    }

    #[test]
    fn generate_with_hash_round_trips_through_the_plugin() {
        let plugin = NullSyntheticDataPlugin;
        let (data, hash) = plugin.generate_with_hash(42).unwrap();
        assert_eq!(hash_synthetic_data(&data), hash);
    }

    struct SlowInferencePlugin;

    impl InferencePlugin for SlowInferencePlugin {
        fn configure(&mut self, _config: &Map<String, Value>) -> Result<(), PluginError> {
            Ok(())
        }

        fn evaluate(&self, _parameters: &Map<String, Value>, _data: Option<&Map<String, Value>>) -> Result<f64, PluginError> {
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(0.5)
        }
    }

    #[tokio::test]
    async fn run_verification_plugins_completes_within_deadline() {
        let (hash, score) = run_verification_plugins(
            Arc::new(NullSyntheticDataPlugin),
            Arc::new(NullInferencePlugin { fixed_performance: 0.42 }),
            7,
            Map::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(score, 0.42);
        assert_eq!(hash.len(), 64);
    }

    #[tokio::test]
    async fn run_verification_plugins_times_out_on_a_slow_evaluator() {
        let err = run_verification_plugins(
            Arc::new(NullSyntheticDataPlugin),
            Arc::new(SlowInferencePlugin),
            7,
            Map::new(),
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::DeadlineExceeded));
    }
}
