//! Registered optimization domains (`spec.md` §3 "Domain").

use serde::{Deserialize, Serialize};

/// Plugin wiring for a domain. The plugin implementations themselves are
/// out of scope (`spec.md` §1); this only records which capabilities a
/// domain declares.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DomainConfig {
    pub optimization_plugin: String,
    pub inference_plugin: String,
    pub synthetic_data_plugin: Option<String>,
    #[serde(default)]
    pub plugin_config: serde_json::Map<String, serde_json::Value>,
}

/// A registered model or problem definition with a named performance
/// metric. A domain without synthetic-data capability receives halved
/// verification strength (`spec.md` §4.H) and contributes proportionally
/// less to consensus.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Domain {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub performance_metric: String,
    #[serde(default = "default_true")]
    pub higher_is_better: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub config: DomainConfig,
    pub current_best_performance: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

impl Domain {
    /// Whether this domain can furnish per-evaluator synthetic data
    /// (`spec.md` §3 invariant, §4.H `verification_strength`).
    pub fn supports_synthetic_data(&self) -> bool {
        self.config.synthetic_data_plugin.is_some()
    }

    /// Updates `current_best_performance` if `candidate` is strictly
    /// better given `higher_is_better`.
    pub fn consider_new_best(&mut self, candidate: f64) {
        let better = match self.current_best_performance {
            None => true,
            Some(current) if self.higher_is_better => candidate > current,
            Some(current) => candidate < current,
        };
        if better {
            self.current_best_performance = Some(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(synthetic: bool) -> Domain {
        Domain {
            id: "d1".into(),
            name: "demo".into(),
            description: String::new(),
            performance_metric: "mse".into(),
            higher_is_better: false,
            weight: 1.0,
            config: DomainConfig {
                optimization_plugin: "opt".into(),
                inference_plugin: "inf".into(),
                synthetic_data_plugin: synthetic.then(|| "syn".to_string()),
                plugin_config: Default::default(),
            },
            current_best_performance: None,
        }
    }

    #[test]
    fn synthetic_data_support_follows_config() {
        assert!(domain(true).supports_synthetic_data());
        assert!(!domain(false).supports_synthetic_data());
    }

    #[test]
    fn lower_is_better_best_tracking() {
        let mut d = domain(false);
        d.consider_new_best(1.0);
        d.consider_new_best(2.0);
        assert_eq!(d.current_best_performance, Some(1.0));
        d.consider_new_best(0.5);
        assert_eq!(d.current_best_performance, Some(0.5));
    }
}
