//! Optimae — content-addressed optimized parameter submissions
//! (`spec.md` §3 "Optimae").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hashing::hash_json;

/// Lifecycle stage of an optimae. Immutable once `Accepted` or `Rejected`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimaeStatus {
    Committed,
    Revealed,
    UnderVerification,
    Accepted,
    Rejected,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Optimae {
    pub id: String,
    pub domain_id: String,
    pub optimizer_id: String,
    pub parameters: Map<String, Value>,
    pub reported_performance: f64,
    pub verified_performance: Option<f64>,
    #[serde(default)]
    pub performance_increment: f64,
    pub created_at: DateTime<Utc>,
    pub status: OptimaeStatus,
    /// The commit-reveal commitment this optimae was revealed against;
    /// re-derives the same per-evaluator synthetic-data seed the
    /// evaluator used (`spec.md` §4.C).
    #[serde(default)]
    pub commitment_hash: String,
}

/// Fields hashed to form an optimae id; a struct (rather than an inline
/// `json!`) so the hash input shape is exactly what `compute_id` signs.
#[derive(Serialize)]
struct OptimaeIdPayload<'a> {
    domain_id: &'a str,
    parameters: &'a Map<String, Value>,
    optimizer_id: &'a str,
    created_at: String,
}

impl Optimae {
    /// `id = H(domain_id, parameters, optimizer_id, created_at)` per
    /// `spec.md` §3.
    pub fn compute_id(
        domain_id: &str,
        parameters: &Map<String, Value>,
        optimizer_id: &str,
        created_at: DateTime<Utc>,
    ) -> String {
        hash_json(&OptimaeIdPayload {
            domain_id,
            parameters,
            optimizer_id,
            created_at: created_at.to_rfc3339(),
        })
    }

    /// Builds a new, freshly-committed optimae with a derived id.
    pub fn new(
        domain_id: String,
        optimizer_id: String,
        parameters: Map<String, Value>,
        reported_performance: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = Self::compute_id(&domain_id, &parameters, &optimizer_id, created_at);
        Self {
            id,
            domain_id,
            optimizer_id,
            parameters,
            reported_performance,
            verified_performance: None,
            performance_increment: 0.0,
            created_at,
            status: OptimaeStatus::Committed,
            commitment_hash: String::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, OptimaeStatus::Accepted | OptimaeStatus::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("lr".into(), Value::from(0.01));
        m
    }

    #[test]
    fn id_is_deterministic_given_identical_inputs() {
        let ts = Utc::now();
        let a = Optimae::compute_id("d", &params(), "opt", ts);
        let b = Optimae::compute_id("d", &params(), "opt", ts);
        assert_eq!(a, b);
    }

    #[test]
    fn id_changes_with_any_field() {
        let ts = Utc::now();
        let base = Optimae::compute_id("d", &params(), "opt", ts);
        let diff_domain = Optimae::compute_id("d2", &params(), "opt", ts);
        assert_ne!(base, diff_domain);
    }

    #[test]
    fn new_optimae_starts_committed() {
        let o = Optimae::new("d".into(), "opt".into(), params(), 0.5, Utc::now());
        assert_eq!(o.status, OptimaeStatus::Committed);
        assert!(!o.is_terminal());
    }
}
