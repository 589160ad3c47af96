//! Commit-reveal scheme for front-running resistance (`spec.md` §4.B).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::hashing::sha256_hex;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitRevealError {
    #[error("commitment already exists")]
    DuplicateCommitment,
    #[error("no commitment found for this hash")]
    BadCommitment,
    #[error("commitment already revealed")]
    AlreadyRevealed,
    #[error("commitment has expired")]
    Expired,
    #[error("reveal hash does not match commitment")]
    HashMismatch,
    #[error("reveal optimizer does not match commitment")]
    OptimizerMismatch,
    #[error("reveal domain does not match commitment")]
    DomainMismatch,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Commitment {
    pub commitment_hash: String,
    pub domain_id: String,
    pub optimizer_id: String,
    pub timestamp: DateTime<Utc>,
    pub revealed: bool,
    pub expired: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Reveal {
    pub commitment_hash: String,
    pub domain_id: String,
    pub optimizer_id: String,
    pub parameters: Map<String, Value>,
    pub nonce: String,
    pub reported_performance: f64,
}

/// `H(canonical_json(parameters) || nonce)` (`spec.md` §3).
pub fn compute_commitment(parameters: &Map<String, Value>, nonce: &str) -> String {
    let payload = format!("{}:{}", crate::hashing::canonical_json(parameters), nonce);
    sha256_hex(payload.as_bytes())
}

pub fn verify_commitment(commitment_hash: &str, parameters: &Map<String, Value>, nonce: &str) -> bool {
    compute_commitment(parameters, nonce) == commitment_hash
}

/// Tracks outstanding commitments and processes their reveals.
/// `spec.md` §4.B.
pub struct CommitRevealManager {
    commitments: HashMap<String, Commitment>,
    max_commit_age: chrono::Duration,
}

impl CommitRevealManager {
    pub fn new(max_commit_age: chrono::Duration) -> Self {
        Self {
            commitments: HashMap::new(),
            max_commit_age,
        }
    }

    /// Registers a new commitment. Errors on duplicate hash.
    pub fn add_commitment(&mut self, commitment: Commitment) -> Result<(), CommitRevealError> {
        if self.commitments.contains_key(&commitment.commitment_hash) {
            return Err(CommitRevealError::DuplicateCommitment);
        }
        self.commitments.insert(commitment.commitment_hash.clone(), commitment);
        Ok(())
    }

    /// Processes a reveal against its registered commitment.
    pub fn process_reveal(&mut self, reveal: &Reveal, now: DateTime<Utc>) -> Result<(), CommitRevealError> {
        let commitment = self
            .commitments
            .get_mut(&reveal.commitment_hash)
            .ok_or(CommitRevealError::BadCommitment)?;

        if commitment.revealed {
            return Err(CommitRevealError::AlreadyRevealed);
        }
        if commitment.expired {
            return Err(CommitRevealError::Expired);
        }
        if now - commitment.timestamp > self.max_commit_age {
            commitment.expired = true;
            return Err(CommitRevealError::Expired);
        }
        if !verify_commitment(&reveal.commitment_hash, &reveal.parameters, &reveal.nonce) {
            return Err(CommitRevealError::HashMismatch);
        }
        if reveal.optimizer_id != commitment.optimizer_id {
            return Err(CommitRevealError::OptimizerMismatch);
        }
        if reveal.domain_id != commitment.domain_id {
            return Err(CommitRevealError::DomainMismatch);
        }

        commitment.revealed = true;
        Ok(())
    }

    /// Removes expired or revealed commitments, marking any newly-expired
    /// ones first. Returns the count removed.
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let max_age = self.max_commit_age;
        for c in self.commitments.values_mut() {
            if !c.expired && !c.revealed && now - c.timestamp > max_age {
                c.expired = true;
            }
        }
        let before = self.commitments.len();
        self.commitments.retain(|_, c| !c.revealed && !c.expired);
        before - self.commitments.len()
    }

    /// Whether a commitment exists and is neither revealed nor expired.
    pub fn has_valid_commitment(&mut self, commitment_hash: &str, now: DateTime<Utc>) -> bool {
        let max_age = self.max_commit_age;
        match self.commitments.get_mut(commitment_hash) {
            Some(c) if c.revealed || c.expired => false,
            Some(c) if now - c.timestamp > max_age => {
                c.expired = true;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.commitments.values().filter(|c| !c.revealed && !c.expired).count()
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

    fn commitment(now: DateTime<Utc>) -> Commitment {
        let hash = compute_commitment(&params(), "nonce-1");
        Commitment {
            commitment_hash: hash,
            domain_id: "d".into(),
            optimizer_id: "opt".into(),
            timestamp: now,
            revealed: false,
            expired: false,
        }
    }

    #[test]
    fn reveal_matching_commitment_succeeds() {
        let now = Utc::now();
        let c = commitment(now);
        let hash = c.commitment_hash.clone();
        let mut mgr = CommitRevealManager::new(chrono::Duration::seconds(600));
        mgr.add_commitment(c).unwrap();

        let reveal = Reveal {
            commitment_hash: hash,
            domain_id: "d".into(),
            optimizer_id: "opt".into(),
            parameters: params(),
            nonce: "nonce-1".into(),
            reported_performance: 0.5,
        };
        assert!(mgr.process_reveal(&reveal, now).is_ok());
        assert_eq!(mgr.process_reveal(&reveal, now), Err(CommitRevealError::AlreadyRevealed));
    }

    #[test]
    fn reveal_after_max_age_is_expired() {
        let now = Utc::now();
        let c = commitment(now);
        let hash = c.commitment_hash.clone();
        let mut mgr = CommitRevealManager::new(chrono::Duration::seconds(1));
        mgr.add_commitment(c).unwrap();

        let reveal = Reveal {
            commitment_hash: hash,
            domain_id: "d".into(),
            optimizer_id: "opt".into(),
            parameters: params(),
            nonce: "nonce-1".into(),
            reported_performance: 0.5,
        };
        let later = now + chrono::Duration::seconds(10);
        assert_eq!(mgr.process_reveal(&reveal, later), Err(CommitRevealError::Expired));
    }

    #[test]
    fn duplicate_commitment_rejected() {
        let now = Utc::now();
        let mut mgr = CommitRevealManager::new(chrono::Duration::seconds(600));
        mgr.add_commitment(commitment(now)).unwrap();
        assert_eq!(mgr.add_commitment(commitment(now)), Err(CommitRevealError::DuplicateCommitment));
    }

    #[test]
    fn cleanup_removes_revealed_and_expired() {
        let now = Utc::now();
        let mut mgr = CommitRevealManager::new(chrono::Duration::seconds(600));
        let c = commitment(now);
        let hash = c.commitment_hash.clone();
        mgr.add_commitment(c).unwrap();
        let reveal = Reveal {
            commitment_hash: hash,
            domain_id: "d".into(),
            optimizer_id: "opt".into(),
            parameters: params(),
            nonce: "nonce-1".into(),
            reported_performance: 0.5,
        };
        mgr.process_reveal(&reveal, now).unwrap();
        assert_eq!(mgr.cleanup_expired(now), 1);
        assert_eq!(mgr.pending_count(), 0);
    }
}
