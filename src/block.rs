//! Blocks (`spec.md` §3 "Block").

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::hashing::{hash_json, merkle_root};
use crate::transaction::Transaction;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockHeader {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: DateTime<Utc>,
    pub merkle_root: String,
    pub generator_id: String,
    pub weighted_performance_sum: f64,
    pub threshold: f64,
}

impl BlockHeader {
    /// `hash = H(canonical_json(header))` (`spec.md` §3).
    pub fn compute_hash(&self) -> String {
        hash_json(self)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub hash: String,
}

impl Block {
    /// Seals a block: computes the merkle root over `transactions`'
    /// ids, fills it into `header`, and derives `hash`.
    pub fn seal(mut header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        let ids: Vec<&str> = transactions.iter().map(|t| t.id.as_str()).collect();
        header.merkle_root = merkle_root(&ids);
        let hash = header.compute_hash();
        Self {
            header,
            transactions,
            hash,
        }
    }

    /// Recomputes the hash from the current header and checks it matches
    /// the stored one (`spec.md` §8 "Hash determinism").
    pub fn verify_hash(&self) -> bool {
        self.header.compute_hash() == self.hash
    }

    /// The genesis block: fixed Unix-epoch timestamp, all-zero previous
    /// hash and merkle root, zero threshold — byte-identical on every
    /// node (`spec.md` §3).
    pub fn genesis(generator_id: &str) -> Self {
        let header = BlockHeader {
            index: 0,
            previous_hash: "0".repeat(64),
            timestamp: Utc.timestamp_opt(0, 0).single().expect("unix epoch is representable"),
            merkle_root: "0".repeat(64),
            generator_id: generator_id.to_string(),
            weighted_performance_sum: 0.0,
            threshold: 0.0,
        };
        let hash = header.compute_hash();
        Self {
            header,
            transactions: vec![],
            hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let a = Block::genesis("genesis");
        let b = Block::genesis("genesis");
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.header.merkle_root, "0".repeat(64));
    }

    #[test]
    fn sealing_recomputes_hash_consistently() {
        let header = BlockHeader {
            index: 1,
            previous_hash: Block::genesis("g").hash,
            timestamp: Utc::now(),
            merkle_root: String::new(),
            generator_id: "gen".into(),
            weighted_performance_sum: 1.5,
            threshold: 1.0,
        };
        let block = Block::seal(header, vec![]);
        assert!(block.verify_hash());
        assert_eq!(block.header.merkle_root, "0".repeat(64));
    }
}
