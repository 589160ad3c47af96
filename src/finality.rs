//! Finality checkpoints and external anchors (`spec.md` §4.L): bounds
//! reorg depth and allows cross-checking the chain against an
//! externally published ledger.
//!
//! Grounded on `original_source/.../consensus/finality.py`'s
//! `FinalityManager`/`ExternalAnchorManager` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::hashing::hash_parts;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    Implicit,
    Explicit,
    External,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub block_height: u64,
    pub block_hash: String,
    pub timestamp: DateTime<Utc>,
    pub source: CheckpointSource,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FinalityError {
    #[error("cannot checkpoint height {height} — already finalized up to {finalized}")]
    WouldRevert { height: u64, finalized: u64 },
}

/// Tracks implicit (confirmation-depth) and explicit finality
/// checkpoints for the local chain.
pub struct FinalityManager {
    confirmation_depth: u64,
    checkpoints: Vec<Checkpoint>,
}

impl FinalityManager {
    pub fn new(confirmation_depth: u64) -> Self {
        Self {
            confirmation_depth,
            checkpoints: Vec::new(),
        }
    }

    pub fn confirmation_depth(&self) -> u64 {
        self.confirmation_depth
    }

    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// Highest finalized height, or `None` if nothing is finalized yet.
    pub fn finalized_height(&self) -> Option<u64> {
        self.checkpoints.last().map(|c| c.block_height)
    }

    /// Pins an irrevocable explicit checkpoint. The height must strictly
    /// advance past any existing finalized height.
    pub fn add_checkpoint(&mut self, block_height: u64, block_hash: String, now: DateTime<Utc>) -> Result<&Checkpoint, FinalityError> {
        if let Some(finalized) = self.finalized_height() {
            if block_height <= finalized {
                return Err(FinalityError::WouldRevert { height: block_height, finalized });
            }
        }

        self.checkpoints.push(Checkpoint {
            block_height,
            block_hash,
            timestamp: now,
            source: CheckpointSource::Explicit,
        });
        info!(block_height, "explicit checkpoint pinned");
        Ok(self.checkpoints.last().expect("just pushed"))
    }

    /// Call after appending a block at `chain_height`. If the chain has
    /// grown past `confirmation_depth` beyond the last finalized height,
    /// mints an implicit checkpoint at the hash provided.
    pub fn on_new_block(&mut self, chain_height: u64, hash_at_depth: Option<&str>, now: DateTime<Utc>) -> Option<&Checkpoint> {
        let hash_at_depth = hash_at_depth?;
        let candidate_height = chain_height.checked_sub(self.confirmation_depth)?;

        if let Some(finalized) = self.finalized_height() {
            if candidate_height <= finalized {
                return None;
            }
        }

        self.checkpoints.push(Checkpoint {
            block_height: candidate_height,
            block_hash: hash_at_depth.to_string(),
            timestamp: now,
            source: CheckpointSource::Implicit,
        });
        info!(block_height = candidate_height, "implicit checkpoint finalized");
        self.checkpoints.last()
    }

    /// A reorg of `reorg_depth` blocks from `chain_height` is allowed
    /// only if it does not undo any finalized block.
    pub fn is_reorg_allowed(&self, reorg_depth: u64, chain_height: u64) -> bool {
        let Some(reorg_to) = chain_height.checked_sub(reorg_depth) else {
            return false;
        };
        match self.finalized_height() {
            Some(finalized) => reorg_to > finalized,
            None => true,
        }
    }

    /// A block is ancestry-consistent if, at any height matching a
    /// checkpoint, its hash agrees with that checkpoint.
    pub fn validate_block_ancestry(&self, block_height: u64, block_hash: &str) -> bool {
        self.checkpoints
            .iter()
            .all(|cp| cp.block_height != block_height || cp.block_hash == block_hash)
    }

    pub fn all_checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExternalAnchor {
    pub block_height: u64,
    pub block_hash: String,
    pub chain_state_hash: String,
    pub external_tx_id: String,
    pub external_ledger: String,
    pub timestamp: DateTime<Utc>,
}

/// Periodic cross-ledger anchoring (`spec.md` §4.L "Anchors").
pub struct ExternalAnchorManager {
    interval: u64,
    anchors: Vec<ExternalAnchor>,
}

impl ExternalAnchorManager {
    pub fn new(anchor_interval_blocks: u64) -> Self {
        Self {
            interval: anchor_interval_blocks,
            anchors: Vec::new(),
        }
    }

    pub fn anchor_interval(&self) -> u64 {
        self.interval
    }

    pub fn latest_anchor(&self) -> Option<&ExternalAnchor> {
        self.anchors.last()
    }

    pub fn should_anchor(&self, block_height: u64) -> bool {
        self.interval > 0 && block_height > 0 && block_height % self.interval == 0
    }

    pub fn create_anchor(&mut self, block_height: u64, block_hash: String, chain_state_hash: String, now: DateTime<Utc>) -> &ExternalAnchor {
        self.anchors.push(ExternalAnchor {
            block_height,
            block_hash,
            chain_state_hash,
            external_tx_id: String::new(),
            external_ledger: String::new(),
            timestamp: now,
        });
        self.anchors.last().expect("just pushed")
    }

    pub fn record_publication(&mut self, block_height: u64, external_tx_id: String, external_ledger: String) -> bool {
        if let Some(anchor) = self.anchors.iter_mut().find(|a| a.block_height == block_height) {
            anchor.external_tx_id = external_tx_id;
            anchor.external_ledger = external_ledger;
            true
        } else {
            false
        }
    }

    /// `Some(true)` if matches, `Some(false)` if diverges, `None` if no
    /// anchor exists for this height.
    pub fn verify_chain_against_anchor(&self, block_height: u64, block_hash: &str, chain_state_hash: &str) -> Option<bool> {
        self.anchors
            .iter()
            .find(|a| a.block_height == block_height)
            .map(|a| a.block_hash == block_hash && a.chain_state_hash == chain_state_hash)
    }

    pub fn all_anchors(&self) -> &[ExternalAnchor] {
        &self.anchors
    }

    /// `H("h1:h2:...:hk")` over block hashes in order.
    pub fn compute_chain_state_hash(block_hashes: &[String]) -> String {
        let refs: Vec<&str> = block_hashes.iter().map(|h| h.as_str()).collect();
        hash_parts(&refs)
    }
}
