//! Crate-level error aggregate. Per-module errors carry their own
//! structured variants (see `commit_reveal::CommitRevealError`,
//! `identity::IdentityError`, `consensus::ConsensusError`,
//! `finality::FinalityError`, `channels::ChannelError`); this type lets
//! a caller working across modules propagate any of them with `?`.
//!
//! Validation-style checks that only ever need a human-readable reason
//! (bounds, incentives, seeds, coin transfers, the fee market) return
//! `Result<_, String>` directly, matching the reason-string contract in
//! `spec.md` §7; they fold into [`Error::Validation`] at this boundary.

use thiserror::Error;

use crate::channels::ChannelError;
use crate::commit_reveal::CommitRevealError;
use crate::consensus::ConsensusError;
use crate::finality::FinalityError;
use crate::identity::IdentityError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    CommitReveal(#[from] CommitRevealError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Finality(#[from] FinalityError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("{0}")]
    Validation(String),
    #[error("fatal: on-disk state is corrupt, re-sync from peers: {0}")]
    Corruption(String),
}

impl From<String> for Error {
    fn from(reason: String) -> Self {
        Error::Validation(reason)
    }
}
