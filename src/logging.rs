//! Logging init helper for binaries/test harnesses embedding this crate.
//!
//! The library itself never initializes global logging state — every
//! module emits `tracing` spans/events at its own seams (block sealed,
//! optimae accepted/rejected, quorum decided, reorg, checkpoint, anchor
//! published, channel disputed) and leaves subscription to the caller,
//! mirroring the teacher's daemon, which owns logger init separately
//! from the library crates it wires together (`forest/src/logger`).

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `tracing-subscriber` `fmt` layer filtered by `RUST_LOG`
/// (defaulting to `info` when unset). Intended for binaries and
/// integration tests, never called from library code.
pub fn init_default() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
