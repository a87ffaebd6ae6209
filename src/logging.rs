//! Ambient logging setup.
//!
//! The rest of this crate logs with `tracing`'s `info!`/`warn!`/`error!`/
//! `debug!` macros directly, the way the teacher's non-legacy modules do
//! (e.g. `container_registry/ecr.rs`). This module only owns the one thing a
//! library can usefully own: an opt-in subscriber installer for binaries or
//! tests that haven't already set one up.

use tracing_subscriber::{EnvFilter, fmt};

/// Installs a `tracing-subscriber` global subscriber reading its level from
/// `RUST_LOG` (defaulting to `info`). Safe to call more than once; later
/// calls are no-ops once a global subscriber is set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
