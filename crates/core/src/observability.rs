//! Opt-in tracing initialization.
//!
//! This crate never installs a global subscriber on its own — it only emits
//! `tracing` events, the same way `agent/`, `mcp/`, and `process/mod.rs`
//! already do throughout the tree. Binaries embedding this crate decide how
//! (and whether) to render those events; `init_tracing()` is a convenience
//! helper for development and for this crate's own tests.

/// Install a `tracing-subscriber` that honors `RUST_LOG`, defaulting to
/// `info` for this crate and `warn` for everything else.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,agentcore_core=info"));

    let _ = fmt().with_env_filter(filter).try_init();
}
