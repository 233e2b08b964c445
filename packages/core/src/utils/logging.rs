//! Tracing subscriber setup
//!
//! The engine only emits `tracing` records; hosts decide where they go.
//! Binaries and tests that want console output call [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Install a formatted stderr subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_directive` applies (for
/// example `"classtree_core=debug"`). Safe to call more than once: later calls
/// leave the first subscriber in place.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
