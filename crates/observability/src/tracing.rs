//! Tracing/logging initialization.
//!
//! JSON lines on stderr, filtered through `RUST_LOG`. Stdout stays free for
//! command output.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process with the `info` default.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default("info");
}

/// Initialize tracing/logging, falling back to `directive` when `RUST_LOG` is unset.
pub fn init_with_default(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    // JSON logs + timestamps; training steps log at debug, publishes at info.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
