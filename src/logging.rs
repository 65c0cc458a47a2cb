//! Tracing setup.

use std::io;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber: `level` is an `EnvFilter` directive,
/// falling back to `info` when it does not parse. Output goes to stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(level: Option<&str>) -> bool {
    let level = level.unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .try_init()
        .is_ok()
}
