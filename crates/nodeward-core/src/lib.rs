//! Core types and constants shared across nodeward crates.
//!
//! This crate provides:
//! - The panel-facing data model (nodes, users, traffic, status)
//! - Tag derivation for inbounds and per-user lookup keys
//! - Default configuration values
//! - Metric names and recording helpers

pub mod defaults;
pub mod metrics;
pub mod model;
pub mod tag;

// Re-export commonly used items at crate root
pub use defaults::*;
pub use model::*;
pub use tag::{build_node_tag, build_user_tag, parse_user_tag_uid, user_key};

/// Project name.
pub const PROJECT_NAME: &str = "nodeward";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convert a speed expressed in megabits per second into bytes per second.
#[inline]
pub fn mbps_to_bytes_per_sec(mbps: f64) -> u64 {
    if mbps <= 0.0 {
        return 0;
    }
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bytes = (mbps * 1_000_000.0 / 8.0) as u64;
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbps_conversion() {
        assert_eq!(mbps_to_bytes_per_sec(0.0), 0);
        assert_eq!(mbps_to_bytes_per_sec(-3.0), 0);
        assert_eq!(mbps_to_bytes_per_sec(8.0), 1_000_000);
        assert_eq!(mbps_to_bytes_per_sec(100.0), 12_500_000);
    }
}
