//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Scheduling Defaults
// ============================================================================

/// Default interval between reconciliation/report cycles, in seconds.
pub const DEFAULT_UPDATE_PERIODIC_SECS: u64 = 60;
/// Certificate checks run every `update_periodic * DEFAULT_CERT_CHECK_MULTIPLIER` seconds.
pub const DEFAULT_CERT_CHECK_MULTIPLIER: u32 = 60;

// ============================================================================
// Network Defaults
// ============================================================================

/// Default listen address for inbounds.
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";
/// Default source address for outbounds.
pub const DEFAULT_SEND_IP: &str = "0.0.0.0";
/// Default panel request timeout in seconds.
pub const DEFAULT_PANEL_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Shared Store Defaults
// ============================================================================

/// Default shared store address.
pub const DEFAULT_REDIS_ADDR: &str = "127.0.0.1:6379";
/// Default shared store command timeout in seconds.
pub const DEFAULT_REDIS_TIMEOUT_SECS: u64 = 5;
/// Default TTL for a user's device set in the shared store, in seconds.
pub const DEFAULT_REDIS_EXPIRY_SECS: u64 = 60;
/// Default key prefix for device sets in the shared store.
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "nodeward:devices:";

// ============================================================================
// Rule Defaults
// ============================================================================

/// Rule id assigned to patterns loaded from the local rule file.
pub const LOCAL_RULE_ID: i32 = -1;
