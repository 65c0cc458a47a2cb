//! Metric names and recording helpers.
//!
//! Recording is a no-op until a recorder (e.g. the Prometheus exporter) is
//! installed by the host process.

use metrics::{counter, gauge};

// ============================================================================
// Metric Names
// ============================================================================

/// Connections rejected by the local or cluster device limit.
pub const DEVICE_REJECTIONS_TOTAL: &str = "nodeward_device_rejections_total";
/// Connections rejected by an audit rule.
pub const RULE_HITS_TOTAL: &str = "nodeward_rule_hits_total";
/// Completed node/user reconciliation cycles.
pub const RECONCILE_TOTAL: &str = "nodeward_reconcile_total";
/// Failed node/user reconciliation cycles.
pub const RECONCILE_FAILURES_TOTAL: &str = "nodeward_reconcile_failures_total";
/// Bytes acknowledged by the panel.
pub const TRAFFIC_REPORTED_BYTES_TOTAL: &str = "nodeward_traffic_reported_bytes_total";
/// Failed traffic reports.
pub const REPORT_FAILURES_TOTAL: &str = "nodeward_report_failures_total";
/// Users currently registered on an inbound.
pub const ACTIVE_USERS: &str = "nodeward_active_users";
/// Users currently under an automatic speed suspension.
pub const THROTTLED_USERS: &str = "nodeward_throttled_users";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record device-limit rejections for a tag.
#[inline]
pub fn record_device_rejections(tag: &str, count: u64) {
    counter!(DEVICE_REJECTIONS_TOTAL, "tag" => tag.to_string()).increment(count);
}

/// Record an audit rule hit.
#[inline]
pub fn record_rule_hit(tag: &str) {
    counter!(RULE_HITS_TOTAL, "tag" => tag.to_string()).increment(1);
}

/// Record the outcome of a reconciliation cycle.
#[inline]
pub fn record_reconcile(success: bool) {
    if success {
        counter!(RECONCILE_TOTAL).increment(1);
    } else {
        counter!(RECONCILE_FAILURES_TOTAL).increment(1);
    }
}

/// Record a traffic report.
#[inline]
pub fn record_traffic_report(bytes: u64, success: bool) {
    if success {
        counter!(TRAFFIC_REPORTED_BYTES_TOTAL).increment(bytes);
    } else {
        counter!(REPORT_FAILURES_TOTAL).increment(1);
    }
}

/// Set the registered user count for a tag.
#[inline]
#[expect(clippy::cast_precision_loss)]
pub fn set_active_users(tag: &str, count: usize) {
    gauge!(ACTIVE_USERS, "tag" => tag.to_string()).set(count as f64);
}

/// Set the number of suspended users for a tag.
#[inline]
#[expect(clippy::cast_precision_loss)]
pub fn set_throttled_users(tag: &str, count: usize) {
    gauge!(THROTTLED_USERS, "tag" => tag.to_string()).set(count as f64);
}
