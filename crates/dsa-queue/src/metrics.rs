//! Reconciliation metrics.
//!
//! - Envelope counters by queue role and outcome
//! - Visible-message gauges per cluster and role

use metrics::{counter, gauge};

// =============================================================================
// Metric Names
// =============================================================================

pub mod names {
    /// Envelopes seen by role and outcome (applied, malformed).
    pub const ENVELOPES_TOTAL: &str = "dsa_envelopes_total";

    /// Visible messages by cluster and role.
    pub const QUEUE_VISIBLE: &str = "dsa_queue_visible";

    /// Failed polls by role.
    pub const POLL_ERRORS_TOTAL: &str = "dsa_poll_errors_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

pub fn record_envelopes(role: &str, outcome: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        names::ENVELOPES_TOTAL,
        "role" => role.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(count as u64);
}

pub fn record_queue_visible(cluster: &str, role: &str, visible: u64) {
    gauge!(
        names::QUEUE_VISIBLE,
        "cluster" => cluster.to_string(),
        "role" => role.to_string()
    )
    .set(visible as f64);
}

pub fn record_poll_error(role: &str) {
    counter!(names::POLL_ERRORS_TOTAL, "role" => role.to_string()).increment(1);
}
