//! Monitor metrics and the Prometheus exporter.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{MonitorError, MonitorResult};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: &str) -> MonitorResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| MonitorError::config_error(format!("METRICS_ADDR {}: {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MonitorError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const SCALING_ACTIVITIES: &str = "dsa_scaling_activities";
    pub const REPORTS_WRITTEN_TOTAL: &str = "dsa_reports_written_total";
    /// Monitor cycles by cluster and the state they reached.
    pub const CYCLES_TOTAL: &str = "dsa_monitor_cycles_total";
}

pub fn record_scaling_activities(cluster: &str, count: usize) {
    gauge!(names::SCALING_ACTIVITIES, "cluster" => cluster.to_string()).set(count as f64);
}

pub fn record_report_written() {
    counter!(names::REPORTS_WRITTEN_TOTAL).increment(1);
}

pub fn record_cycle(cluster: &str, state: &str) {
    counter!(
        names::CYCLES_TOTAL,
        "cluster" => cluster.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}
