//! Structured monitor logging.
//!
//! Every line a monitor emits carries its cluster and monitor id, so the
//! output of several concurrent monitors can be told apart.

use tracing::{info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines; otherwise human-readable output.
/// `RUST_LOG` directives are honoured on top of the `dsa=info` default.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["dsa=info", "aws_config=warn", "aws_smithy_runtime=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Logger bound to one monitor instance.
#[derive(Debug, Clone)]
pub struct MonitorLogger {
    cluster: String,
    monitor_id: String,
}

impl MonitorLogger {
    pub fn new(cluster: &str, monitor_id: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            monitor_id: monitor_id.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            cluster = %self.cluster,
            monitor_id = %self.monitor_id,
            "Monitor started: {}", message
        );
    }

    /// Log the state a cycle reached.
    pub fn log_cycle(&self, state: &str, message: &str) {
        info!(
            cluster = %self.cluster,
            monitor_id = %self.monitor_id,
            state = %state,
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            cluster = %self.cluster,
            monitor_id = %self.monitor_id,
            "Monitor warning: {}", message
        );
    }

    pub fn log_stop(&self, message: &str) {
        info!(
            cluster = %self.cluster,
            monitor_id = %self.monitor_id,
            "Monitor stopped: {}", message
        );
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    /// Span wrapping everything a monitor task does.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "monitor",
            cluster = %self.cluster,
            monitor_id = %self.monitor_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_logger_creation() {
        let logger = MonitorLogger::new("c1", "monitor-1");
        assert_eq!(logger.cluster(), "c1");
        assert_eq!(logger.monitor_id(), "monitor-1");
    }
}
