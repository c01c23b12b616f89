//! Monitor configuration.
//!
//! Scalar settings come from environment variables (a `.env` file is loaded
//! by the binary). The watched clusters are read from a TOML file with the
//! `config` crate, layered with `DSA__` environment overrides such as
//! `DSA__CLUSTERS__C1__FAILED_QUEUE`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use dsa_models::JobKind;
use dsa_queue::{PollConfig, MAX_MESSAGES_PER_POLL, MAX_POLL_WAIT};

use crate::error::{MonitorError, MonitorResult};
use crate::monitor::{MonitorSettings, TerminationPolicy};
use crate::scaling::MAX_ACTIVITY_RECORDS;

/// Process-wide monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between polling cycles
    pub poll_interval: Duration,
    /// Directory reports are written to
    pub report_dir: PathBuf,
    /// Directory holding the job cache database
    pub db_dir: PathBuf,
    /// Deployment account; selects the database file
    pub account: String,
    /// Drop and recreate the job cache at startup
    pub reset_db: bool,
    /// When a monitor stops on its own
    pub termination: TerminationPolicy,
    /// Messages per poll
    pub max_messages: usize,
    /// Long-poll wait per call
    pub wait: Duration,
    /// Visibility timeout applied to peeked messages
    pub visibility_timeout: Duration,
    /// Scaling activities fetched per cycle
    pub scaling_records: usize,
    /// Bound on joining monitors at shutdown
    pub shutdown_timeout: Duration,
    /// Path of the clusters file
    pub clusters_file: PathBuf,
    pub metrics_enabled: bool,
    pub metrics_addr: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            report_dir: PathBuf::from("reports"),
            db_dir: PathBuf::from("."),
            account: "default".to_string(),
            reset_db: false,
            termination: TerminationPolicy::Never,
            max_messages: MAX_MESSAGES_PER_POLL,
            wait: MAX_POLL_WAIT,
            visibility_timeout: dsa_queue::sqs::DEFAULT_VISIBILITY_TIMEOUT,
            scaling_records: 10,
            shutdown_timeout: Duration::from_secs(30),
            clusters_file: PathBuf::from("clusters.toml"),
            metrics_enabled: false,
            metrics_addr: "0.0.0.0:9000".to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl MonitorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> MonitorResult<Self> {
        let defaults = Self::default();

        let termination = match std::env::var("DSA_TERMINATION") {
            Ok(v) => v
                .parse()
                .map_err(|e| MonitorError::config_error(format!("DSA_TERMINATION: {}", e)))?,
            Err(_) => defaults.termination,
        };

        let config = Self {
            poll_interval: Duration::from_secs(env_or(
                "DSA_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )),
            report_dir: std::env::var("DSA_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.report_dir),
            db_dir: std::env::var("DSA_DB_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_dir),
            account: std::env::var("DSA_ACCOUNT").unwrap_or(defaults.account),
            reset_db: env_flag("DSA_DB_RESET"),
            termination,
            max_messages: env_or("DSA_MAX_MESSAGES", defaults.max_messages),
            wait: Duration::from_secs(env_or("DSA_WAIT_SECS", defaults.wait.as_secs())),
            visibility_timeout: Duration::from_secs(env_or(
                "DSA_VISIBILITY_SECS",
                defaults.visibility_timeout.as_secs(),
            )),
            scaling_records: env_or("DSA_SCALING_RECORDS", defaults.scaling_records),
            shutdown_timeout: Duration::from_secs(env_or(
                "DSA_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )),
            clusters_file: std::env::var("DSA_CLUSTERS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.clusters_file),
            metrics_enabled: env_flag("METRICS_ENABLED"),
            metrics_addr: std::env::var("METRICS_ADDR").unwrap_or(defaults.metrics_addr),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject poll and probe bounds the AWS APIs would refuse on every call.
    pub fn validate(&self) -> MonitorResult<()> {
        if self.max_messages == 0 || self.max_messages > MAX_MESSAGES_PER_POLL {
            return Err(MonitorError::config_error(format!(
                "DSA_MAX_MESSAGES must be between 1 and {}, got {}",
                MAX_MESSAGES_PER_POLL, self.max_messages
            )));
        }
        if self.wait > MAX_POLL_WAIT {
            return Err(MonitorError::config_error(format!(
                "DSA_WAIT_SECS must be at most {}, got {}",
                MAX_POLL_WAIT.as_secs(),
                self.wait.as_secs()
            )));
        }
        if self.scaling_records == 0 || self.scaling_records > MAX_ACTIVITY_RECORDS {
            return Err(MonitorError::config_error(format!(
                "DSA_SCALING_RECORDS must be between 1 and {}, got {}",
                MAX_ACTIVITY_RECORDS, self.scaling_records
            )));
        }
        Ok(())
    }

    /// Per-monitor settings derived from this config.
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: self.poll_interval,
            termination: self.termination,
            report_dir: self.report_dir.clone(),
            scaling_records: self.scaling_records,
            poll: PollConfig {
                max_messages: self.max_messages,
                wait: self.wait,
                ..PollConfig::default()
            },
        }
    }
}

/// AWS resources of one watched cluster.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClusterResources {
    /// Cluster name; the key of its table in the clusters file
    #[serde(skip)]
    pub cluster: String,
    /// Processing container the cluster runs
    #[serde(default)]
    pub processor: Option<String>,
    #[serde(default, alias = "asg")]
    pub auto_scaling_group: Option<String>,
    /// Kind given to jobs first seen through a queue message
    #[serde(default = "default_kind")]
    pub kind: JobKind,
    #[serde(alias = "video_queue")]
    pub submitted_queue: String,
    #[serde(alias = "track_queue")]
    pub completed_queue: String,
    #[serde(alias = "dead_queue")]
    pub failed_queue: String,
}

fn default_kind() -> JobKind {
    JobKind::ClusterScheduled
}

#[derive(Debug, Default, Deserialize)]
struct ClustersFile {
    #[serde(default)]
    clusters: BTreeMap<String, ClusterResources>,
}

/// Load the watched clusters, sorted by name.
pub fn load_clusters(path: impl AsRef<Path>) -> MonitorResult<Vec<ClusterResources>> {
    let path = path.as_ref();
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(true))
        .add_source(config::Environment::with_prefix("DSA").separator("__"))
        .build()?;

    let file: ClustersFile = settings.try_deserialize()?;
    if file.clusters.is_empty() {
        return Err(MonitorError::config_error(format!(
            "no clusters configured in {}",
            path.display()
        )));
    }

    file.clusters
        .into_iter()
        .map(|(name, mut resources)| {
            for (field, url) in [
                ("submitted_queue", &resources.submitted_queue),
                ("completed_queue", &resources.completed_queue),
                ("failed_queue", &resources.failed_queue),
            ] {
                if url.trim().is_empty() {
                    return Err(MonitorError::config_error(format!(
                        "cluster {}: {} is empty",
                        name, field
                    )));
                }
            }
            resources.cluster = name;
            Ok(resources)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_clusters(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_clusters() {
        let file = write_clusters(
            r#"
[clusters.c1]
processor = "yolov5"
asg = "c1-asg"
video_queue = "https://sqs/c1-video.fifo"
track_queue = "https://sqs/c1-track.fifo"
dead_queue = "https://sqs/c1-dead.fifo"

[clusters.c2]
kind = "DOCKER"
submitted_queue = "https://sqs/c2-video.fifo"
completed_queue = "https://sqs/c2-track.fifo"
failed_queue = "https://sqs/c2-dead.fifo"
"#,
        );

        let clusters = load_clusters(file.path()).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].cluster, "c1");
        assert_eq!(clusters[0].auto_scaling_group.as_deref(), Some("c1-asg"));
        assert_eq!(clusters[0].kind, JobKind::ClusterScheduled);
        assert_eq!(clusters[0].completed_queue, "https://sqs/c1-track.fifo");
        assert_eq!(clusters[1].kind, JobKind::LocalSimulation);
        assert_eq!(clusters[1].auto_scaling_group, None);
    }

    #[test]
    fn test_empty_clusters_file_is_rejected() {
        let file = write_clusters("# nothing here\n");
        assert!(matches!(load_clusters(file.path()), Err(MonitorError::ConfigError(_))));
    }

    #[test]
    fn test_missing_queue_is_rejected() {
        let file = write_clusters(
            r#"
[clusters.c1]
submitted_queue = "https://sqs/a"
completed_queue = " "
failed_queue = "https://sqs/c"
"#,
        );
        assert!(load_clusters(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_bounds() {
        assert!(MonitorConfig::default().validate().is_ok());

        let long_wait = MonitorConfig {
            wait: Duration::from_secs(30),
            ..MonitorConfig::default()
        };
        assert!(matches!(long_wait.validate(), Err(MonitorError::ConfigError(_))));

        let many_records = MonitorConfig {
            scaling_records: 500,
            ..MonitorConfig::default()
        };
        assert!(matches!(many_records.validate(), Err(MonitorError::ConfigError(_))));

        let no_messages = MonitorConfig {
            max_messages: 0,
            ..MonitorConfig::default()
        };
        assert!(no_messages.validate().is_err());
    }

    #[test]
    fn test_monitor_settings_carry_poll_bounds() {
        let config = MonitorConfig {
            max_messages: 5,
            wait: Duration::from_secs(1),
            ..MonitorConfig::default()
        };
        let settings = config.monitor_settings();
        assert_eq!(settings.poll.max_messages, 5);
        assert_eq!(settings.poll.wait, Duration::from_secs(1));
        assert_eq!(settings.termination, TerminationPolicy::Never);
    }
}
