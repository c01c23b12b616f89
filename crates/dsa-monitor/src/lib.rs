//! Cluster monitoring for the DeepSea-AI job tracker.
//!
//! This crate provides:
//! - The per-cluster `Monitor` loop with its termination policies
//! - Scaling activity probing (EC2 Auto Scaling)
//! - Job report generation
//! - The `Tracker` facade used by submitters and operators

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod report;
pub mod scaling;
pub mod tracker;

pub use config::{load_clusters, ClusterResources, MonitorConfig};
pub use error::{MonitorError, MonitorResult};
pub use logging::MonitorLogger;
pub use monitor::{
    CycleReport, Monitor, MonitorHandle, MonitorOutcome, MonitorSettings, MonitorState, StopReason,
    TerminationPolicy,
};
pub use report::{render_report, render_reports, report_file_name, ReportGenerator};
pub use scaling::{AutoScalingHistory, NoScaling, ScalingActivity, ScalingHistory, StaticScaling};
pub use tracker::{ClusterWatch, Tracker};
