//! Scaling activity probe.
//!
//! Recent autoscaling activity counts as cluster activity: instances still
//! spinning up or down mean work is in progress even when every queue looks
//! empty.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_autoscaling::error::DisplayErrorContext;
use aws_sdk_autoscaling::Client;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{MonitorError, MonitorResult};
use crate::metrics;

/// Default number of activities requested per probe.
pub const DEFAULT_ACTIVITY_RECORDS: usize = 10;

/// Most activities a single probe may request.
pub const MAX_ACTIVITY_RECORDS: usize = 100;

/// One autoscaling activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingActivity {
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub cause: String,
}

impl fmt::Display for ScalingActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}  {}", self.timestamp, self.description, self.cause)
    }
}

/// Source of recent scaling activity for an autoscaling group.
#[async_trait]
pub trait ScalingHistory: Send + Sync {
    async fn describe_recent_activity(
        &self,
        group: &str,
        count: usize,
    ) -> MonitorResult<Vec<ScalingActivity>>;
}

/// Scaling history from EC2 Auto Scaling.
#[derive(Clone)]
pub struct AutoScalingHistory {
    client: Client,
}

impl AutoScalingHistory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a client from the ambient AWS configuration.
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&sdk_config))
    }
}

#[async_trait]
impl ScalingHistory for AutoScalingHistory {
    async fn describe_recent_activity(
        &self,
        group: &str,
        count: usize,
    ) -> MonitorResult<Vec<ScalingActivity>> {
        let output = self
            .client
            .describe_scaling_activities()
            .auto_scaling_group_name(group)
            .include_deleted_groups(false)
            .max_records(count as i32)
            .send()
            .await
            .map_err(|e| MonitorError::scaling(format!("{}: {}", group, DisplayErrorContext(&e))))?;

        Ok(output
            .activities()
            .iter()
            .map(|a| {
                let start = a.start_time();
                ScalingActivity {
                    timestamp: DateTime::from_timestamp(start.secs(), start.subsec_nanos())
                        .unwrap_or_default(),
                    description: a.description().unwrap_or_default().to_string(),
                    cause: a.cause().to_string(),
                }
            })
            .collect())
    }
}

/// No autoscaling group; always reports no activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScaling;

#[async_trait]
impl ScalingHistory for NoScaling {
    async fn describe_recent_activity(
        &self,
        _group: &str,
        _count: usize,
    ) -> MonitorResult<Vec<ScalingActivity>> {
        Ok(Vec::new())
    }
}

/// Fixed scaling history for local simulation and tests.
#[derive(Debug, Default)]
pub struct StaticScaling {
    activities: Mutex<Vec<ScalingActivity>>,
    failures: Mutex<VecDeque<String>>,
}

impl StaticScaling {
    pub fn new(activities: Vec<ScalingActivity>) -> Self {
        Self {
            activities: Mutex::new(activities),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set(&self, activities: Vec<ScalingActivity>) {
        if let Ok(mut current) = self.activities.lock() {
            *current = activities;
        }
    }

    /// Make the next probe fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(reason.into());
        }
    }
}

#[async_trait]
impl ScalingHistory for StaticScaling {
    async fn describe_recent_activity(
        &self,
        group: &str,
        count: usize,
    ) -> MonitorResult<Vec<ScalingActivity>> {
        if let Some(reason) = self.failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(MonitorError::scaling(format!("{}: {}", group, reason)));
        }
        let activities = self
            .activities
            .lock()
            .map_err(|_| MonitorError::scaling("lock poisoned"))?;
        Ok(activities.iter().take(count).cloned().collect())
    }
}

/// Count recent scaling activity of a cluster, logging each activity.
///
/// A cluster without an autoscaling group has none. Probe failures are
/// logged and count as zero.
pub async fn probe_scaling(
    history: &dyn ScalingHistory,
    cluster: &str,
    group: Option<&str>,
    count: usize,
) -> usize {
    let Some(group) = group else {
        return 0;
    };

    let activities = match history.describe_recent_activity(group, count).await {
        Ok(activities) => activities,
        Err(e) => {
            warn!(cluster = %cluster, group = %group, error = %e, "Scaling probe failed");
            return 0;
        }
    };

    for activity in &activities {
        info!(cluster = %cluster, group = %group, "{}", activity);
    }
    metrics::record_scaling_activities(cluster, activities.len());
    activities.len()
}
