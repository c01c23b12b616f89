//! Job definitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::Media;
use crate::status::{derive_job_status, Status};

/// Store-assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute backend a job was dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Managed training/processing job (SageMaker)
    #[serde(rename = "SAGEMAKER")]
    ManagedTraining,
    /// Container scheduled on an ECS cluster
    #[serde(rename = "ECS")]
    ClusterScheduled,
    /// Local docker run used for simulation and testing
    #[serde(rename = "DOCKER")]
    LocalSimulation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ManagedTraining => "SAGEMAKER",
            JobKind::ClusterScheduled => "ECS",
            JobKind::LocalSimulation => "DOCKER",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job kind: {0}")]
pub struct ParseJobKindError(pub String);

impl FromStr for JobKind {
    type Err = ParseJobKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAGEMAKER" => Ok(JobKind::ManagedTraining),
            "ECS" => Ok(JobKind::ClusterScheduled),
            "DOCKER" => Ok(JobKind::LocalSimulation),
            _ => Err(ParseJobKindError(s.to_string())),
        }
    }
}

/// One submitted batch of video-processing work.
///
/// A job is identified by its `(name, cluster)` pair; the same name may be
/// reused on a different cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    /// Cluster or engine the job runs on
    pub cluster: String,
    pub kind: JobKind,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of a job's progress computed from its media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub status: Status,
}

impl JobProgress {
    pub fn from_media(media: &[Media]) -> Self {
        Self {
            total: media.len(),
            completed: media.iter().filter(|m| m.status == Status::Success).count(),
            failed: media.iter().filter(|m| m.status == Status::Failed).count(),
            status: derive_job_status(media.iter().map(|m| m.status)),
        }
    }

    /// True once every media item has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.completed + self.failed == self.total
    }
}
