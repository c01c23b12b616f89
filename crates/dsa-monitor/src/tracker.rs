//! Job tracker facade.
//!
//! Ties the status store, the watched clusters and their monitors together
//! behind the operations callers need: recording submissions, querying job
//! status, rendering reports and running monitors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use dsa_models::{JobKind, Metadata, Status};
use dsa_queue::{ClusterQueues, QueueRole, Submission, WorkSubmitter};
use dsa_store::{StatusStore, UpsertOutcome};

use crate::error::{MonitorError, MonitorResult};
use crate::monitor::{Monitor, MonitorHandle, MonitorOutcome, MonitorSettings};
use crate::report::render_reports;
use crate::scaling::{NoScaling, ScalingHistory};

/// A cluster the tracker can monitor.
#[derive(Clone)]
pub struct ClusterWatch {
    pub cluster: String,
    pub queues: ClusterQueues,
    /// Where new work for the cluster is sent, if submitting through the tracker
    pub submitter: Option<Arc<dyn WorkSubmitter>>,
    pub scaling_group: Option<String>,
    /// Kind given to jobs first seen through a queue message
    pub kind: JobKind,
}

impl ClusterWatch {
    pub fn new(cluster: impl Into<String>, queues: ClusterQueues) -> Self {
        Self {
            cluster: cluster.into(),
            queues,
            submitter: None,
            scaling_group: None,
            kind: JobKind::ClusterScheduled,
        }
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn WorkSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_scaling_group(mut self, group: impl Into<String>) -> Self {
        self.scaling_group = Some(group.into());
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Entry point for tracking jobs across clusters.
pub struct Tracker {
    store: Arc<StatusStore>,
    settings: MonitorSettings,
    scaling: Arc<dyn ScalingHistory>,
    clusters: HashMap<String, ClusterWatch>,
}

impl Tracker {
    pub fn new(store: Arc<StatusStore>, settings: MonitorSettings) -> Self {
        Self {
            store,
            settings,
            scaling: Arc::new(NoScaling),
            clusters: HashMap::new(),
        }
    }

    /// Scaling history used by every monitor.
    pub fn with_scaling(mut self, scaling: Arc<dyn ScalingHistory>) -> Self {
        self.scaling = scaling;
        self
    }

    /// Add (or replace) a watched cluster.
    pub fn watch(&mut self, watch: ClusterWatch) {
        self.clusters.insert(watch.cluster.clone(), watch);
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    /// Record that `video` was submitted for `job_name` on `cluster`.
    ///
    /// Creates the job on first use and the media item at QUEUED; a media
    /// item that already finished keeps its status.
    pub fn record_submission(
        &self,
        job_name: &str,
        cluster: &str,
        video: &str,
        kind: JobKind,
        metadata: &Metadata,
    ) -> MonitorResult<UpsertOutcome> {
        let job = match self.store.find_job(job_name, cluster)? {
            Some(job) => job,
            None => self.store.create_job(job_name, cluster, kind)?,
        };
        let media_name = QueueRole::Submitted.media_name(video);
        let outcome = self
            .store
            .upsert_media(job.id, &media_name, Status::Queued, metadata)?;

        info!(
            job = %job_name,
            cluster = %cluster,
            media = %media_name,
            change = outcome.change.as_str(),
            "Recorded submission"
        );
        Ok(outcome)
    }

    /// Send a video to its cluster and record the submission.
    pub async fn submit(&self, submission: &Submission, kind: JobKind) -> MonitorResult<String> {
        let watch = self.cluster(&submission.cluster)?;
        let submitter = watch.submitter.as_ref().ok_or_else(|| {
            MonitorError::config_error(format!("no submitter for cluster {}", submission.cluster))
        })?;

        let message_id = submitter.submit(submission).await?;

        let mut metadata = Metadata::new();
        metadata.insert("source".into(), submission.video.clone().into());
        metadata.insert("user_name".into(), submission.user_name.clone().into());
        metadata.insert("submitted_message_id".into(), message_id.clone().into());
        if let Some(args) = &submission.args {
            metadata.insert("args".into(), args.clone().into());
        }

        self.record_submission(
            &submission.job_name,
            &submission.cluster,
            &submission.video,
            kind,
            &metadata,
        )?;
        Ok(message_id)
    }

    /// Aggregate status of a job; `Unknown` when the job is not tracked.
    pub fn job_status(&self, job_name: &str, cluster: &str) -> MonitorResult<Status> {
        match self.store.find_job(job_name, cluster)? {
            Some(job) => Ok(self.store.job_status(job.id)?),
            None => Ok(Status::Unknown),
        }
    }

    /// Render the reports of every job named `job_name`, across clusters.
    pub fn report(&self, job_name: &str) -> MonitorResult<String> {
        let jobs = self.store.jobs_named(job_name)?;
        if jobs.is_empty() {
            return Err(MonitorError::Store(dsa_store::StoreError::not_found(format!(
                "job {}",
                job_name
            ))));
        }

        let mut rosters = Vec::with_capacity(jobs.len());
        for job in jobs {
            let media = self.store.media_for_job(job.id)?;
            rosters.push((job, media));
        }
        Ok(render_reports(&rosters))
    }

    /// Run the monitor of `cluster` until `stop` fires or its termination
    /// policy is satisfied.
    pub async fn run_monitor(
        &self,
        cluster: &str,
        poll_interval: Duration,
        stop: watch::Receiver<bool>,
    ) -> MonitorResult<MonitorOutcome> {
        let monitor = self.monitor(cluster, poll_interval)?;
        Ok(monitor.run(stop).await)
    }

    /// Run the monitor of `cluster` on its own task.
    pub fn spawn_monitor(&self, cluster: &str, poll_interval: Duration) -> MonitorResult<MonitorHandle> {
        Ok(self.monitor(cluster, poll_interval)?.spawn())
    }

    /// Spawn a monitor for every watched cluster.
    pub fn spawn_all(&self) -> MonitorResult<Vec<MonitorHandle>> {
        let mut names: Vec<&str> = self.clusters().collect();
        names.sort_unstable();
        names
            .into_iter()
            .map(|cluster| self.spawn_monitor(cluster, self.settings.poll_interval))
            .collect()
    }

    fn cluster(&self, cluster: &str) -> MonitorResult<&ClusterWatch> {
        self.clusters
            .get(cluster)
            .ok_or_else(|| MonitorError::UnknownCluster(cluster.to_string()))
    }

    fn monitor(&self, cluster: &str, poll_interval: Duration) -> MonitorResult<Monitor> {
        let watch = self.cluster(cluster)?;
        let settings = MonitorSettings {
            poll_interval,
            ..self.settings.clone()
        };
        Ok(
            Monitor::new(&watch.cluster, watch.queues.clone(), Arc::clone(&self.store), settings)
                .with_scaling(Arc::clone(&self.scaling), watch.scaling_group.clone())
                .with_kind(watch.kind),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsa_queue::{MemoryQueue, WorkQueue};
    use dsa_store::MediaChange;

    fn tracker() -> (Tracker, Arc<MemoryQueue>) {
        let store = Arc::new(StatusStore::open_in_memory().unwrap());
        let submitted = Arc::new(MemoryQueue::new("submitted"));
        let queues = ClusterQueues::new(
            submitted.clone() as Arc<dyn WorkQueue>,
            Arc::new(MemoryQueue::new("completed")),
            Arc::new(MemoryQueue::new("failed")),
        );
        let mut tracker = Tracker::new(store, MonitorSettings::default());
        tracker.watch(
            ClusterWatch::new("c1", queues).with_submitter(submitted.clone() as Arc<dyn WorkSubmitter>),
        );
        (tracker, submitted)
    }

    #[test]
    fn test_record_submission_twice_keeps_one_job() {
        let (tracker, _) = tracker();
        let meta = Metadata::new();

        let first = tracker
            .record_submission("dive-42", "c1", "D1377/a.mp4", JobKind::ClusterScheduled, &meta)
            .unwrap();
        let second = tracker
            .record_submission("dive-42", "c1", "D1377/a.mp4", JobKind::ClusterScheduled, &meta)
            .unwrap();

        assert_eq!(first.change, MediaChange::Created);
        assert_eq!(second.change, MediaChange::Unchanged);
        assert_eq!(tracker.store().jobs_named("dive-42").unwrap().len(), 1);
        assert_eq!(tracker.job_status("dive-42", "c1").unwrap(), Status::Queued);
    }

    #[test]
    fn test_unknown_job_status() {
        let (tracker, _) = tracker();
        assert_eq!(tracker.job_status("nope", "c1").unwrap(), Status::Unknown);
    }

    #[test]
    fn test_report_covers_every_cluster() {
        let (tracker, _) = tracker();
        let meta = Metadata::new();
        tracker
            .record_submission("dive-42", "c1", "a.mp4", JobKind::ClusterScheduled, &meta)
            .unwrap();
        tracker
            .record_submission("dive-42", "c2", "b.mp4", JobKind::ManagedTraining, &meta)
            .unwrap();

        let text = tracker.report("dive-42").unwrap();
        assert!(text.contains("Cluster: c1"));
        assert!(text.contains("Cluster: c2"));
        assert!(tracker.report("missing").is_err());
    }

    #[tokio::test]
    async fn test_submit_sends_and_records() {
        let (tracker, submitted) = tracker();
        let submission = Submission {
            job_name: "dive-42".into(),
            cluster: "c1".into(),
            video: "D1377/a.mp4".into(),
            user_name: "ops".into(),
            clean: true,
            args: None,
        };

        let message_id = tracker
            .submit(&submission, JobKind::ClusterScheduled)
            .await
            .unwrap();

        assert_eq!(submitted.len(), 1);
        let job = tracker.store().find_job("dive-42", "c1").unwrap().unwrap();
        let media = tracker.store().find_media(job.id, "a.mp4").unwrap().unwrap();
        assert_eq!(media.metadata_str("submitted_message_id"), Some(message_id));
    }

    #[tokio::test]
    async fn test_unknown_cluster_is_rejected() {
        let (tracker, _) = tracker();
        let (_stop, stop_rx) = watch::channel(false);
        let result = tracker
            .run_monitor("c9", Duration::from_secs(1), stop_rx)
            .await;
        assert!(matches!(result, Err(MonitorError::UnknownCluster(_))));
    }
}
