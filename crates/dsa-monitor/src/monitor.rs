//! Per-cluster monitor.
//!
//! A monitor repeatedly polls one cluster: it probes recent scaling activity,
//! reconciles the cluster's three queues into the status store, and writes a
//! report for every job of the cluster whenever anything is happening.
//!
//! ```text
//! STARTING -> POLLING -> REPORTING | IDLE -> (sleep) -> POLLING ... -> STOPPED
//! ```
//!
//! A monitor runs until its stop signal fires, or until its
//! [`TerminationPolicy`] says the cluster is done.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{warn, Instrument};
use uuid::Uuid;

use dsa_models::{derive_job_status, Job, JobKind, JobProgress, Media};
use dsa_queue::{ClusterQueues, PollConfig, QueueReconciler, ReconcileReport};
use dsa_store::StatusStore;

use crate::error::{MonitorError, MonitorResult};
use crate::logging::MonitorLogger;
use crate::metrics;
use crate::report::ReportGenerator;
use crate::scaling::{probe_scaling, NoScaling, ScalingHistory, DEFAULT_ACTIVITY_RECORDS};

/// When a monitor stops without being told to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationPolicy {
    /// Run until stopped
    #[default]
    Never,
    /// Stop at the first cycle without any activity
    OnIdle,
    /// Stop once every job of the cluster with media has a terminal status
    WhenAllTerminal,
}

impl TerminationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationPolicy::Never => "never",
            TerminationPolicy::OnIdle => "on_idle",
            TerminationPolicy::WhenAllTerminal => "when_all_terminal",
        }
    }
}

impl fmt::Display for TerminationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminationPolicy {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "never" => Ok(TerminationPolicy::Never),
            "on_idle" | "idle" => Ok(TerminationPolicy::OnIdle),
            "when_all_terminal" | "all_terminal" => Ok(TerminationPolicy::WhenAllTerminal),
            other => Err(MonitorError::config_error(format!(
                "unknown termination policy: {}",
                other
            ))),
        }
    }
}

/// Monitor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Polling,
    Reporting,
    Idle,
    Stopped,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Starting => "starting",
            MonitorState::Polling => "polling",
            MonitorState::Reporting => "reporting",
            MonitorState::Idle => "idle",
            MonitorState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by every monitor of a process.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub termination: TerminationPolicy,
    pub report_dir: PathBuf,
    /// Scaling activities requested per cycle
    pub scaling_records: usize,
    pub poll: PollConfig,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            termination: TerminationPolicy::Never,
            report_dir: PathBuf::from("reports"),
            scaling_records: DEFAULT_ACTIVITY_RECORDS,
            poll: PollConfig::default(),
        }
    }
}

/// What one polling cycle saw and did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    /// `Reporting` or `Idle`
    pub state: MonitorState,
    pub visible_messages: u64,
    pub scaling_activities: usize,
    pub reports_written: usize,
    /// Every job of the cluster with media has a terminal status (and
    /// there is at least one such job)
    pub all_terminal: bool,
    pub reconcile: ReconcileReport,
}

impl CycleReport {
    /// Combined activity that decides between reporting and idling.
    pub fn activity(&self) -> u64 {
        self.visible_messages + self.scaling_activities as u64
    }
}

/// Why a monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop signal fired, or its sender was dropped
    Signal,
    /// The termination policy was satisfied
    Policy(TerminationPolicy),
}

/// Summary of a finished monitor run.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorOutcome {
    pub cluster: String,
    pub cycles: u64,
    pub reason: StopReason,
    pub last_cycle: Option<CycleReport>,
    /// Reports written by the final pass after a policy stop
    pub final_reports: usize,
}

/// Monitors one cluster.
pub struct Monitor {
    cluster: String,
    scaling_group: Option<String>,
    queues: ClusterQueues,
    store: Arc<StatusStore>,
    scaling: Arc<dyn ScalingHistory>,
    reconciler: QueueReconciler,
    reports: ReportGenerator,
    settings: MonitorSettings,
    logger: MonitorLogger,
}

impl Monitor {
    /// Create a monitor with no scaling group; jobs first seen through a
    /// queue are recorded as cluster-scheduled.
    pub fn new(
        cluster: impl Into<String>,
        queues: ClusterQueues,
        store: Arc<StatusStore>,
        settings: MonitorSettings,
    ) -> Self {
        let cluster = cluster.into();
        let monitor_id = format!("monitor-{}", Uuid::new_v4());
        let reconciler = QueueReconciler::new(
            Arc::clone(&store),
            cluster.clone(),
            JobKind::ClusterScheduled,
            settings.poll.clone(),
        );

        Self {
            logger: MonitorLogger::new(&cluster, &monitor_id),
            reports: ReportGenerator::new(settings.report_dir.clone()),
            cluster,
            scaling_group: None,
            queues,
            store,
            scaling: Arc::new(NoScaling),
            reconciler,
            settings,
        }
    }

    /// Probe `group` through `history` each cycle.
    pub fn with_scaling(mut self, history: Arc<dyn ScalingHistory>, group: Option<String>) -> Self {
        self.scaling = history;
        self.scaling_group = group.filter(|g| !g.trim().is_empty());
        self
    }

    /// Kind given to jobs first seen through a queue message.
    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.reconciler = QueueReconciler::new(
            Arc::clone(&self.store),
            self.cluster.clone(),
            kind,
            self.settings.poll.clone(),
        );
        self
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Run one POLLING cycle followed by REPORTING or IDLE.
    pub async fn run_once(&self, cycle: u64) -> CycleReport {
        self.logger
            .log_cycle(MonitorState::Polling.as_str(), &format!("Polling cycle {}", cycle));

        let scaling_activities = probe_scaling(
            self.scaling.as_ref(),
            &self.cluster,
            self.scaling_group.as_deref(),
            self.settings.scaling_records,
        )
        .await;
        let reconcile = self.reconciler.reconcile_all(&self.queues).await;

        let mut report = CycleReport {
            cycle,
            state: MonitorState::Idle,
            visible_messages: reconcile.visible_total,
            scaling_activities,
            reports_written: 0,
            all_terminal: false,
            reconcile,
        };

        let needs_rosters = report.activity() > 0
            || self.settings.termination == TerminationPolicy::WhenAllTerminal;
        let rosters = if needs_rosters {
            match self.rosters().await {
                Ok(rosters) => rosters,
                Err(e) => {
                    self.logger.log_warning(&format!("Could not load jobs: {}", e));
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        report.all_terminal = !rosters.is_empty()
            && rosters
                .iter()
                .all(|(_, media)| derive_job_status(media.iter().map(|m| m.status)).is_terminal());

        if report.activity() > 0 {
            report.state = MonitorState::Reporting;
            self.logger.log_cycle(
                MonitorState::Reporting.as_str(),
                &format!(
                    "Activity: {} visible messages, {} scaling activities",
                    report.visible_messages, report.scaling_activities
                ),
            );
            report.reports_written = self.write_reports(&rosters).await;
        } else {
            self.logger
                .log_cycle(MonitorState::Idle.as_str(), "No activity detected");
        }

        metrics::record_cycle(&self.cluster, report.state.as_str());
        report
    }

    /// Run cycles until stopped.
    ///
    /// `stop` is checked after every cycle and interrupts the sleep between
    /// cycles. Dropping its sender stops the monitor as well.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> MonitorOutcome {
        self.logger.log_start(&format!(
            "state={}, interval={:?}, termination={}",
            MonitorState::Starting,
            self.settings.poll_interval,
            self.settings.termination
        ));

        let mut outcome = MonitorOutcome {
            cluster: self.cluster.clone(),
            cycles: 0,
            reason: StopReason::Signal,
            last_cycle: None,
            final_reports: 0,
        };

        loop {
            if *stop.borrow() {
                break;
            }

            outcome.cycles += 1;
            let report = self.run_once(outcome.cycles).await;
            let terminate = self.policy_satisfied(&report);
            outcome.last_cycle = Some(report);

            if terminate {
                outcome.reason = StopReason::Policy(self.settings.termination);
                outcome.final_reports = self.final_reports().await;
                break;
            }
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.logger.log_stop(&format!(
            "state={}, cycles={}, reason={:?}",
            MonitorState::Stopped,
            outcome.cycles,
            outcome.reason
        ));
        outcome
    }

    /// Run on a new task, returning a handle to stop and join it.
    pub fn spawn(self) -> MonitorHandle {
        let (stop, stop_rx) = watch::channel(false);
        let cluster = self.cluster.clone();
        let span = self.logger.create_span();
        let task = tokio::spawn(async move { self.run(stop_rx).await }.instrument(span));
        MonitorHandle { cluster, stop, task }
    }

    fn policy_satisfied(&self, report: &CycleReport) -> bool {
        match self.settings.termination {
            TerminationPolicy::Never => false,
            TerminationPolicy::OnIdle => report.state == MonitorState::Idle,
            TerminationPolicy::WhenAllTerminal => report.all_terminal,
        }
    }

    async fn final_reports(&self) -> usize {
        match self.rosters().await {
            Ok(rosters) => self.write_reports(&rosters).await,
            Err(e) => {
                self.logger
                    .log_warning(&format!("Final report pass skipped: {}", e));
                0
            }
        }
    }

    /// Jobs of this cluster that have at least one media item, with their media.
    async fn rosters(&self) -> MonitorResult<Vec<(Job, Vec<Media>)>> {
        let store = Arc::clone(&self.store);
        let cluster = self.cluster.clone();
        tokio::task::spawn_blocking(move || -> MonitorResult<Vec<(Job, Vec<Media>)>> {
            let mut rosters = Vec::new();
            for job in store.jobs_for_cluster(&cluster)? {
                let media = store.media_for_job(job.id)?;
                if !media.is_empty() {
                    rosters.push((job, media));
                }
            }
            Ok(rosters)
        })
        .await
        .map_err(|e| MonitorError::TaskFailed(e.to_string()))?
    }

    /// Every job named `job_name` with media, across clusters.
    async fn named_rosters(&self, job_name: &str) -> MonitorResult<Vec<(Job, Vec<Media>)>> {
        let store = Arc::clone(&self.store);
        let job_name = job_name.to_string();
        tokio::task::spawn_blocking(move || -> MonitorResult<Vec<(Job, Vec<Media>)>> {
            let mut rosters = Vec::new();
            for job in store.jobs_named(&job_name)? {
                let media = store.media_for_job(job.id)?;
                if !media.is_empty() {
                    rosters.push((job, media));
                }
            }
            Ok(rosters)
        })
        .await
        .map_err(|e| MonitorError::TaskFailed(e.to_string()))?
    }

    async fn write_reports(&self, rosters: &[(Job, Vec<Media>)]) -> usize {
        let mut written = 0;
        for (job, media) in rosters {
            let progress = JobProgress::from_media(media);
            self.logger.log_cycle(
                MonitorState::Reporting.as_str(),
                &format!(
                    "Job {}: {} completed, {} failed of {} ({})",
                    job.name, progress.completed, progress.failed, progress.total, progress.status
                ),
            );

            // The report file is shared by every cluster running a job of this name
            let result = match self.named_rosters(&job.name).await {
                Ok(named) => self.reports.write(&job.name, &named).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(_) => written += 1,
                Err(e) => warn!(
                    cluster = %self.cluster,
                    job = %job.name,
                    error = %e,
                    "Report not written"
                ),
            }
        }
        written
    }
}

/// Handle to a spawned monitor.
pub struct MonitorHandle {
    cluster: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<MonitorOutcome>,
}

impl MonitorHandle {
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Signal the monitor to stop after its current cycle.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the monitor to finish on its own.
    pub async fn join(self) -> MonitorResult<MonitorOutcome> {
        self.task
            .await
            .map_err(|e| MonitorError::TaskFailed(format!("{}: {}", self.cluster, e)))
    }

    /// Signal stop and wait at most `timeout` for the monitor to finish.
    ///
    /// A monitor still running after the timeout is aborted.
    pub async fn stop_and_join(mut self, timeout: Duration) -> MonitorResult<MonitorOutcome> {
        self.stop();
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(MonitorError::TaskFailed(format!("{}: {}", self.cluster, e))),
            Err(_) => {
                self.task.abort();
                Err(MonitorError::TaskFailed(format!(
                    "{}: did not stop within {:?}",
                    self.cluster, timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsa_models::Status;
    use dsa_queue::{MemoryQueue, WorkQueue};

    struct Fixture {
        store: Arc<StatusStore>,
        submitted: Arc<MemoryQueue>,
        completed: Arc<MemoryQueue>,
        failed: Arc<MemoryQueue>,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(StatusStore::open_in_memory().unwrap()),
                submitted: Arc::new(MemoryQueue::new("submitted")),
                completed: Arc::new(MemoryQueue::new("completed")),
                failed: Arc::new(MemoryQueue::new("failed")),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn monitor(&self, termination: TerminationPolicy, interval: Duration) -> Monitor {
            let queues = ClusterQueues::new(
                self.submitted.clone() as Arc<dyn WorkQueue>,
                self.completed.clone() as Arc<dyn WorkQueue>,
                self.failed.clone() as Arc<dyn WorkQueue>,
            );
            let settings = MonitorSettings {
                poll_interval: interval,
                termination,
                report_dir: self.dir.path().to_path_buf(),
                scaling_records: 10,
                poll: PollConfig {
                    wait: Duration::ZERO,
                    ..PollConfig::default()
                },
            };
            Monitor::new("c1", queues, Arc::clone(&self.store), settings)
        }

        fn report_count(&self) -> usize {
            std::fs::read_dir(self.dir.path()).map(|d| d.count()).unwrap_or(0)
        }
    }

    #[test]
    fn test_parse_termination_policy() {
        assert_eq!("never".parse::<TerminationPolicy>().unwrap(), TerminationPolicy::Never);
        assert_eq!("On-Idle".parse::<TerminationPolicy>().unwrap(), TerminationPolicy::OnIdle);
        assert_eq!(
            "when_all_terminal".parse::<TerminationPolicy>().unwrap(),
            TerminationPolicy::WhenAllTerminal
        );
        assert!("sometimes".parse::<TerminationPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_activity_triggers_reports() {
        let fx = Fixture::new();
        fx.submitted
            .push(r#"{"job_name": "dive-42", "video": "a.mp4"}"#)
            .unwrap();

        let report = fx
            .monitor(TerminationPolicy::Never, Duration::from_secs(60))
            .run_once(1)
            .await;

        assert_eq!(report.state, MonitorState::Reporting);
        assert_eq!(report.visible_messages, 1);
        assert_eq!(report.reports_written, 1);
        assert!(!report.all_terminal);
        assert_eq!(fx.report_count(), 1);
    }

    #[tokio::test]
    async fn test_idle_cycle_writes_nothing() {
        let fx = Fixture::new();
        let job = fx
            .store
            .create_job("dive-42", "c1", JobKind::ClusterScheduled)
            .unwrap();
        fx.store
            .upsert_media(job.id, "a.mp4", Status::Queued, &Default::default())
            .unwrap();

        let report = fx
            .monitor(TerminationPolicy::Never, Duration::from_secs(60))
            .run_once(1)
            .await;

        assert_eq!(report.state, MonitorState::Idle);
        assert_eq!(report.reports_written, 0);
        assert_eq!(fx.report_count(), 0);
    }

    #[tokio::test]
    async fn test_on_idle_policy_stops_with_final_reports() {
        let fx = Fixture::new();
        let job = fx
            .store
            .create_job("dive-42", "c1", JobKind::ClusterScheduled)
            .unwrap();
        fx.store
            .upsert_media(job.id, "a.mp4", Status::Success, &Default::default())
            .unwrap();

        let (_stop, stop_rx) = watch::channel(false);
        let outcome = fx
            .monitor(TerminationPolicy::OnIdle, Duration::from_secs(60))
            .run(stop_rx)
            .await;

        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.reason, StopReason::Policy(TerminationPolicy::OnIdle));
        assert_eq!(outcome.final_reports, 1);
        assert_eq!(fx.report_count(), 1);
    }

    #[tokio::test]
    async fn test_when_all_terminal_waits_for_terminal_jobs() {
        let fx = Fixture::new();
        fx.submitted
            .push(r#"{"job_name": "dive-42", "video": "a.mp4"}"#)
            .unwrap();
        let monitor = fx.monitor(TerminationPolicy::WhenAllTerminal, Duration::from_millis(10));

        let first = monitor.run_once(1).await;
        assert!(!first.all_terminal);

        fx.submitted.clear().unwrap();
        fx.completed
            .push(r#"{"job_name": "dive-42", "video": "a.tracks.tar.gz"}"#)
            .unwrap();

        let (_stop, stop_rx) = watch::channel(false);
        let outcome = monitor.run(stop_rx).await;
        assert_eq!(
            outcome.reason,
            StopReason::Policy(TerminationPolicy::WhenAllTerminal)
        );
        assert!(outcome.last_cycle.unwrap().all_terminal);
    }

    #[tokio::test]
    async fn test_stop_and_join_interrupts_sleep() {
        let fx = Fixture::new();
        let handle = fx
            .monitor(TerminationPolicy::Never, Duration::from_secs(3600))
            .spawn();
        assert_eq!(handle.cluster(), "c1");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let outcome = handle.stop_and_join(Duration::from_secs(5)).await.unwrap();

        assert_eq!(outcome.reason, StopReason::Signal);
        assert!(outcome.cycles >= 1);
    }

    #[tokio::test]
    async fn test_dropped_stop_sender_stops_monitor() {
        let fx = Fixture::new();
        let (stop, stop_rx) = watch::channel(false);
        drop(stop);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            fx.monitor(TerminationPolicy::Never, Duration::from_secs(3600))
                .run(stop_rx),
        )
        .await
        .unwrap();
        assert_eq!(outcome.reason, StopReason::Signal);
        assert_eq!(outcome.cycles, 1);
    }
}
