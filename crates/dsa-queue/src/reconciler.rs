//! Queue reconciler.
//!
//! Drains the submitted/completed/failed queues of one cluster without
//! consuming them and folds every envelope into the status store.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use dsa_models::JobKind;
use dsa_store::{BatchSummary, MediaEvent, StatusStore};

use crate::envelope::Envelope;
use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::queue::{PollConfig, RawEnvelope};
use crate::role::{ClusterQueues, QueueRole, WatchedQueue};

/// Outcome of draining one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    pub role: QueueRole,
    /// Poll calls issued
    pub polls: usize,
    /// Distinct messages seen
    pub received: usize,
    /// Messages dropped because their body could not be parsed
    pub malformed: usize,
    pub summary: BatchSummary,
    /// Poll failure that cut the drain short, if any
    pub poll_error: Option<String>,
}

impl DrainReport {
    fn new(role: QueueRole) -> Self {
        Self {
            role,
            polls: 0,
            received: 0,
            malformed: 0,
            summary: BatchSummary::default(),
            poll_error: None,
        }
    }
}

/// Outcome of one pass over all three queues of a cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub drains: Vec<DrainReport>,
    /// Sum of visible messages across the queues whose depth was readable
    pub visible_total: u64,
    /// Queues whose batch could not be applied this pass
    pub failed_batches: usize,
}

impl ReconcileReport {
    pub fn drain(&self, role: QueueRole) -> Option<&DrainReport> {
        self.drains.iter().find(|d| d.role == role)
    }
}

/// Folds queue traffic of one cluster into the status store.
pub struct QueueReconciler {
    store: Arc<StatusStore>,
    config: PollConfig,
    cluster: String,
    kind: JobKind,
}

impl QueueReconciler {
    /// `kind` is used for jobs first seen through a queue message.
    pub fn new(store: Arc<StatusStore>, cluster: impl Into<String>, kind: JobKind, config: PollConfig) -> Self {
        Self {
            store,
            config,
            cluster: cluster.into(),
            kind,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Peek at every message of one queue and apply them in one batch.
    ///
    /// A poll failure ends the drain early; whatever was gathered before it
    /// is still applied. Only a store failure is returned as an error, in
    /// which case nothing from this drain was applied.
    pub async fn drain(&self, watched: &WatchedQueue) -> QueueResult<DrainReport> {
        let role = watched.role;
        let mut report = DrainReport::new(role);
        let mut seen: HashSet<String> = HashSet::new();
        let mut events: Vec<MediaEvent> = Vec::new();

        while report.polls < self.config.max_polls_per_drain {
            report.polls += 1;
            let batch = match watched
                .queue
                .poll(self.config.batch_size(), self.config.wait)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        cluster = %self.cluster,
                        role = %role,
                        queue = watched.queue.name(),
                        error = %e,
                        "Poll failed, applying what was received so far"
                    );
                    metrics::record_poll_error(role.as_str());
                    report.poll_error = Some(e.to_string());
                    break;
                }
            };

            if batch.is_empty() {
                break;
            }

            let mut fresh = 0;
            for raw in batch {
                if !seen.insert(dedupe_key(&raw)) {
                    continue;
                }
                fresh += 1;
                report.received += 1;
                match Envelope::parse(&raw) {
                    Ok(envelope) => events.push(envelope.into_event(role, &self.cluster)),
                    Err(e) => {
                        warn!(
                            cluster = %self.cluster,
                            role = %role,
                            message_id = raw.message_id.as_deref().unwrap_or("-"),
                            body = %raw.body,
                            error = %e,
                            "Dropping malformed message"
                        );
                        report.malformed += 1;
                    }
                }
            }

            // Peeked messages come round again once their visibility lapses
            if fresh == 0 {
                break;
            }
        }

        if report.polls >= self.config.max_polls_per_drain {
            debug!(
                cluster = %self.cluster,
                role = %role,
                polls = report.polls,
                "Drain stopped at poll limit"
            );
        }

        report.summary = self.apply(events).await?;

        metrics::record_envelopes(role.as_str(), "created", report.summary.media_created);
        metrics::record_envelopes(role.as_str(), "updated", report.summary.media_updated);
        metrics::record_envelopes(role.as_str(), "unchanged", report.summary.media_unchanged);
        metrics::record_envelopes(role.as_str(), "dropped", report.malformed);

        if report.received > 0 {
            info!(
                cluster = %self.cluster,
                role = %role,
                received = report.received,
                created = report.summary.media_created,
                updated = report.summary.media_updated,
                unchanged = report.summary.media_unchanged,
                dropped = report.malformed,
                "Reconciled queue"
            );
        }

        Ok(report)
    }

    /// Read depth and drain every queue of the cluster.
    ///
    /// Never fails: collaborator and store errors are logged and leave the
    /// affected queue for the next pass.
    pub async fn reconcile_all(&self, queues: &ClusterQueues) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for watched in queues.iter() {
            let role = watched.role;
            match watched.queue.depth().await {
                Ok(depth) => {
                    info!(
                        cluster = %self.cluster,
                        role = %role,
                        visible = depth.visible,
                        in_flight = depth.in_flight,
                        "Queue depth"
                    );
                    metrics::record_queue_visible(&self.cluster, role.as_str(), depth.visible);
                    report.visible_total += depth.visible;
                }
                Err(e) => {
                    warn!(cluster = %self.cluster, role = %role, error = %e, "Queue depth unavailable");
                }
            }

            match self.drain(watched).await {
                Ok(drain) => report.drains.push(drain),
                Err(e) => {
                    warn!(
                        cluster = %self.cluster,
                        role = %role,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Batch not applied, will retry next cycle"
                    );
                    report.failed_batches += 1;
                }
            }
        }

        report
    }

    async fn apply(&self, events: Vec<MediaEvent>) -> QueueResult<BatchSummary> {
        if events.is_empty() {
            return Ok(BatchSummary::default());
        }

        let store = Arc::clone(&self.store);
        let kind = self.kind;
        let summary = tokio::task::spawn_blocking(move || store.apply_batch(kind, &events))
            .await
            .map_err(|e| QueueError::TaskFailed(e.to_string()))??;
        Ok(summary)
    }
}

/// Identity of a peeked message within one drain.
fn dedupe_key(raw: &RawEnvelope) -> String {
    match &raw.message_id {
        Some(id) => format!("id:{}", id),
        None => format!("body:{}", raw.body),
    }
}
