//! Transactional application of reconciliation batches.

use std::collections::HashSet;

use tracing::{debug, warn};

use dsa_models::{JobKind, Metadata, Status};

use crate::error::StoreResult;
use crate::jobs::get_or_create_job;
use crate::media::{upsert_media, MediaChange};
use crate::store::StatusStore;

/// One parsed delivery event, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    pub job_name: String,
    pub cluster: String,
    pub media_name: String,
    pub status: Status,
    pub metadata: Metadata,
}

/// Counts of what a batch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub jobs_created: usize,
    pub media_created: usize,
    pub media_updated: usize,
    pub media_unchanged: usize,
}

impl BatchSummary {
    pub fn applied(&self) -> usize {
        self.media_created + self.media_updated + self.media_unchanged
    }

    fn record(&mut self, change: MediaChange) {
        match change {
            MediaChange::Created => self.media_created += 1,
            MediaChange::Updated => self.media_updated += 1,
            MediaChange::Unchanged => self.media_unchanged += 1,
        }
    }
}

impl StatusStore {
    /// Apply a batch of events in one transaction, in receipt order.
    ///
    /// Jobs referenced for the first time are created with `kind`. Any
    /// failure rolls the whole batch back; retrying it later is safe since
    /// transitions are monotonic.
    pub fn apply_batch(&self, kind: JobKind, events: &[MediaEvent]) -> StoreResult<BatchSummary> {
        let mut summary = BatchSummary::default();
        if events.is_empty() {
            return Ok(summary);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut created_jobs = HashSet::new();

        for event in events {
            let (job, created) = get_or_create_job(&tx, &event.job_name, &event.cluster, kind)?;
            if created && created_jobs.insert(job.id) {
                warn!(
                    job = %event.job_name,
                    cluster = %event.cluster,
                    "Job not found in cache, created from queue event"
                );
                summary.jobs_created += 1;
            }
            let outcome = upsert_media(&tx, job.id, &event.media_name, event.status, &event.metadata)?;
            summary.record(outcome.change);
        }

        tx.commit()?;
        debug!(?summary, "Committed reconciliation batch");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn event(job: &str, media: &str, status: Status) -> MediaEvent {
        MediaEvent {
            job_name: job.to_string(),
            cluster: "c1".to_string(),
            media_name: media.to_string(),
            status,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_batch_lazily_creates_one_job() {
        let store = StatusStore::open_in_memory().unwrap();
        let summary = store
            .apply_batch(
                JobKind::ClusterScheduled,
                &[
                    event("dive-42", "a.mp4", Status::Queued),
                    event("dive-42", "b.mp4", Status::Queued),
                    event("dive-42", "a.mp4", Status::Success),
                ],
            )
            .unwrap();

        assert_eq!(summary.jobs_created, 1);
        assert_eq!(summary.media_created, 2);
        assert_eq!(summary.media_updated, 1);
        assert_eq!(summary.applied(), 3);

        let job = store.find_job("dive-42", "c1").unwrap().unwrap();
        assert_eq!(store.job_status(job.id).unwrap(), Status::Queued);
    }

    #[test]
    fn test_batch_is_order_independent_for_terminal_events() {
        let forward = StatusStore::open_in_memory().unwrap();
        let backward = StatusStore::open_in_memory().unwrap();
        let mut events = vec![
            event("dive-42", "a.mp4", Status::Queued),
            event("dive-42", "a.mp4", Status::Success),
            event("dive-42", "a.mp4", Status::Queued),
        ];

        forward.apply_batch(JobKind::ClusterScheduled, &events).unwrap();
        events.reverse();
        backward.apply_batch(JobKind::ClusterScheduled, &events).unwrap();

        for store in [forward, backward] {
            let job = store.find_job("dive-42", "c1").unwrap().unwrap();
            let media = store.find_media(job.id, "a.mp4").unwrap().unwrap();
            assert_eq!(media.status, Status::Success);
        }
    }

    #[test]
    fn test_failed_batch_rolls_back_entirely() {
        let store = StatusStore::open_in_memory().unwrap();
        let result = store.apply_batch(
            JobKind::ClusterScheduled,
            &[
                event("dive-42", "a.mp4", Status::Queued),
                event("dive-42", "", Status::Queued),
            ],
        );

        assert!(matches!(result, Err(StoreError::InvalidInput(_))));
        assert!(store.find_job("dive-42", "c1").unwrap().is_none());
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let store = StatusStore::open_in_memory().unwrap();
        let summary = store.apply_batch(JobKind::ClusterScheduled, &[]).unwrap();
        assert_eq!(summary, BatchSummary::default());
    }
}
