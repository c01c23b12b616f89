//! Job lookup and lazy creation.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use dsa_models::{derive_job_status, Job, JobId, JobKind, Status};

use crate::error::{StoreError, StoreResult};
use crate::store::{now_micros, row_to_job, StatusStore, JOB_COLUMNS};

impl StatusStore {
    /// Find a job by its natural key.
    pub fn find_job(&self, name: &str, cluster: &str) -> StoreResult<Option<Job>> {
        let conn = self.lock()?;
        find_job(&conn, name, cluster)
    }

    /// Create a job, or return the existing one for the same `(name, cluster)`.
    pub fn create_job(&self, name: &str, cluster: &str, kind: JobKind) -> StoreResult<Job> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let (job, _) = get_or_create_job(&tx, name, cluster, kind)?;
        tx.commit()?;
        Ok(job)
    }

    /// Get a job by id.
    pub fn job(&self, job_id: JobId) -> StoreResult<Option<Job>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id.get()],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// All jobs on a cluster, oldest first.
    pub fn jobs_for_cluster(&self, cluster: &str) -> StoreResult<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE engine = ?1 ORDER BY id",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![cluster], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// All jobs with a given name across clusters, oldest first.
    pub fn jobs_named(&self, name: &str) -> StoreResult<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE name = ?1 ORDER BY id",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![name], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Aggregate status of a job, derived from its media.
    pub fn job_status(&self, job_id: JobId) -> StoreResult<Status> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT status FROM media WHERE job_id = ?1")?;
        let statuses = stmt
            .query_map(params![job_id.get()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let statuses = statuses
            .iter()
            .map(|s| s.parse::<Status>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::invalid_input(e.to_string()))?;

        Ok(derive_job_status(statuses))
    }

    /// Delete a job and, by cascade, all of its media.
    ///
    /// Operator tooling only; the reconciler never deletes jobs.
    pub fn delete_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id.get()])?;
        if deleted == 0 {
            return Err(StoreError::not_found(format!("job {}", job_id)));
        }
        tx.commit()?;
        info!(job_id = %job_id, "Deleted job");
        Ok(())
    }
}

pub(crate) fn find_job(conn: &Connection, name: &str, cluster: &str) -> StoreResult<Option<Job>> {
    let job = conn
        .query_row(
            &format!("SELECT {} FROM jobs WHERE name = ?1 AND engine = ?2", JOB_COLUMNS),
            params![name, cluster],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

/// Look up a job by `(name, cluster)` and create it if absent.
///
/// Returns the job and whether it was created by this call. The unique
/// index on `(name, engine)` makes the insert a no-op if another writer got
/// there first.
pub(crate) fn get_or_create_job(
    conn: &Connection,
    name: &str,
    cluster: &str,
    kind: JobKind,
) -> StoreResult<(Job, bool)> {
    if name.trim().is_empty() || cluster.trim().is_empty() {
        return Err(StoreError::invalid_input("job name and cluster must not be empty"));
    }

    if let Some(job) = find_job(conn, name, cluster)? {
        return Ok((job, false));
    }

    let inserted = conn.execute(
        "INSERT INTO jobs (name, engine, job_type, created_at_us) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (name, engine) DO NOTHING",
        params![name, cluster, kind.as_str(), now_micros()],
    )?;

    let job = find_job(conn, name, cluster)?
        .ok_or_else(|| StoreError::not_found(format!("job {} on {}", name, cluster)))?;

    if inserted > 0 {
        info!(job = %name, cluster = %cluster, kind = %kind, "Added job to cache");
    }
    Ok((job, inserted > 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsa_models::Metadata;

    #[test]
    fn test_create_job_is_idempotent_per_pair() {
        let store = StatusStore::open_in_memory().unwrap();
        let first = store.create_job("dive-42", "c1", JobKind::ClusterScheduled).unwrap();
        let second = store.create_job("dive-42", "c1", JobKind::ManagedTraining).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.kind, JobKind::ClusterScheduled);
        assert_eq!(store.jobs_named("dive-42").unwrap().len(), 1);
    }

    #[test]
    fn test_same_name_on_other_cluster_is_a_different_job() {
        let store = StatusStore::open_in_memory().unwrap();
        let c1 = store.create_job("dive-42", "c1", JobKind::ClusterScheduled).unwrap();
        let c2 = store.create_job("dive-42", "c2", JobKind::ClusterScheduled).unwrap();

        assert_ne!(c1.id, c2.id);
        assert_eq!(store.jobs_named("dive-42").unwrap().len(), 2);
        assert_eq!(store.jobs_for_cluster("c2").unwrap(), vec![c2]);
    }

    #[test]
    fn test_find_unknown_job() {
        let store = StatusStore::open_in_memory().unwrap();
        assert!(store.find_job("missing", "c1").unwrap().is_none());
    }

    #[test]
    fn test_empty_name_rejected() {
        let store = StatusStore::open_in_memory().unwrap();
        assert!(matches!(
            store.create_job("", "c1", JobKind::ClusterScheduled),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_job_status_without_media_is_unknown() {
        let store = StatusStore::open_in_memory().unwrap();
        let job = store.create_job("dive-42", "c1", JobKind::ClusterScheduled).unwrap();
        assert_eq!(store.job_status(job.id).unwrap(), Status::Unknown);
    }

    #[test]
    fn test_delete_job_cascades_to_media() {
        let store = StatusStore::open_in_memory().unwrap();
        let job = store.create_job("dive-42", "c1", JobKind::ClusterScheduled).unwrap();
        store
            .upsert_media(job.id, "a.mp4", Status::Queued, &Metadata::new())
            .unwrap();

        store.delete_job(job.id).unwrap();

        assert!(store.job(job.id).unwrap().is_none());
        assert!(store.media_for_job(job.id).unwrap().is_empty());
        assert!(matches!(store.delete_job(job.id), Err(StoreError::NotFound(_))));
    }
}
