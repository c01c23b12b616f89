//! Media lookup and guarded upserts.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use dsa_models::{guarded_transition, merge_metadata, JobId, Media, Metadata, Status};

use crate::error::{StoreError, StoreResult};
use crate::store::{now_micros, row_to_media, StatusStore, MEDIA_COLUMNS};

/// What an upsert did to the stored media row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaChange {
    /// The media did not exist and was added
    Created,
    /// Status and/or metadata changed
    Updated,
    /// Nothing changed (duplicate delivery or guarded re-queue)
    Unchanged,
}

impl MediaChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaChange::Created => "created",
            MediaChange::Updated => "updated",
            MediaChange::Unchanged => "unchanged",
        }
    }
}

/// Result of [`StatusStore::upsert_media`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub media: Media,
    pub change: MediaChange,
}

impl StatusStore {
    /// Find a media item by name within a job.
    pub fn find_media(&self, job_id: JobId, name: &str) -> StoreResult<Option<Media>> {
        let conn = self.lock()?;
        find_media(&conn, job_id, name)
    }

    /// Find a media item whose metadata carries `key == value`.
    ///
    /// Used to tell apart runs of the same video by a remote identifier.
    pub fn find_media_by_metadata(
        &self,
        job_id: JobId,
        name: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<Option<Media>> {
        Ok(self
            .find_media(job_id, name)?
            .filter(|m| m.metadata_str(key).as_deref() == Some(value)))
    }

    /// All media of a job, sorted by name.
    pub fn media_for_job(&self, job_id: JobId) -> StoreResult<Vec<Media>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM media WHERE job_id = ?1 ORDER BY name",
            MEDIA_COLUMNS
        ))?;
        let media = stmt
            .query_map(params![job_id.get()], row_to_media)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(media)
    }

    /// Create a media item, or apply a guarded transition and metadata merge
    /// to the existing one.
    pub fn upsert_media(
        &self,
        job_id: JobId,
        name: &str,
        status: Status,
        metadata_patch: &Metadata,
    ) -> StoreResult<UpsertOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let outcome = upsert_media(&tx, job_id, name, status, metadata_patch)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Force a media status, bypassing the transition guard.
    ///
    /// Operator escape hatch (e.g. re-queueing a FAILED video by hand);
    /// never used by reconciliation.
    pub fn reset_media_status(&self, job_id: JobId, name: &str, status: Status) -> StoreResult<Media> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current = find_media(&tx, job_id, name)?
            .ok_or_else(|| StoreError::not_found(format!("media {} in job {}", name, job_id)))?;

        let updated_at = next_update_micros(current.updated_at.timestamp_micros());
        tx.execute(
            "UPDATE media SET status = ?1, updated_at_us = ?2 WHERE id = ?3",
            params![status.as_str(), updated_at, current.id.0],
        )?;
        let media = find_media(&tx, job_id, name)?
            .ok_or_else(|| StoreError::not_found(format!("media {} in job {}", name, job_id)))?;
        tx.commit()?;

        info!(
            job_id = %job_id,
            media = %name,
            from = %current.status,
            to = %status,
            "Media status reset by operator"
        );
        Ok(media)
    }
}

pub(crate) fn find_media(conn: &Connection, job_id: JobId, name: &str) -> StoreResult<Option<Media>> {
    let media = conn
        .query_row(
            &format!("SELECT {} FROM media WHERE job_id = ?1 AND name = ?2", MEDIA_COLUMNS),
            params![job_id.get(), name],
            row_to_media,
        )
        .optional()?;
    Ok(media)
}

/// Upsert inside an open transaction.
///
/// A rejected transition (terminal status receiving QUEUED) leaves the row
/// untouched, metadata included. Otherwise the patch is merged key-wise and
/// `updated_at` moves strictly forward when anything changed.
pub(crate) fn upsert_media(
    conn: &Connection,
    job_id: JobId,
    name: &str,
    status: Status,
    metadata_patch: &Metadata,
) -> StoreResult<UpsertOutcome> {
    if name.trim().is_empty() {
        return Err(StoreError::invalid_input("media name must not be empty"));
    }

    let Some(current) = find_media(conn, job_id, name)? else {
        let now = now_micros();
        conn.execute(
            "INSERT INTO media (job_id, name, status, metadata_json, created_at_us, updated_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                job_id.get(),
                name,
                status.as_str(),
                serde_json::to_string(metadata_patch)?,
                now
            ],
        )?;
        let media = find_media(conn, job_id, name)?
            .ok_or_else(|| StoreError::not_found(format!("media {} in job {}", name, job_id)))?;
        info!(job_id = %job_id, media = %name, status = %status, "Added media to job");
        return Ok(UpsertOutcome {
            media,
            change: MediaChange::Created,
        });
    };

    let next_status = guarded_transition(current.status, status);
    if next_status != status {
        debug!(
            job_id = %job_id,
            media = %name,
            current = %current.status,
            incoming = %status,
            "Ignoring transition into a finished media"
        );
        return Ok(UpsertOutcome {
            media: current,
            change: MediaChange::Unchanged,
        });
    }

    let mut metadata = current.metadata.clone();
    let metadata_changed = merge_metadata(&mut metadata, metadata_patch);
    if next_status == current.status && !metadata_changed {
        return Ok(UpsertOutcome {
            media: current,
            change: MediaChange::Unchanged,
        });
    }

    let updated_at = next_update_micros(current.updated_at.timestamp_micros());
    conn.execute(
        "UPDATE media SET status = ?1, metadata_json = ?2, updated_at_us = ?3 WHERE id = ?4",
        params![
            next_status.as_str(),
            serde_json::to_string(&metadata)?,
            updated_at,
            current.id.0
        ],
    )?;

    let media = find_media(conn, job_id, name)?
        .ok_or_else(|| StoreError::not_found(format!("media {} in job {}", name, job_id)))?;
    if current.status != next_status {
        info!(
            job_id = %job_id,
            media = %name,
            from = %current.status,
            to = %next_status,
            "Updated media status"
        );
    }
    Ok(UpsertOutcome {
        media,
        change: MediaChange::Updated,
    })
}

/// Timestamp for the next applied update, strictly after `previous_us`.
fn next_update_micros(previous_us: i64) -> i64 {
    now_micros().max(previous_us + 1)
}
