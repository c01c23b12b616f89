//! SQLite connection management, schema and row mapping.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use tracing::info;

use dsa_models::{Job, JobId, JobKind, Media, MediaId, Metadata, Status};

use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      name TEXT NOT NULL,
      engine TEXT NOT NULL,
      job_type TEXT NOT NULL,
      created_at_us INTEGER NOT NULL,
      UNIQUE (name, engine)
    );

    CREATE TABLE IF NOT EXISTS media (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
      name TEXT NOT NULL,
      status TEXT NOT NULL,
      metadata_json TEXT NOT NULL DEFAULT '{}',
      created_at_us INTEGER NOT NULL,
      updated_at_us INTEGER NOT NULL,
      UNIQUE (job_id, name)
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_engine ON jobs(engine);
"#;

/// Durable record of jobs and their media.
///
/// One instance per process, shared between monitors behind an `Arc`. The
/// connection is serialized by a mutex and every mutation runs in a
/// transaction.
#[derive(Debug)]
pub struct StatusStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl StatusStore {
    /// Open (or create) the job cache at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open a private in-memory job cache.
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open the job cache for a deployment account under `dir`.
    ///
    /// Each account gets its own database file so caches of different
    /// environments never mix. With `reset` the tables are dropped first.
    pub fn open_for_account(dir: impl AsRef<Path>, account: &str, reset: bool) -> StoreResult<Self> {
        if account.trim().is_empty() {
            return Err(StoreError::invalid_input("account id must not be empty"));
        }
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("sqlite_job_cache_{}.db", account));
        info!("Initializing job cache database at {}", path.display());

        let store = Self::open(&path)?;
        if reset {
            store.reset()?;
        }
        Ok(store)
    }

    /// Location of the database file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Drop every job and media row and recreate the schema.
    pub fn reset(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("DROP TABLE IF EXISTS media; DROP TABLE IF EXISTS jobs;")?;
        conn.execute_batch(SCHEMA)?;
        info!("Job cache reset");
        Ok(())
    }

    fn migrate(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

pub(crate) const JOB_COLUMNS: &str = "id, name, engine, job_type, created_at_us";

pub(crate) const MEDIA_COLUMNS: &str =
    "id, job_id, name, status, metadata_json, created_at_us, updated_at_us";

pub(crate) fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let kind: String = row.get(3)?;
    let kind = kind
        .parse::<JobKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Job {
        id: JobId(row.get(0)?),
        name: row.get(1)?,
        cluster: row.get(2)?,
        kind,
        created_at: from_micros(row.get(4)?),
    })
}

pub(crate) fn row_to_media(row: &Row<'_>) -> rusqlite::Result<Media> {
    let status: String = row.get(3)?;
    let status = status
        .parse::<Status>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let metadata_json: String = row.get(4)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Media {
        id: MediaId(row.get(0)?),
        job_id: JobId(row.get(1)?),
        name: row.get(2)?,
        status,
        metadata,
        created_at: from_micros(row.get(5)?),
        updated_at: from_micros(row.get(6)?),
    })
}

pub(crate) fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

pub(crate) fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}
