//! Job report generation.
//!
//! A report lists a job's media roster, one line per media item sorted by
//! name, under a header carrying the job's aggregate status. Jobs sharing a
//! name on different clusters go into one file, `{job name}_{YYYYMMDD}.txt`
//! (spaces and path separators replaced by underscores, UTC date), so the
//! report of a day is rewritten in place on every cycle.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use dsa_models::{derive_job_status, Job, Media};

use crate::error::{MonitorError, MonitorResult};
use crate::metrics;

/// Product banner opening every report.
pub const REPORT_BANNER: &str = "DeepSea-AI";

const RULE: &str =
    "==============================================================================================";

const COLUMNS: &str = "Index, Media, Created, Last Updated, Status";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// File name of the report of `job_name` for the UTC day of `now`.
pub fn report_file_name(job_name: &str, now: DateTime<Utc>) -> String {
    let stem: String = job_name
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    format!("{}_{}.txt", stem, now.format("%Y%m%d"))
}

/// Render a job report.
pub fn render_report(job: &Job, media: &[Media]) -> String {
    let mut sorted: Vec<&Media> = media.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let status = derive_job_status(media.iter().map(|m| m.status));

    let mut out = String::new();
    let _ = writeln!(out, "{} {}", REPORT_BANNER, env!("CARGO_PKG_VERSION"));
    let _ = writeln!(
        out,
        "Job: {}, Cluster: {}, Total media: {}, Created at: {}, Status: {}",
        job.name,
        job.cluster,
        media.len(),
        job.created_at.format(TIME_FORMAT),
        status
    );
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "{}", COLUMNS);
    for (index, m) in sorted.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}, {}, {}, {}, {}",
            index,
            m.name,
            m.created_at.format(TIME_FORMAT),
            m.updated_at.format(TIME_FORMAT),
            m.status
        );
    }
    out
}

/// Render the reports of several jobs, separated by a blank line.
pub fn render_reports(rosters: &[(Job, Vec<Media>)]) -> String {
    rosters
        .iter()
        .map(|(job, media)| render_report(job, media))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writes job reports into a directory.
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write today's report of every job in `rosters` named `job_name`,
    /// returning its path.
    pub async fn write(
        &self,
        job_name: &str,
        rosters: &[(Job, Vec<Media>)],
    ) -> MonitorResult<PathBuf> {
        self.write_at(job_name, rosters, Utc::now()).await
    }

    /// Write the report of `job_name` dated `now`.
    ///
    /// The report is written in full to a temporary sibling unique to this
    /// write and renamed over the target, so readers never see a partial
    /// report, even with several monitors writing the same file.
    pub async fn write_at(
        &self,
        job_name: &str,
        rosters: &[(Job, Vec<Media>)],
        now: DateTime<Utc>,
    ) -> MonitorResult<PathBuf> {
        fs::create_dir_all(&self.dir).await?;

        let file_name = report_file_name(job_name, now);
        let target = self.dir.join(&file_name);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let contents = render_reports(rosters);
        if let Err(e) = fs::write(&tmp, contents.as_bytes()).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(MonitorError::report_failed(format!("{}: {}", tmp.display(), e)));
        }

        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(MonitorError::report_failed(format!(
                "{}: {}",
                target.display(),
                e
            )));
        }

        let media: usize = rosters.iter().map(|(_, media)| media.len()).sum();
        debug!(job = %job_name, path = %target.display(), "Report written");
        info!(
            job = %job_name,
            clusters = rosters.len(),
            media,
            "Created job report {}",
            target.display()
        );
        metrics::record_report_written();
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dsa_models::{JobId, JobKind, MediaId, Metadata, Status};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 1, hour, 0, 0).unwrap()
    }

    fn job(name: &str) -> Job {
        job_on(name, "c1")
    }

    fn job_on(name: &str, cluster: &str) -> Job {
        Job {
            id: JobId(1),
            name: name.to_string(),
            cluster: cluster.to_string(),
            kind: JobKind::ClusterScheduled,
            created_at: at(8),
        }
    }

    fn media(id: i64, name: &str, status: Status) -> Media {
        Media {
            id: MediaId(id),
            job_id: JobId(1),
            name: name.to_string(),
            status,
            metadata: Metadata::new(),
            created_at: at(9),
            updated_at: at(10),
        }
    }

    #[test]
    fn test_report_file_name() {
        assert_eq!(report_file_name("dive 42 run", at(0)), "dive_42_run_20230501.txt");
    }

    #[test]
    fn test_report_file_name_stays_in_directory() {
        assert_eq!(report_file_name("../escaped", at(0)), ".._escaped_20230501.txt");
        assert_eq!(report_file_name("a\\b/c", at(0)), "a_b_c_20230501.txt");
    }

    #[test]
    fn test_render_sorts_media_and_shows_aggregate() {
        let roster = vec![
            media(1, "b.mp4", Status::Queued),
            media(2, "a.mp4", Status::Success),
        ];
        let text = render_report(&job("dive-42"), &roster);
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("DeepSea-AI "));
        assert_eq!(
            lines[1],
            "Job: dive-42, Cluster: c1, Total media: 2, Created at: 2023-05-01 08:00:00, Status: QUEUED"
        );
        assert_eq!(lines[2], RULE);
        assert_eq!(lines[3], COLUMNS);
        assert_eq!(
            lines[4],
            "0, a.mp4, 2023-05-01 09:00:00, 2023-05-01 10:00:00, SUCCESS"
        );
        assert!(lines[5].starts_with("1, b.mp4,"));
        assert_eq!(lines.len(), 6);
    }

    #[tokio::test]
    async fn test_write_replaces_report_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path().join("reports"));
        let job = job("dive 42");

        let first = generator
            .write_at(&job.name, &[(job.clone(), vec![media(1, "a.mp4", Status::Queued)])], at(11))
            .await
            .unwrap();
        let second = generator
            .write_at(&job.name, &[(job.clone(), vec![media(1, "a.mp4", Status::Success)])], at(12))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.file_name().unwrap(), "dive_42_20230501.txt");
        let text = std::fs::read_to_string(&second).unwrap();
        assert!(text.contains("Status: SUCCESS"));

        let entries = std::fs::read_dir(generator.dir()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_report_of_a_name_lists_every_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path());
        let rosters = vec![
            (job_on("dive-42", "c1"), vec![media(1, "a.mp4", Status::Success)]),
            (job_on("dive-42", "c2"), vec![media(2, "b.mp4", Status::Failed)]),
        ];

        let path = generator.write_at("dive-42", &rosters, at(11)).await.unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("Cluster: c1"));
        assert!(text.contains("Cluster: c2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writes_of_one_name_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path());

        let writers: Vec<_> = ["c1", "c2"]
            .into_iter()
            .map(|cluster| {
                let generator = generator.clone();
                let rosters = vec![(
                    job_on("dive-42", cluster),
                    vec![media(1, "a.mp4", Status::Queued)],
                )];
                tokio::spawn(async move {
                    let mut failures = 0;
                    for _ in 0..50 {
                        if generator.write_at("dive-42", &rosters, at(11)).await.is_err() {
                            failures += 1;
                        }
                    }
                    failures
                })
            })
            .collect();

        for writer in writers {
            assert_eq!(writer.await.unwrap(), 0);
        }

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["dive-42_20230501.txt".to_string()]);
        let text = std::fs::read_to_string(dir.path().join("dive-42_20230501.txt")).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("Job: ")).count(), 1);
    }
}
