//! Media and job status vocabulary.
//!
//! Media statuses move through a small, monotonic state machine driven by
//! queue events. A job has no status of its own: it is always derived from
//! the statuses of its media with [`derive_job_status`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processing status of a media item (and, derived, of a job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Waiting in the submitted-work queue
    Queued,
    /// Picked up by a worker
    Running,
    /// Result artifact delivered
    Success,
    /// Delivered to the failed-work queue
    Failed,
    /// No information
    #[default]
    Unknown,
}

impl Status {
    /// All statuses, in precedence order for job aggregation.
    pub const ALL: [Status; 5] = [
        Status::Running,
        Status::Queued,
        Status::Failed,
        Status::Success,
        Status::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
            Status::Unknown => "UNKNOWN",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not part of the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(Status::Queued),
            "RUNNING" => Ok(Status::Running),
            "SUCCESS" => Ok(Status::Success),
            "FAILED" => Ok(Status::Failed),
            "UNKNOWN" => Ok(Status::Unknown),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Derive the aggregate status of a job from the statuses of its media.
///
/// Precedence is RUNNING > QUEUED > FAILED > SUCCESS > UNKNOWN: one
/// straggling video keeps the job in flight, and one permanent failure
/// dominates an otherwise successful batch. A job with no media, or with a
/// mix of SUCCESS and UNKNOWN, is UNKNOWN.
pub fn derive_job_status<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut count = 0usize;
    let mut running = false;
    let mut queued = false;
    let mut failed = false;
    let mut all_success = true;

    for status in statuses {
        count += 1;
        match status {
            Status::Running => running = true,
            Status::Queued => queued = true,
            Status::Failed => failed = true,
            Status::Success => {}
            Status::Unknown => {}
        }
        if status != Status::Success {
            all_success = false;
        }
    }

    if running {
        Status::Running
    } else if queued {
        Status::Queued
    } else if failed {
        Status::Failed
    } else if count > 0 && all_success {
        Status::Success
    } else {
        Status::Unknown
    }
}

/// Apply an incoming status to a current one.
///
/// A terminal status is never replaced by QUEUED, which protects completed
/// media against re-queue and duplicate delivery of the submission event.
/// Every other incoming status replaces the current one.
pub fn guarded_transition(current: Status, incoming: Status) -> Status {
    if current.is_terminal() && incoming == Status::Queued {
        current
    } else {
        incoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(status: Status) -> usize {
        Status::ALL.iter().position(|s| *s == status).unwrap()
    }

    /// Reference aggregation: highest-precedence status wins, except that a
    /// SUCCESS/UNKNOWN mix falls back to UNKNOWN.
    fn reference(statuses: &[Status]) -> Status {
        if statuses.is_empty() {
            return Status::Unknown;
        }
        let best = *statuses.iter().min_by_key(|s| rank(**s)).unwrap();
        if best == Status::Success && statuses.iter().any(|s| *s != Status::Success) {
            Status::Unknown
        } else {
            best
        }
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert_eq!("success".parse::<Status>().unwrap(), Status::Success);
        assert!("DONE".parse::<Status>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(Status::Success.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Queued.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::Unknown.is_terminal());
    }

    #[test]
    fn test_derive_empty_is_unknown() {
        assert_eq!(derive_job_status(Vec::new()), Status::Unknown);
    }

    #[test]
    fn test_derive_precedence() {
        use Status::*;
        assert_eq!(derive_job_status([Success, Queued]), Queued);
        assert_eq!(derive_job_status([Failed, Queued, Running]), Running);
        assert_eq!(derive_job_status([Success, Failed, Success]), Failed);
        assert_eq!(derive_job_status([Success, Success]), Success);
        assert_eq!(derive_job_status([Success, Unknown]), Unknown);
    }

    #[test]
    fn test_derive_matches_reference_for_all_multisets() {
        // Every sequence of up to four statuses.
        let mut cases: Vec<Vec<Status>> = vec![vec![]];
        let mut frontier: Vec<Vec<Status>> = vec![vec![]];
        for _ in 0..4 {
            let mut next = Vec::new();
            for case in &frontier {
                for status in Status::ALL {
                    let mut extended = case.clone();
                    extended.push(status);
                    next.push(extended);
                }
            }
            cases.extend(next.iter().cloned());
            frontier = next;
        }

        for case in cases {
            let mut reversed = case.clone();
            reversed.reverse();
            assert_eq!(derive_job_status(case.clone()), reference(&case), "{:?}", case);
            assert_eq!(derive_job_status(reversed), derive_job_status(case.clone()));
        }
    }

    #[test]
    fn test_guard_keeps_terminal_on_queued() {
        assert_eq!(guarded_transition(Status::Success, Status::Queued), Status::Success);
        assert_eq!(guarded_transition(Status::Failed, Status::Queued), Status::Failed);
        assert_eq!(guarded_transition(Status::Queued, Status::Success), Status::Success);
        assert_eq!(guarded_transition(Status::Running, Status::Queued), Status::Queued);
        assert_eq!(guarded_transition(Status::Failed, Status::Success), Status::Success);
    }

    #[test]
    fn test_terminal_survives_any_queued_interleaving() {
        for terminal in [Status::Success, Status::Failed] {
            for before in 0..3 {
                for after in 0..3 {
                    let mut events = vec![Status::Queued; before];
                    events.push(terminal);
                    events.extend(std::iter::repeat(Status::Queued).take(after));

                    let final_status = events
                        .into_iter()
                        .fold(Status::Unknown, guarded_transition);
                    assert_eq!(final_status, terminal);
                }
            }
        }
    }
}
