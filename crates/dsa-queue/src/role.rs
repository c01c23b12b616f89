//! The three queues watched per cluster.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use dsa_models::Status;

use crate::queue::WorkQueue;

/// Suffix the tracking containers append to a video's result artifact.
pub const RESULT_ARTIFACT_SUFFIX: &str = ".tracks.tar.gz";

/// Extension restored on a video name recovered from a result artifact.
pub const VIDEO_EXTENSION: &str = ".mp4";

/// Which part of the pipeline a queue reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Videos waiting to be processed
    Submitted,
    /// Result artifacts of finished videos
    Completed,
    /// Videos that exhausted their processing attempts
    Failed,
}

impl QueueRole {
    pub const ALL: [QueueRole; 3] = [QueueRole::Submitted, QueueRole::Completed, QueueRole::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueRole::Submitted => "submitted",
            QueueRole::Completed => "completed",
            QueueRole::Failed => "failed",
        }
    }

    /// Status a message on this queue implies for its media.
    pub fn implied_status(&self) -> Status {
        match self {
            QueueRole::Submitted => Status::Queued,
            QueueRole::Completed => Status::Success,
            QueueRole::Failed => Status::Failed,
        }
    }

    /// Metadata key under which the raw video location is kept, if any.
    pub fn location_key(&self) -> Option<&'static str> {
        match self {
            QueueRole::Submitted => Some("source"),
            QueueRole::Completed => Some("result"),
            QueueRole::Failed => None,
        }
    }

    /// Recover the media name from the video location carried by a message.
    ///
    /// The location is reduced to its file name. Completed-work messages
    /// name the result artifact (`a.tracks.tar.gz`), which maps back to the
    /// original video (`a.mp4`).
    pub fn media_name(&self, video: &str) -> String {
        let file_name = Path::new(video)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(video);

        match self {
            QueueRole::Completed => match file_name.strip_suffix(RESULT_ARTIFACT_SUFFIX) {
                Some(stem) => format!("{}{}", stem, VIDEO_EXTENSION),
                None => file_name.to_string(),
            },
            QueueRole::Submitted | QueueRole::Failed => file_name.to_string(),
        }
    }
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queue handle tagged with its role.
#[derive(Clone)]
pub struct WatchedQueue {
    pub role: QueueRole,
    pub queue: Arc<dyn WorkQueue>,
}

impl WatchedQueue {
    pub fn new(role: QueueRole, queue: Arc<dyn WorkQueue>) -> Self {
        Self { role, queue }
    }
}

impl fmt::Debug for WatchedQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchedQueue")
            .field("role", &self.role)
            .field("queue", &self.queue.name())
            .finish()
    }
}

/// The submitted/completed/failed queues of one cluster.
#[derive(Debug, Clone)]
pub struct ClusterQueues {
    queues: [WatchedQueue; 3],
}

impl ClusterQueues {
    pub fn new(
        submitted: Arc<dyn WorkQueue>,
        completed: Arc<dyn WorkQueue>,
        failed: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            queues: [
                WatchedQueue::new(QueueRole::Submitted, submitted),
                WatchedQueue::new(QueueRole::Completed, completed),
                WatchedQueue::new(QueueRole::Failed, failed),
            ],
        }
    }

    /// Queues in role order: submitted, completed, failed.
    pub fn iter(&self) -> impl Iterator<Item = &WatchedQueue> {
        self.queues.iter()
    }

    pub fn get(&self, role: QueueRole) -> &WatchedQueue {
        match role {
            QueueRole::Submitted => &self.queues[0],
            QueueRole::Completed => &self.queues[1],
            QueueRole::Failed => &self.queues[2],
        }
    }
}
