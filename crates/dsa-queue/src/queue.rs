//! Work-queue collaborator interfaces.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::QueueResult;

/// Largest batch a single poll may request.
pub const MAX_MESSAGES_PER_POLL: usize = 10;

/// Longest long-poll wait a single poll may request.
pub const MAX_POLL_WAIT: Duration = Duration::from_secs(20);

/// A message as delivered by a queue, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope {
    /// Queue-assigned message id, if the queue exposes one
    pub message_id: Option<String>,
    /// Message body
    pub body: String,
    /// When the queue first delivered the message
    pub delivered_at: Option<DateTime<Utc>>,
}

impl RawEnvelope {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message_id: None,
            body: body.into(),
            delivered_at: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_delivered_at(mut self, delivered_at: DateTime<Utc>) -> Self {
        self.delivered_at = Some(delivered_at);
        self
    }
}

/// Approximate number of messages in a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    /// Messages available for delivery
    pub visible: u64,
    /// Messages delivered but not yet deleted or returned
    pub in_flight: u64,
}

/// A queue the reconciler can observe.
///
/// Implementations must not consume messages: several observers may watch
/// the same queue, and the workers own deletion.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Receive up to `max_messages`, waiting at most `wait` for the first.
    async fn poll(&self, max_messages: usize, wait: Duration) -> QueueResult<Vec<RawEnvelope>>;

    /// Current approximate depth.
    async fn depth(&self) -> QueueResult<QueueDepth>;
}

/// A request to process one video on a cluster.
///
/// Serializes to the message body the processing containers read; the
/// cluster only selects the queue and is not part of the body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub job_name: String,
    #[serde(skip)]
    pub cluster: String,
    /// Video location (bucket prefix and file name)
    pub video: String,
    pub user_name: String,
    /// Remove intermediate artifacts after processing
    #[serde(serialize_with = "serialize_flag")]
    pub clean: bool,
    /// Extra arguments passed through to the processing container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
}

impl Submission {
    /// Message body in the format the processing containers read.
    pub fn to_body(&self) -> QueueResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// The containers expect `"True"` / `"False"` rather than JSON booleans.
fn serialize_flag<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *flag { "True" } else { "False" })
}

/// Sends work to a cluster's submitted-work queue.
#[async_trait]
pub trait WorkSubmitter: Send + Sync {
    /// Enqueue one video and return the queue's message id.
    async fn submit(&self, submission: &Submission) -> QueueResult<String>;
}

/// Bounds for draining a queue.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Messages per poll, at most [`MAX_MESSAGES_PER_POLL`]
    pub max_messages: usize,
    /// Long-poll wait per call
    pub wait: Duration,
    /// Upper bound on polls per drain
    pub max_polls_per_drain: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_messages: MAX_MESSAGES_PER_POLL,
            wait: Duration::from_secs(20),
            max_polls_per_drain: 50,
        }
    }
}

impl PollConfig {
    /// Batch size clamped to what a queue accepts.
    pub fn batch_size(&self) -> usize {
        self.max_messages.clamp(1, MAX_MESSAGES_PER_POLL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_body_fields() {
        let submission = Submission {
            job_name: "dive-42".into(),
            cluster: "c1".into(),
            video: "D1377/a.mp4".into(),
            user_name: "ops".into(),
            clean: true,
            args: None,
        };
        let body: serde_json::Value = serde_json::from_str(&submission.to_body().unwrap()).unwrap();
        assert_eq!(body["video"], "D1377/a.mp4");
        assert_eq!(body["clean"], "True");
        assert_eq!(body["job_name"], "dive-42");
        assert!(body.get("args").is_none());
        assert!(body.get("cluster").is_none());
    }

    #[test]
    fn test_batch_size_is_clamped() {
        let mut config = PollConfig::default();
        config.max_messages = 50;
        assert_eq!(config.batch_size(), 10);
        config.max_messages = 0;
        assert_eq!(config.batch_size(), 1);
    }
}
