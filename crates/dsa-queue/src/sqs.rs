//! Amazon SQS queue client.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueDepth, RawEnvelope, Submission, WorkQueue, WorkSubmitter};

/// Default visibility timeout applied to peeked messages.
///
/// Short, so peeked messages return to the queue before the workers notice.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Format of the time bucket appended to message group ids.
const GROUP_ID_FORMAT: &str = "%Y%m%dT%H%M";

/// An SQS queue addressed by URL.
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    url: String,
    name: String,
    visibility_timeout: Duration,
}

impl SqsQueue {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        let url = url.into();
        let name = url.rsplit('/').next().unwrap_or(&url).to_string();
        Self {
            client,
            url,
            name,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Create a client from the ambient AWS configuration.
    pub async fn from_env(url: impl Into<String>) -> QueueResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(QueueError::config_error("queue url is empty"));
        }
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Ok(Self::new(Client::new(&sdk_config), url))
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn count_attribute(
        attributes: Option<&std::collections::HashMap<QueueAttributeName, String>>,
        name: QueueAttributeName,
    ) -> u64 {
        attributes
            .and_then(|a| a.get(&name))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for SqsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsQueue")
            .field("url", &self.url)
            .field("visibility_timeout", &self.visibility_timeout)
            .finish()
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, max_messages: usize, wait: Duration) -> QueueResult<Vec<RawEnvelope>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(max_messages as i32)
            .wait_time_seconds(wait.as_secs() as i32)
            .visibility_timeout(self.visibility_timeout.as_secs() as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateFirstReceiveTimestamp)
            .send()
            .await
            .map_err(|e| {
                QueueError::poll_failed(format!("{}: {}", self.name, DisplayErrorContext(&e)))
            })?;

        let envelopes: Vec<RawEnvelope> = output
            .messages()
            .iter()
            .filter_map(|m| {
                let Some(body) = m.body() else {
                    warn!(
                        queue = %self.name,
                        message_id = m.message_id().unwrap_or("-"),
                        "Dropping message without a body"
                    );
                    return None;
                };
                let mut envelope = RawEnvelope::new(body);
                if let Some(id) = m.message_id() {
                    envelope = envelope.with_message_id(id);
                }
                let first_receive = m
                    .attributes()
                    .and_then(|a| a.get(&MessageSystemAttributeName::ApproximateFirstReceiveTimestamp))
                    .and_then(|v| v.parse::<i64>().ok())
                    .and_then(DateTime::<Utc>::from_timestamp_millis);
                if let Some(at) = first_receive {
                    envelope = envelope.with_delivered_at(at);
                }
                Some(envelope)
            })
            .collect();

        debug!(queue = %self.name, count = envelopes.len(), "Received messages");
        Ok(envelopes)
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(&self.url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .send()
            .await
            .map_err(|e| {
                QueueError::depth_failed(format!("{}: {}", self.name, DisplayErrorContext(&e)))
            })?;

        let attributes = output.attributes();
        Ok(QueueDepth {
            visible: Self::count_attribute(attributes, QueueAttributeName::ApproximateNumberOfMessages),
            in_flight: Self::count_attribute(
                attributes,
                QueueAttributeName::ApproximateNumberOfMessagesNotVisible,
            ),
        })
    }
}

#[async_trait]
impl WorkSubmitter for SqsQueue {
    async fn submit(&self, submission: &Submission) -> QueueResult<String> {
        let group_id = format!("{}{}", submission.cluster, Utc::now().format(GROUP_ID_FORMAT));
        let output = self
            .client
            .send_message()
            .queue_url(&self.url)
            .message_body(submission.to_body()?)
            .message_group_id(group_id)
            .send()
            .await
            .map_err(|e| {
                QueueError::send_failed(format!("{}: {}", self.name, DisplayErrorContext(&e)))
            })?;

        let message_id = output.message_id().unwrap_or_default().to_string();
        info!(
            queue = %self.name,
            job_name = %submission.job_name,
            video = %submission.video,
            message_id = %message_id,
            "Submitted video"
        );
        Ok(message_id)
    }
}
