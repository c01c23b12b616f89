//! Parsing of queue message bodies into media events.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use dsa_models::Metadata;
use dsa_store::MediaEvent;

use crate::queue::RawEnvelope;
use crate::role::QueueRole;

/// Format of the normalized delivery timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Why a message body could not be turned into an event.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("body is not a JSON object")]
    NotAnObject,

    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(alias = "jobName")]
    job_name: String,
    #[serde(alias = "videoIdentifier")]
    video: String,
    #[serde(default, alias = "clusterId")]
    cluster: Option<String>,
    #[serde(flatten)]
    extra: Metadata,
}

/// A parsed delivery event.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub job_name: String,
    /// Cluster named by the message, if any
    pub cluster: Option<String>,
    /// Video location as sent
    pub video: String,
    pub message_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Remaining body fields, carried through as metadata
    pub extra: Metadata,
}

impl Envelope {
    /// Parse a raw message.
    ///
    /// Bodies that hold a JSON string containing the JSON object (double
    /// encoded by some publishers) are unwrapped first.
    pub fn parse(raw: &RawEnvelope) -> Result<Self, EnvelopeError> {
        let mut value: Value = serde_json::from_str(&raw.body)?;
        if let Value::String(inner) = &value {
            value = serde_json::from_str(inner)?;
        }
        if !value.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }

        let body: Body = serde_json::from_value(value)?;
        if body.job_name.trim().is_empty() {
            return Err(EnvelopeError::EmptyField("job_name"));
        }
        if body.video.trim().is_empty() {
            return Err(EnvelopeError::EmptyField("video"));
        }

        Ok(Self {
            job_name: body.job_name.trim().to_string(),
            cluster: body
                .cluster
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            video: body.video.trim().to_string(),
            message_id: raw.message_id.clone(),
            delivered_at: raw.delivered_at,
            extra: body.extra,
        })
    }

    /// Delivery time as `YYYYMMDDTHHMMSS` (UTC).
    pub fn timestamp(&self) -> Option<String> {
        self.delivered_at
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
    }

    /// Turn the envelope into a store event for a queue of the given role.
    ///
    /// `default_cluster` applies when the message does not name one.
    pub fn into_event(self, role: QueueRole, default_cluster: &str) -> MediaEvent {
        let media_name = role.media_name(&self.video);
        let timestamp = self.timestamp();

        let mut metadata = self.extra;
        if let Some(key) = role.location_key() {
            metadata.insert(key.to_string(), Value::String(self.video));
        }
        if let Some(message_id) = self.message_id {
            metadata.insert(format!("{}_message_id", role.as_str()), Value::String(message_id));
        }
        if let Some(timestamp) = timestamp {
            metadata.insert(format!("{}_at", role.as_str()), Value::String(timestamp));
        }

        MediaEvent {
            job_name: self.job_name,
            cluster: self.cluster.unwrap_or_else(|| default_cluster.to_string()),
            media_name,
            status: role.implied_status(),
            metadata,
        }
    }
}
