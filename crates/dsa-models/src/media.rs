//! Media (single video) records and their opaque metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::JobId;
use crate::status::Status;

/// Store-assigned media identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub i64);

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque key/value payload carried through from triggering events.
pub type Metadata = serde_json::Map<String, Value>;

/// One video within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: MediaId,
    pub job_id: JobId,
    /// Video identifier, unique within the job
    pub name: String,
    pub status: Status,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Media {
    /// Look up a metadata value rendered as a string.
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Merge `patch` into `base` key by key.
///
/// Keys absent from the patch are left untouched. Returns true if any key
/// was added or changed.
pub fn merge_metadata(base: &mut Metadata, patch: &Metadata) -> bool {
    let mut changed = false;
    for (key, value) in patch {
        if base.get(key) != Some(value) {
            base.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_keeps_untouched_keys() {
        let mut base = object(json!({"message_id": "m-1", "args": "--conf 0.1"}));
        let changed = merge_metadata(&mut base, &object(json!({"result": "s3://bucket/a.tar.gz"})));

        assert!(changed);
        assert_eq!(base["message_id"], "m-1");
        assert_eq!(base["args"], "--conf 0.1");
        assert_eq!(base["result"], "s3://bucket/a.tar.gz");
    }

    #[test]
    fn test_merge_overwrites_patched_keys() {
        let mut base = object(json!({"error": "timeout"}));
        assert!(merge_metadata(&mut base, &object(json!({"error": "oom"}))));
        assert_eq!(base["error"], "oom");
    }

    #[test]
    fn test_merge_identical_patch_is_unchanged() {
        let mut base = object(json!({"a": 1, "b": "x"}));
        assert!(!merge_metadata(&mut base, &object(json!({"a": 1}))));
        assert!(!merge_metadata(&mut base, &Metadata::new()));
    }
}
