//! In-process queue for local simulation and tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueDepth, RawEnvelope, Submission, WorkQueue, WorkSubmitter};

#[derive(Debug, Default)]
struct State {
    messages: Vec<RawEnvelope>,
    /// Position of the next peek; wraps around like an expired visibility timeout
    cursor: usize,
    next_id: u64,
    failures: VecDeque<String>,
}

/// A queue held in memory.
///
/// Polling peeks: messages are never removed, and successive polls walk
/// through the queue and wrap around, the way messages re-appear on a real
/// queue once their visibility timeout lapses.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Append a message body; returns the assigned message id.
    pub fn push(&self, body: impl Into<String>) -> QueueResult<String> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let message_id = format!("{}-{}", self.name, state.next_id);
        let envelope = RawEnvelope::new(body)
            .with_message_id(message_id.clone())
            .with_delivered_at(Utc::now());
        state.messages.push(envelope);
        Ok(message_id)
    }

    /// Append a fully formed message.
    pub fn push_raw(&self, envelope: RawEnvelope) -> QueueResult<()> {
        self.lock()?.messages.push(envelope);
        Ok(())
    }

    /// Make the next poll or depth call fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) -> QueueResult<()> {
        self.lock()?.failures.push_back(reason.into());
        Ok(())
    }

    /// Remove every message, as workers do once they finish.
    pub fn clear(&self) -> QueueResult<()> {
        let mut state = self.lock()?;
        state.messages.clear();
        state.cursor = 0;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| QueueError::poll_failed(format!("{}: lock poisoned", self.name)))
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, max_messages: usize, _wait: Duration) -> QueueResult<Vec<RawEnvelope>> {
        let mut state = self.lock()?;
        if let Some(reason) = state.failures.pop_front() {
            return Err(QueueError::poll_failed(format!("{}: {}", self.name, reason)));
        }

        let total = state.messages.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let count = max_messages.min(total);
        let start = state.cursor % total;
        let batch = (0..count)
            .map(|i| state.messages[(start + i) % total].clone())
            .collect();
        state.cursor = (start + count) % total;
        Ok(batch)
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let mut state = self.lock()?;
        if let Some(reason) = state.failures.pop_front() {
            return Err(QueueError::depth_failed(format!("{}: {}", self.name, reason)));
        }
        Ok(QueueDepth {
            visible: state.messages.len() as u64,
            in_flight: 0,
        })
    }
}

#[async_trait]
impl WorkSubmitter for MemoryQueue {
    async fn submit(&self, submission: &Submission) -> QueueResult<String> {
        self.push(submission.to_body()?)
    }
}
