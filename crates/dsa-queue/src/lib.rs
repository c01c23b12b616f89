//! Work queues and the queue reconciler.
//!
//! This crate provides:
//! - The `WorkQueue`/`WorkSubmitter` collaborator traits
//! - SQS and in-memory queue implementations
//! - Envelope parsing for the submitted/completed/failed queues
//! - The non-destructive reconciler that folds queue traffic into the store

pub mod envelope;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod reconciler;
pub mod role;
pub mod sqs;

pub use envelope::{Envelope, EnvelopeError};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use queue::{
    PollConfig, QueueDepth, RawEnvelope, Submission, WorkQueue, WorkSubmitter, MAX_MESSAGES_PER_POLL,
    MAX_POLL_WAIT,
};
pub use reconciler::{DrainReport, QueueReconciler, ReconcileReport};
pub use role::{ClusterQueues, QueueRole, WatchedQueue};
pub use sqs::SqsQueue;
