//! Shared data models for the DeepSea-AI job tracker.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their compute backend
//! - Media items and their opaque metadata
//! - The status vocabulary and the pure status machine

pub mod job;
pub mod media;
pub mod status;

// Re-export common types
pub use job::{Job, JobId, JobKind, JobProgress, ParseJobKindError};
pub use media::{merge_metadata, Media, MediaId, Metadata};
pub use status::{derive_job_status, guarded_transition, ParseStatusError, Status};
