//! SQLite job cache.
//!
//! This crate provides:
//! - The `jobs` and `media` tables, one database per deployment account
//! - Lookup-before-create of jobs by `(name, cluster)`
//! - Guarded media upserts with key-wise metadata merge
//! - One-transaction application of reconciliation batches

pub mod batch;
pub mod error;
pub mod jobs;
pub mod media;
pub mod store;

pub use batch::{BatchSummary, MediaEvent};
pub use error::{StoreError, StoreResult};
pub use media::{MediaChange, UpsertOutcome};
pub use store::StatusStore;
