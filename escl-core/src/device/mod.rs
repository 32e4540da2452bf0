//! The per-device scan job state machine (spec.md §4.7).

mod job;

pub use job::{JobCancelHandle, JobState, ScanJob};
