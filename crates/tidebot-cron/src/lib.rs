//! tidebot-cron: Scheduled job management.
//!
//! Persists time-triggered jobs to a JSON file and fires them from a single
//! background task that owns the job set. Jobs can fire once (`at`), on a
//! fixed interval (`every`) or on a cron expression (`cron`). A built-in
//! heartbeat job periodically checks the workspace `HEARTBEAT.md`.

pub mod heartbeat;
pub mod schedule;
pub mod service;
pub mod store;
pub mod types;

pub use schedule::{compute_next_run, now_ms};
pub use service::{CronService, CronServiceConfig, JobHandler};
pub use store::JobStoreFile;
pub use types::{
    CronStatus, JobPayload, JobState, JobStatus, JobStore, NewJob, PayloadKind, Schedule,
    ScheduledJob,
};

/// Errors returned by the [`CronService`] handle.
#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("cron service task is not running")]
    ServiceStopped,
}

/// Errors writing the job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
