use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job {0} is not registered")]
    JobNotFound(String),

    #[error("Job run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Job {job_name} is already running")]
    AlreadyRunning { job_name: String },

    #[error("Job run {run_id} is already finalized")]
    AlreadyFinalized { run_id: String },

    #[error("Job schedule {0} not found")]
    ScheduleNotFound(String),

    #[error("Invalid job run ID: {0}")]
    InvalidRunId(String),

    #[error("Invalid job run status: {0}")]
    InvalidStatus(String),

    #[error("Invalid job frequency: {0}")]
    InvalidFrequency(String),

    #[error("Invalid trigger kind: {0}")]
    InvalidTrigger(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job cancelled: {0}")]
    Cancelled(String),

    /// The job body reported a failure
    #[error("{0}")]
    Failed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, JobError>;
