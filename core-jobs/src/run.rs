//! # Job Run State Machine
//!
//! One [`JobRun`] records one execution of a job, manual or scheduled.
//!
//! ## State Machine
//!
//! ```text
//! Running → Completed
//!    ↓
//!  Failed
//! ```
//!
//! A run is created `Running`, mutated only through progress updates and
//! finalized exactly once. Finalized runs are immutable history.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut run = JobRun::start("movie_sync", TriggerKind::Manual, now);
//! run.update_progress(40, "plex: page 3")?;
//! let run = run.complete(now + 12)?;
//! assert_eq!(run.progress_percent, 100);
//! ```

use crate::{JobError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRunId(Uuid);

impl JobRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a run ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| JobError::InvalidRunId(e.to_string()))?,
        ))
    }
}

impl Default for JobRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobRunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// The current status of a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobRunStatus::Completed | JobRunStatus::Failed)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobRunStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(JobRunStatus::Running),
            "completed" => Ok(JobRunStatus::Completed),
            "failed" => Ok(JobRunStatus::Failed),
            _ => Err(JobError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Picked by the scheduler's due-check
    Scheduled,
    /// Requested through `run_job_manually`
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
        }
    }
}

impl FromStr for TriggerKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(TriggerKind::Scheduled),
            "manual" => Ok(TriggerKind::Manual),
            _ => Err(JobError::InvalidTrigger(s.to_string())),
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Job Run Entity
// ============================================================================

/// One execution of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: JobRunId,
    pub job_name: String,
    pub status: JobRunStatus,
    pub trigger: TriggerKind,
    pub start_time: i64,
    pub end_time: Option<i64>,
    /// 0-100
    pub progress_percent: u8,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
}

impl JobRun {
    /// Create a run in `Running` state
    pub fn start(job_name: impl Into<String>, trigger: TriggerKind, now: i64) -> Self {
        Self {
            id: JobRunId::new(),
            job_name: job_name.into(),
            status: JobRunStatus::Running,
            trigger,
            start_time: now,
            end_time: None,
            progress_percent: 0,
            progress_message: None,
            error_message: None,
        }
    }

    /// Record progress; percentages above 100 are clamped.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is already finalized
    pub fn update_progress(&mut self, percent: u8, message: impl Into<String>) -> Result<()> {
        if self.status != JobRunStatus::Running {
            return Err(JobError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "update_progress".to_string(),
                reason: "Run must be running to update progress".to_string(),
            });
        }

        self.progress_percent = percent.min(100);
        self.progress_message = Some(message.into());
        Ok(())
    }

    /// Finalize as `Completed`
    pub fn complete(mut self, now: i64) -> Result<Self> {
        self.validate_transition(JobRunStatus::Completed)?;
        self.status = JobRunStatus::Completed;
        self.end_time = Some(now);
        self.progress_percent = 100;
        Ok(self)
    }

    /// Finalize as `Failed` with a reason
    pub fn fail(mut self, message: impl Into<String>, now: i64) -> Result<Self> {
        self.validate_transition(JobRunStatus::Failed)?;
        self.status = JobRunStatus::Failed;
        self.end_time = Some(now);
        self.error_message = Some(message.into());
        Ok(self)
    }

    /// Wall-clock duration in seconds, once finalized
    pub fn duration_secs(&self) -> Option<u64> {
        self.end_time
            .map(|end| end.saturating_sub(self.start_time).max(0) as u64)
    }

    fn validate_transition(&self, to: JobRunStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (JobRunStatus::Running, JobRunStatus::Completed)
                | (JobRunStatus::Running, JobRunStatus::Failed)
        );

        if !valid {
            return Err(JobError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}
