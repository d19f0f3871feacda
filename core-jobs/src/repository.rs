//! # Job Repository
//!
//! Provides database persistence for job runs and schedules.
//!
//! ## Overview
//!
//! This repository handles:
//! - Creating runs and persisting progress while they execute
//! - Finalizing runs exactly once
//! - Run history (most recent first), globally and per job
//! - Schedule rows (frequency, enabled flag, last run time)
//!
//! Every mutation is a single statement so partial progress is visible to
//! pollers while a job runs.

use crate::{Frequency, JobError, JobRun, JobRunId, JobRunStatus, JobSchedule, Result};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for job run and schedule persistence
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new run
    async fn create_job_run(&self, run: &JobRun) -> Result<()>;

    /// Persist progress for a running run
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyFinalized`] if the run has finished, or
    /// [`JobError::RunNotFound`] if it does not exist
    async fn update_job_progress(&self, run_id: &JobRunId, percent: u8, message: &str) -> Result<()>;

    /// Finalize a running run with a terminal status
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyFinalized`] on a second finalization
    async fn complete_job_run(&self, run: &JobRun) -> Result<()>;

    async fn find_run_by_id(&self, run_id: &JobRunId) -> Result<Option<JobRun>>;

    /// Most recent runs across all jobs
    async fn recent_runs(&self, limit: u32) -> Result<Vec<JobRun>>;

    /// Most recent runs of one job
    async fn run_history(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>>;

    async fn get_schedule(&self, name: &str) -> Result<Option<JobSchedule>>;

    async fn create_schedule(&self, schedule: &JobSchedule) -> Result<()>;

    /// Update frequency and enabled flag of an existing schedule
    async fn update_schedule(&self, schedule: &JobSchedule) -> Result<()>;

    /// Stamp the time a run of `name` finished
    async fn set_last_run_time(&self, name: &str, finished_at: i64) -> Result<()>;

    async fn list_schedules(&self) -> Result<Vec<JobSchedule>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of JobRepository
#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Distinguish a finished run from a missing one after a guarded update
    async fn finalized_or_missing(&self, run_id: &JobRunId) -> JobError {
        match self.find_run_by_id(run_id).await {
            Ok(Some(_)) => JobError::AlreadyFinalized {
                run_id: run_id.to_string(),
            },
            Ok(None) => JobError::RunNotFound {
                run_id: run_id.to_string(),
            },
            Err(e) => e,
        }
    }
}

/// Database row representation of a job run
#[derive(Debug, FromRow)]
struct JobRunRow {
    id: String,
    job_name: String,
    status: String,
    trigger_kind: String,
    start_time: i64,
    end_time: Option<i64>,
    progress_percent: i64,
    progress_message: Option<String>,
    error_message: Option<String>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = JobError;

    fn try_from(row: JobRunRow) -> Result<Self> {
        Ok(JobRun {
            id: JobRunId::from_string(&row.id)?,
            job_name: row.job_name,
            status: row.status.parse()?,
            trigger: row.trigger_kind.parse()?,
            start_time: row.start_time,
            end_time: row.end_time,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            progress_message: row.progress_message,
            error_message: row.error_message,
        })
    }
}

#[derive(Debug, FromRow)]
struct ScheduleRow {
    name: String,
    frequency: String,
    enabled: bool,
    last_run_time: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ScheduleRow> for JobSchedule {
    type Error = JobError;

    fn try_from(row: ScheduleRow) -> Result<Self> {
        let frequency: Frequency = row.frequency.parse()?;
        Ok(JobSchedule {
            name: row.name,
            frequency,
            enabled: row.enabled,
            last_run_time: row.last_run_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_RUN: &str = r#"
    SELECT id, job_name, status, trigger_kind, start_time, end_time,
           progress_percent, progress_message, error_message
    FROM job_runs
"#;

const SELECT_SCHEDULE: &str = r#"
    SELECT name, frequency, enabled, last_run_time, created_at, updated_at
    FROM job_schedules
"#;

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create_job_run(&self, run: &JobRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_runs (
                id, job_name, status, trigger_kind, start_time, end_time,
                progress_percent, progress_message, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.job_name)
        .bind(run.status.as_str())
        .bind(run.trigger.as_str())
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(i64::from(run.progress_percent))
        .bind(&run.progress_message)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_job_progress(&self, run_id: &JobRunId, percent: u8, message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_runs
            SET progress_percent = ?, progress_message = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(i64::from(percent.min(100)))
        .bind(message)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.finalized_or_missing(run_id).await);
        }

        Ok(())
    }

    async fn complete_job_run(&self, run: &JobRun) -> Result<()> {
        if !run.status.is_terminal() {
            return Err(JobError::InvalidStateTransition {
                from: JobRunStatus::Running.as_str().to_string(),
                to: run.status.as_str().to_string(),
                reason: "Runs can only be finalized with a terminal status".to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE job_runs
            SET status = ?, end_time = ?, progress_percent = ?, progress_message = ?,
                error_message = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.end_time)
        .bind(i64::from(run.progress_percent))
        .bind(&run.progress_message)
        .bind(&run.error_message)
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.finalized_or_missing(&run.id).await);
        }

        Ok(())
    }

    async fn find_run_by_id(&self, run_id: &JobRunId) -> Result<Option<JobRun>> {
        let sql = format!("{} WHERE id = ?", SELECT_RUN);
        let row = sqlx::query_as::<_, JobRunRow>(&sql)
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRun::try_from).transpose()
    }

    async fn recent_runs(&self, limit: u32) -> Result<Vec<JobRun>> {
        let sql = format!("{} ORDER BY start_time DESC, rowid DESC LIMIT ?", SELECT_RUN);
        let rows = sqlx::query_as::<_, JobRunRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(JobRun::try_from).collect()
    }

    async fn run_history(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>> {
        let sql = format!(
            "{} WHERE job_name = ? ORDER BY start_time DESC, rowid DESC LIMIT ?",
            SELECT_RUN
        );
        let rows = sqlx::query_as::<_, JobRunRow>(&sql)
            .bind(job_name)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(JobRun::try_from).collect()
    }

    async fn get_schedule(&self, name: &str) -> Result<Option<JobSchedule>> {
        let sql = format!("{} WHERE name = ?", SELECT_SCHEDULE);
        let row = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobSchedule::try_from).transpose()
    }

    async fn create_schedule(&self, schedule: &JobSchedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_schedules (name, frequency, enabled, last_run_time, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&schedule.name)
        .bind(schedule.frequency.as_str())
        .bind(schedule.enabled)
        .bind(schedule.last_run_time)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_schedule(&self, schedule: &JobSchedule) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_schedules SET frequency = ?, enabled = ?, updated_at = ? WHERE name = ?",
        )
        .bind(schedule.frequency.as_str())
        .bind(schedule.enabled)
        .bind(schedule.updated_at)
        .bind(&schedule.name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobError::ScheduleNotFound(schedule.name.clone()));
        }

        Ok(())
    }

    async fn set_last_run_time(&self, name: &str, finished_at: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_schedules SET last_run_time = ?, updated_at = ? WHERE name = ?",
        )
        .bind(finished_at)
        .bind(finished_at)
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobError::ScheduleNotFound(name.to_string()));
        }

        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<JobSchedule>> {
        let sql = format!("{} ORDER BY name", SELECT_SCHEDULE);
        let rows = sqlx::query_as::<_, ScheduleRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(JobSchedule::try_from).collect()
    }
}
