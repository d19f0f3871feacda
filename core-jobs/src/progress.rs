//! # Progress Reporting
//!
//! Jobs report progress through a [`ProgressSink`]. The scheduler hands each
//! run a [`ProgressReporter`] that persists the update on the run row and
//! publishes a [`JobEvent::Progress`].
//!
//! Nested work (one client out of many, one chunk out of a batch) maps its
//! own completion onto a slice of the overall range with a [`ProgressWindow`]:
//!
//! ```rust,ignore
//! let window = ProgressWindow::FULL.split(client_index, client_count);
//! sink.report(window.percent(done, total), "plex: page 2").await;
//! ```

use crate::{JobRepository, JobRunId};
use async_trait::async_trait;
use core_runtime::events::{CoreEvent, EventBus, JobEvent};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives progress updates from a running job.
///
/// Reporting never fails the job; implementations log their own errors.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, percent: u8, message: &str);
}

/// Sink that drops every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _percent: u8, _message: &str) {}
}

/// Persists progress on the run row and emits it on the event bus.
pub struct ProgressReporter {
    run_id: JobRunId,
    job_name: String,
    repository: Arc<dyn JobRepository>,
    event_bus: EventBus,
}

impl ProgressReporter {
    pub fn new(
        run_id: JobRunId,
        job_name: impl Into<String>,
        repository: Arc<dyn JobRepository>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            run_id,
            job_name: job_name.into(),
            repository,
            event_bus,
        }
    }
}

#[async_trait]
impl ProgressSink for ProgressReporter {
    async fn report(&self, percent: u8, message: &str) {
        let percent = percent.min(100);
        debug!(run_id = %self.run_id, job = %self.job_name, percent, message, "Job progress");

        if let Err(e) = self
            .repository
            .update_job_progress(&self.run_id, percent, message)
            .await
        {
            warn!(run_id = %self.run_id, error = %e, "Failed to persist job progress");
            return;
        }

        self.event_bus
            .emit(CoreEvent::Job(JobEvent::Progress {
                run_id: self.run_id.to_string(),
                job_name: self.job_name.clone(),
                percent,
                message: message.to_string(),
            }))
            .ok();
    }
}

/// A slice `[start, end]` of the 0-100 progress range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressWindow {
    pub start: u8,
    pub end: u8,
}

impl ProgressWindow {
    pub const FULL: ProgressWindow = ProgressWindow { start: 0, end: 100 };

    pub fn new(start: u8, end: u8) -> Self {
        let start = start.min(100);
        Self {
            start,
            end: end.clamp(start, 100),
        }
    }

    /// `start + floor(done / total * (end - start))`; `end` when `total` is 0.
    pub fn percent(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.end;
        }
        let done = done.min(total) as u64;
        let span = u64::from(self.end - self.start);
        self.start + (done * span / total as u64) as u8
    }

    /// The `index`-th of `count` equal sub-windows.
    pub fn split(&self, index: usize, count: usize) -> ProgressWindow {
        if count == 0 {
            return *self;
        }
        let index = index.min(count - 1);
        ProgressWindow::new(self.percent(index, count), self.percent(index + 1, count))
    }
}

impl Default for ProgressWindow {
    fn default() -> Self {
        Self::FULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobError, JobRun, JobSchedule};
    use mockall::mock;
    use mockall::predicate::*;

    mock! {
        Repo {}

        #[async_trait]
        impl JobRepository for Repo {
            async fn create_job_run(&self, run: &JobRun) -> crate::Result<()>;
            async fn update_job_progress(&self, run_id: &JobRunId, percent: u8, message: &str) -> crate::Result<()>;
            async fn complete_job_run(&self, run: &JobRun) -> crate::Result<()>;
            async fn find_run_by_id(&self, run_id: &JobRunId) -> crate::Result<Option<JobRun>>;
            async fn recent_runs(&self, limit: u32) -> crate::Result<Vec<JobRun>>;
            async fn run_history(&self, job_name: &str, limit: u32) -> crate::Result<Vec<JobRun>>;
            async fn get_schedule(&self, name: &str) -> crate::Result<Option<JobSchedule>>;
            async fn create_schedule(&self, schedule: &JobSchedule) -> crate::Result<()>;
            async fn update_schedule(&self, schedule: &JobSchedule) -> crate::Result<()>;
            async fn set_last_run_time(&self, name: &str, finished_at: i64) -> crate::Result<()>;
            async fn list_schedules(&self) -> crate::Result<Vec<JobSchedule>>;
        }
    }

    #[test]
    fn test_window_percent() {
        let window = ProgressWindow::new(20, 60);
        assert_eq!(window.percent(0, 10), 20);
        assert_eq!(window.percent(5, 10), 40);
        assert_eq!(window.percent(10, 10), 60);
        assert_eq!(window.percent(3, 0), 60);
        // floor
        assert_eq!(ProgressWindow::FULL.percent(1, 3), 33);
    }

    #[test]
    fn test_window_split_covers_range() {
        let parts: Vec<_> = (0..3).map(|i| ProgressWindow::FULL.split(i, 3)).collect();
        assert_eq!(parts[0], ProgressWindow::new(0, 33));
        assert_eq!(parts[1], ProgressWindow::new(33, 66));
        assert_eq!(parts[2], ProgressWindow::new(66, 100));
    }

    #[tokio::test]
    async fn test_reporter_persists_and_emits() {
        let run_id = JobRunId::new();
        let mut repo = MockRepo::new();
        repo.expect_update_job_progress()
            .with(eq(run_id), eq(100u8), eq("done"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let reporter = ProgressReporter::new(run_id, "movie_sync", Arc::new(repo), bus);

        reporter.report(140, "done").await;

        match rx.try_recv().unwrap() {
            CoreEvent::Job(JobEvent::Progress { percent, job_name, .. }) => {
                assert_eq!(percent, 100);
                assert_eq!(job_name, "movie_sync");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reporter_swallows_persistence_errors() {
        let run_id = JobRunId::new();
        let mut repo = MockRepo::new();
        repo.expect_update_job_progress().returning(move |id, _, _| {
            Err(JobError::AlreadyFinalized {
                run_id: id.to_string(),
            })
        });

        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let reporter = ProgressReporter::new(run_id, "movie_sync", Arc::new(repo), bus);

        reporter.report(10, "late").await;
        assert!(rx.try_recv().is_err(), "no event for a rejected update");
    }
}
