//! # Job Scheduler
//!
//! Runs registered jobs on their schedules and on demand, and tracks every
//! execution as a [`JobRun`].
//!
//! ## Overview
//!
//! - A tick loop re-reads the schedule table every `tick_interval` and
//!   starts each due job as a background task
//! - Manual triggers skip the due-check and return the run id immediately
//! - Each lease key (the job name unless the job says otherwise) admits one
//!   run at a time
//! - Every run is bounded by `job_timeout`; on expiry the job future is
//!   dropped and the run is marked failed
//! - `last_run_time` is stamped only after the run is finalized
//!
//! ## Usage
//!
//! ```rust,ignore
//! let scheduler = JobScheduler::new(repository, clock, event_bus, SchedulerConfig::default());
//! scheduler.register(Arc::new(movie_job), Frequency::Daily).await?;
//! scheduler.start();
//!
//! let run_id = scheduler.run_job_manually("movie_sync").await?;
//! let run = scheduler.get_job_run_by_id(&run_id).await?;
//!
//! scheduler.shutdown().await;
//! ```

use crate::{
    Frequency, Job, JobContext, JobError, JobOutcome, JobRepository, JobRun, JobRunId,
    JobSchedule, ProgressReporter, Result, TriggerKind,
};
use bridge_traits::Clock;
use core_runtime::config::SchedulerSettings;
use core_runtime::events::{CoreEvent, EventBus, JobEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

/// Scheduler tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub job_timeout: Duration,
    /// Used when a caller asks for recent runs with a limit of 0
    pub recent_runs_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerSettings::default().into()
    }
}

impl From<SchedulerSettings> for SchedulerConfig {
    fn from(settings: SchedulerSettings) -> Self {
        Self {
            tick_interval: settings.tick_interval,
            job_timeout: settings.job_timeout,
            recent_runs_limit: settings.recent_runs_limit,
        }
    }
}

/// Handle to the scheduler; clones share one registry and one set of leases.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    repository: Arc<dyn JobRepository>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    config: SchedulerConfig,
    jobs: RwLock<HashMap<String, Arc<dyn Job>>>,
    leases: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    started: AtomicBool,
}

/// How a run ended, before it is written back
enum RunEnd {
    Completed(JobOutcome),
    Failed { message: String, timed_out: bool },
}

impl JobScheduler {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                repository,
                clock,
                event_bus,
                config,
                jobs: RwLock::new(HashMap::new()),
                leases: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    // ========================================================================
    // Registration and schedules
    // ========================================================================

    /// Register a job, creating its schedule with `default_frequency` if no
    /// schedule row exists yet. An existing row is left untouched.
    ///
    /// Re-registering a name replaces the job body.
    #[instrument(skip(self, job), fields(job = %job.name()))]
    pub async fn register(&self, job: Arc<dyn Job>, default_frequency: Frequency) -> Result<JobSchedule> {
        let name = job.name().to_string();
        if name.trim().is_empty() {
            return Err(JobError::Config("job name cannot be empty".to_string()));
        }

        self.inner.jobs.write().await.insert(name.clone(), job);

        if let Some(existing) = self.inner.repository.get_schedule(&name).await? {
            debug!(frequency = %existing.frequency, "Job registered with existing schedule");
            return Ok(existing);
        }

        let schedule = JobSchedule::new(&name, default_frequency, self.inner.clock.unix_timestamp());
        self.inner.repository.create_schedule(&schedule).await?;
        info!(frequency = %default_frequency, "Job registered");
        Ok(schedule)
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.inner.jobs.read().await.contains_key(name)
    }

    pub async fn registered_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.jobs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create or update the schedule of a registered job.
    #[instrument(skip(self))]
    pub async fn setup_schedule(
        &self,
        name: &str,
        frequency: Frequency,
        enabled: bool,
    ) -> Result<JobSchedule> {
        if !self.is_registered(name).await {
            return Err(JobError::JobNotFound(name.to_string()));
        }

        let now = self.inner.clock.unix_timestamp();
        let schedule = match self.inner.repository.get_schedule(name).await? {
            Some(mut existing) => {
                existing.frequency = frequency;
                existing.enabled = enabled;
                existing.updated_at = now;
                self.inner.repository.update_schedule(&existing).await?;
                existing
            }
            None => {
                let created = JobSchedule::new(name, frequency, now).with_enabled(enabled);
                self.inner.repository.create_schedule(&created).await?;
                created
            }
        };

        info!(frequency = %frequency, enabled, "Job schedule set");
        Ok(schedule)
    }

    pub async fn schedules(&self) -> Result<Vec<JobSchedule>> {
        self.inner.repository.list_schedules().await
    }

    // ========================================================================
    // Triggering
    // ========================================================================

    /// Start a run of `name` now, regardless of its schedule.
    ///
    /// # Errors
    ///
    /// - [`JobError::JobNotFound`] if no job is registered under `name`
    /// - [`JobError::AlreadyRunning`] if a run holds the job's lease
    pub async fn run_job_manually(&self, name: &str) -> Result<JobRunId> {
        self.trigger(name, TriggerKind::Manual).await
    }

    /// Start every due, registered and idle job. Returns the started runs.
    pub async fn run_due_jobs(&self) -> Result<Vec<JobRunId>> {
        let now = self.inner.clock.now();
        let mut started = Vec::new();

        for schedule in self.inner.repository.list_schedules().await? {
            if !schedule.is_due(now) {
                continue;
            }
            if !self.is_registered(&schedule.name).await {
                debug!(job = %schedule.name, "Due schedule has no registered job");
                continue;
            }

            match self.trigger(&schedule.name, TriggerKind::Scheduled).await {
                Ok(run_id) => started.push(run_id),
                Err(JobError::AlreadyRunning { .. }) => {
                    debug!(job = %schedule.name, "Due job still running; skipped");
                }
                Err(e) => {
                    warn!(job = %schedule.name, error = %e, "Failed to start due job");
                }
            }
        }

        Ok(started)
    }

    #[instrument(skip(self), fields(job = %name, trigger = %trigger))]
    async fn trigger(&self, name: &str, trigger: TriggerKind) -> Result<JobRunId> {
        if self.inner.shutdown.is_cancelled() {
            return Err(JobError::Cancelled("scheduler is shutting down".to_string()));
        }

        let job = self
            .inner
            .jobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| JobError::JobNotFound(name.to_string()))?;

        let lease = self
            .lease(job.lease_key())
            .await
            .try_lock_owned()
            .map_err(|_| {
                debug!(lease = job.lease_key(), "Lease held by another run");
                JobError::AlreadyRunning {
                    job_name: name.to_string(),
                }
            })?;

        let run = JobRun::start(name, trigger, self.inner.clock.unix_timestamp());
        let run_id = run.id;
        self.inner.repository.create_job_run(&run).await?;

        self.inner
            .event_bus
            .emit(CoreEvent::Job(JobEvent::Started {
                run_id: run_id.to_string(),
                job_name: name.to_string(),
                manual: trigger == TriggerKind::Manual,
            }))
            .ok();

        let scheduler = self.clone();
        self.inner.tasks.spawn(async move {
            scheduler.execute(job, run, lease).await;
        });

        info!(run_id = %run_id, "Job run started");
        Ok(run_id)
    }

    async fn lease(&self, key: &str) -> Arc<Mutex<()>> {
        let mut leases = self.inner.leases.lock().await;
        Arc::clone(leases.entry(key.to_string()).or_default())
    }

    /// Whether the lease `name` would take is currently held.
    pub async fn is_running(&self, name: &str) -> bool {
        let key = match self.inner.jobs.read().await.get(name) {
            Some(job) => job.lease_key().to_string(),
            None => name.to_string(),
        };
        let leases = self.inner.leases.lock().await;
        leases
            .get(&key)
            .map(|lease| lease.try_lock().is_err())
            .unwrap_or(false)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    #[instrument(skip(self, job, run, _lease), fields(job = %run.job_name, run_id = %run.id))]
    async fn execute(&self, job: Arc<dyn Job>, run: JobRun, _lease: OwnedMutexGuard<()>) {
        let timeout = self.inner.config.job_timeout;
        let ctx = JobContext {
            run_id: run.id,
            job_name: run.job_name.clone(),
            trigger: run.trigger,
            progress: Arc::new(ProgressReporter::new(
                run.id,
                run.job_name.clone(),
                Arc::clone(&self.inner.repository),
                self.inner.event_bus.clone(),
            )),
            cancellation: self.inner.shutdown.child_token(),
        };

        let end = tokio::select! {
            result = tokio::time::timeout(timeout, job.run(ctx)) => match result {
                Ok(Ok(outcome)) => RunEnd::Completed(outcome),
                Ok(Err(e)) => RunEnd::Failed { message: e.to_string(), timed_out: false },
                Err(_) => RunEnd::Failed {
                    message: JobError::Timeout(timeout).to_string(),
                    timed_out: true,
                },
            },
            _ = self.inner.shutdown.cancelled() => RunEnd::Failed {
                message: JobError::Cancelled("scheduler shut down".to_string()).to_string(),
                timed_out: false,
            },
        };

        self.finalize(run, end).await;
    }

    async fn finalize(&self, run: JobRun, end: RunEnd) {
        let repository = &self.inner.repository;
        let now = self.inner.clock.unix_timestamp();
        let run_id = run.id;
        let job_name = run.job_name.clone();

        // Pick up progress persisted while the job ran
        let current = match repository.find_run_by_id(&run_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => run,
            Err(e) => {
                warn!(error = %e, "Failed to reload run before finalizing");
                run
            }
        };

        let (finished, event) = match end {
            RunEnd::Completed(outcome) => match current.complete(now) {
                Ok(mut finished) => {
                    if outcome.message.is_some() {
                        finished.progress_message = outcome.message;
                    }
                    let event = JobEvent::Completed {
                        run_id: run_id.to_string(),
                        job_name: job_name.clone(),
                        duration_secs: finished.duration_secs().unwrap_or(0),
                    };
                    (finished, event)
                }
                Err(e) => {
                    error!(error = %e, "Run could not be completed");
                    return;
                }
            },
            RunEnd::Failed { message, timed_out } => match current.fail(message.clone(), now) {
                Ok(finished) => {
                    let event = JobEvent::Failed {
                        run_id: run_id.to_string(),
                        job_name: job_name.clone(),
                        message,
                        timed_out,
                    };
                    (finished, event)
                }
                Err(e) => {
                    error!(error = %e, "Run could not be failed");
                    return;
                }
            },
        };

        if let Err(e) = repository.complete_job_run(&finished).await {
            error!(error = %e, "Failed to persist finished run");
        }
        if let Err(e) = repository.set_last_run_time(&job_name, now).await {
            warn!(error = %e, "Failed to stamp last run time");
        }

        match &finished.error_message {
            Some(message) => warn!(error = %message, "Job run failed"),
            None => info!(duration_secs = finished.duration_secs().unwrap_or(0), "Job run completed"),
        }

        self.inner.event_bus.emit(CoreEvent::Job(event)).ok();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_job_run_by_id(&self, run_id: &JobRunId) -> Result<JobRun> {
        self.inner
            .repository
            .find_run_by_id(run_id)
            .await?
            .ok_or_else(|| JobError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    /// Most recent runs across all jobs; a `limit` of 0 uses the configured default.
    pub async fn get_recent_job_runs(&self, limit: u32) -> Result<Vec<JobRun>> {
        let limit = if limit == 0 {
            self.inner.config.recent_runs_limit
        } else {
            limit
        };
        self.inner.repository.recent_runs(limit).await
    }

    pub async fn job_history(&self, name: &str, limit: u32) -> Result<Vec<JobRun>> {
        self.inner.repository.run_history(name, limit).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the tick loop. Calling it again is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.config.tick_interval;

        info!(tick_interval_secs = period.as_secs(), "Job scheduler started");
        self.inner.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.run_due_jobs().await {
                            error!(error = %e, "Due-job evaluation failed");
                        }
                    }
                }
            }
            debug!("Scheduler tick loop stopped");
        });
    }

    /// Stop the tick loop, cancel running jobs and wait for them to be finalized.
    pub async fn shutdown(&self) {
        info!("Job scheduler shutting down");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!("Job scheduler stopped");
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.inner.config)
            .field("started", &self.inner.started.load(Ordering::SeqCst))
            .finish()
    }
}
