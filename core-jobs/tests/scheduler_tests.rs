//! Scheduler behavior against an in-memory database

use async_trait::async_trait;
use bridge_traits::{Clock, ManualClock};
use core_jobs::{
    Frequency, Job, JobContext, JobError, JobOutcome, JobRun, JobRunId, JobRunStatus,
    JobScheduler, SchedulerConfig, SqliteJobRepository, TriggerKind,
};
use core_library::create_test_pool;
use core_runtime::events::{CoreEvent, EventBus, JobEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Test jobs
// ============================================================================

struct CountingJob {
    name: String,
    runs: AtomicUsize,
}

impl CountingJob {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Job for CountingJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: JobContext) -> core_jobs::Result<JobOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.report(50, "halfway").await;
        Ok(JobOutcome::with_message("synced 3 items"))
    }
}

struct FailingJob;

#[async_trait]
impl Job for FailingJob {
    fn name(&self) -> &str {
        "broken_sync"
    }

    async fn run(&self, ctx: JobContext) -> core_jobs::Result<JobOutcome> {
        ctx.report(10, "connecting").await;
        Err(JobError::Failed("provider exploded".to_string()))
    }
}

/// Blocks until released through its `Notify`
struct GatedJob {
    gate: Arc<Notify>,
}

#[async_trait]
impl Job for GatedJob {
    fn name(&self) -> &str {
        "gated_sync"
    }

    async fn run(&self, _ctx: JobContext) -> core_jobs::Result<JobOutcome> {
        self.gate.notified().await;
        Ok(JobOutcome::default())
    }
}

/// Gated job whose lease is shared with other jobs
struct SharedLeaseJob {
    name: String,
    lease_key: String,
    gate: Arc<Notify>,
}

#[async_trait]
impl Job for SharedLeaseJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn lease_key(&self) -> &str {
        &self.lease_key
    }

    async fn run(&self, _ctx: JobContext) -> core_jobs::Result<JobOutcome> {
        self.gate.notified().await;
        Ok(JobOutcome::default())
    }
}

struct SleepyJob;

#[async_trait]
impl Job for SleepyJob {
    fn name(&self) -> &str {
        "sleepy_sync"
    }

    async fn run(&self, _ctx: JobContext) -> core_jobs::Result<JobOutcome> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(JobOutcome::default())
    }
}

// ============================================================================
// Helpers
// ============================================================================

const START: i64 = 1_700_000_000;

async fn scheduler_with(config: SchedulerConfig) -> (JobScheduler, Arc<ManualClock>, EventBus) {
    let pool = create_test_pool().await.unwrap();
    let repository = Arc::new(SqliteJobRepository::new(pool));
    let clock = Arc::new(ManualClock::at_timestamp(START));
    let bus = EventBus::new(64);
    let scheduler = JobScheduler::new(repository, clock.clone(), bus.clone(), config);
    (scheduler, clock, bus)
}

async fn scheduler() -> (JobScheduler, Arc<ManualClock>, EventBus) {
    scheduler_with(SchedulerConfig::default()).await
}

async fn wait_for_terminal(scheduler: &JobScheduler, run_id: &JobRunId) -> JobRun {
    for _ in 0..500 {
        let run = scheduler.get_job_run_by_id(run_id).await.unwrap();
        if run.status.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} did not finish", run_id);
}

async fn wait_for_idle(scheduler: &JobScheduler, name: &str) {
    for _ in 0..500 {
        if !scheduler.is_running(name).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never released its lease", name);
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_manual_run_completes_and_stamps_last_run() {
    let (scheduler, clock, bus) = scheduler().await;
    let mut events = bus.subscribe();
    let job = CountingJob::new("movie_sync");
    scheduler.register(job.clone(), Frequency::Daily).await.unwrap();

    let run_id = scheduler.run_job_manually("movie_sync").await.unwrap();
    let run = wait_for_terminal(&scheduler, &run_id).await;
    wait_for_idle(&scheduler, "movie_sync").await;

    assert_eq!(run.status, JobRunStatus::Completed);
    assert_eq!(run.trigger, TriggerKind::Manual);
    assert_eq!(run.progress_percent, 100);
    assert_eq!(run.progress_message.as_deref(), Some("synced 3 items"));
    assert!(run.error_message.is_none());
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);

    let schedule = scheduler
        .schedules()
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.name == "movie_sync")
        .unwrap();
    assert_eq!(schedule.last_run_time, Some(clock.unix_timestamp()));

    let mut kinds = Vec::new();
    while let Ok(CoreEvent::Job(event)) = events.try_recv() {
        assert_eq!(event.run_id(), run_id.to_string());
        kinds.push(match event {
            JobEvent::Started { manual, .. } => {
                assert!(manual);
                "started"
            }
            JobEvent::Progress { .. } => "progress",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Failed { .. } => "failed",
        });
    }
    assert_eq!(kinds, vec!["started", "progress", "completed"]);
}

#[tokio::test]
async fn test_failing_job_marks_run_failed() {
    let (scheduler, _, _) = scheduler().await;
    scheduler.register(Arc::new(FailingJob), Frequency::Manual).await.unwrap();

    let run_id = scheduler.run_job_manually("broken_sync").await.unwrap();
    let run = wait_for_terminal(&scheduler, &run_id).await;

    assert_eq!(run.status, JobRunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("provider exploded"));
    assert_eq!(run.progress_percent, 10, "last reported progress is kept");
    assert!(run.end_time.is_some());
}

#[tokio::test]
async fn test_unknown_job_is_rejected() {
    let (scheduler, _, _) = scheduler().await;
    assert!(matches!(
        scheduler.run_job_manually("nope").await,
        Err(JobError::JobNotFound(name)) if name == "nope"
    ));
    assert!(matches!(
        scheduler.get_job_run_by_id(&JobRunId::new()).await,
        Err(JobError::RunNotFound { .. })
    ));
}

#[tokio::test]
async fn test_lease_rejects_overlapping_runs() {
    let (scheduler, _, _) = scheduler().await;
    let gate = Arc::new(Notify::new());
    scheduler
        .register(Arc::new(GatedJob { gate: gate.clone() }), Frequency::Daily)
        .await
        .unwrap();

    let first = scheduler.run_job_manually("gated_sync").await.unwrap();
    assert!(scheduler.is_running("gated_sync").await);
    assert!(matches!(
        scheduler.run_job_manually("gated_sync").await,
        Err(JobError::AlreadyRunning { .. })
    ));
    assert!(
        scheduler.run_due_jobs().await.unwrap().is_empty(),
        "due-check skips leased jobs"
    );

    gate.notify_one();
    assert_eq!(
        wait_for_terminal(&scheduler, &first).await.status,
        JobRunStatus::Completed
    );
    wait_for_idle(&scheduler, "gated_sync").await;

    let second = scheduler.run_job_manually("gated_sync").await.unwrap();
    assert_ne!(first, second);
    gate.notify_one();
    wait_for_terminal(&scheduler, &second).await;
}

#[tokio::test]
async fn test_jobs_sharing_a_lease_key_never_overlap() {
    let (scheduler, _, _) = scheduler().await;
    let gate = Arc::new(Notify::new());
    for name in ["playlist_sync", "playlist_sync:user:u1"] {
        let job = SharedLeaseJob {
            name: name.to_string(),
            lease_key: "playlist_sync".to_string(),
            gate: gate.clone(),
        };
        scheduler.register(Arc::new(job), Frequency::Manual).await.unwrap();
    }
    scheduler
        .register(CountingJob::new("movie_sync"), Frequency::Manual)
        .await
        .unwrap();

    let all_users = scheduler.run_job_manually("playlist_sync").await.unwrap();
    assert!(scheduler.is_running("playlist_sync:user:u1").await);
    assert!(matches!(
        scheduler.run_job_manually("playlist_sync:user:u1").await,
        Err(JobError::AlreadyRunning { job_name }) if job_name == "playlist_sync:user:u1"
    ));

    let other = scheduler.run_job_manually("movie_sync").await.unwrap();
    wait_for_terminal(&scheduler, &other).await;

    gate.notify_one();
    wait_for_terminal(&scheduler, &all_users).await;
    wait_for_idle(&scheduler, "playlist_sync:user:u1").await;

    let per_user = scheduler.run_job_manually("playlist_sync:user:u1").await.unwrap();
    gate.notify_one();
    assert_eq!(
        wait_for_terminal(&scheduler, &per_user).await.status,
        JobRunStatus::Completed
    );
}

#[tokio::test]
async fn test_timeout_fails_run() {
    let config = SchedulerConfig {
        job_timeout: Duration::from_millis(50),
        ..SchedulerConfig::default()
    };
    let (scheduler, _, bus) = scheduler_with(config).await;
    let mut events = bus.subscribe();
    scheduler.register(Arc::new(SleepyJob), Frequency::Manual).await.unwrap();

    let run_id = scheduler.run_job_manually("sleepy_sync").await.unwrap();
    let run = wait_for_terminal(&scheduler, &run_id).await;
    wait_for_idle(&scheduler, "sleepy_sync").await;

    assert_eq!(run.status, JobRunStatus::Failed);
    assert!(run.error_message.unwrap().contains("timed out"));

    let mut saw_timeout = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Job(JobEvent::Failed { timed_out, .. }) = event {
            saw_timeout = timed_out;
        }
    }
    assert!(saw_timeout);
}

#[tokio::test]
async fn test_due_check_respects_frequency() {
    let (scheduler, clock, _) = scheduler().await;
    let daily = CountingJob::new("daily_sync");
    let manual = CountingJob::new("manual_sync");
    let disabled = CountingJob::new("disabled_sync");
    scheduler.register(daily.clone(), Frequency::Daily).await.unwrap();
    scheduler.register(manual.clone(), Frequency::Manual).await.unwrap();
    scheduler.register(disabled.clone(), Frequency::Daily).await.unwrap();
    scheduler
        .setup_schedule("disabled_sync", Frequency::Daily, false)
        .await
        .unwrap();

    // Never run: due immediately
    let started = scheduler.run_due_jobs().await.unwrap();
    assert_eq!(started.len(), 1);
    let run = wait_for_terminal(&scheduler, &started[0]).await;
    assert_eq!(run.job_name, "daily_sync");
    assert_eq!(run.trigger, TriggerKind::Scheduled);
    wait_for_idle(&scheduler, "daily_sync").await;

    clock.advance(chrono::Duration::hours(23));
    assert!(scheduler.run_due_jobs().await.unwrap().is_empty());

    clock.advance(chrono::Duration::hours(1));
    let started = scheduler.run_due_jobs().await.unwrap();
    assert_eq!(started.len(), 1);
    wait_for_terminal(&scheduler, &started[0]).await;

    assert_eq!(daily.runs.load(Ordering::SeqCst), 2);
    assert_eq!(manual.runs.load(Ordering::SeqCst), 0);
    assert_eq!(disabled.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_register_keeps_existing_schedule() {
    let (scheduler, _, _) = scheduler().await;
    assert!(matches!(
        scheduler.setup_schedule("movie_sync", Frequency::Weekly, true).await,
        Err(JobError::JobNotFound(_))
    ));

    scheduler
        .register(CountingJob::new("movie_sync"), Frequency::Daily)
        .await
        .unwrap();
    scheduler
        .setup_schedule("movie_sync", Frequency::Monthly, true)
        .await
        .unwrap();

    let schedule = scheduler
        .register(CountingJob::new("movie_sync"), Frequency::Daily)
        .await
        .unwrap();
    assert_eq!(schedule.frequency, Frequency::Monthly);
    assert_eq!(scheduler.registered_jobs().await, vec!["movie_sync"]);
}

#[tokio::test]
async fn test_recent_runs_default_limit() {
    let config = SchedulerConfig {
        recent_runs_limit: 2,
        ..SchedulerConfig::default()
    };
    let (scheduler, clock, _) = scheduler_with(config).await;
    scheduler
        .register(CountingJob::new("movie_sync"), Frequency::Manual)
        .await
        .unwrap();

    for _ in 0..3 {
        let run_id = scheduler.run_job_manually("movie_sync").await.unwrap();
        wait_for_terminal(&scheduler, &run_id).await;
        wait_for_idle(&scheduler, "movie_sync").await;
        clock.advance(chrono::Duration::seconds(10));
    }

    assert_eq!(scheduler.get_recent_job_runs(0).await.unwrap().len(), 2);
    let all = scheduler.get_recent_job_runs(10).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all[0].start_time > all[2].start_time);
    assert_eq!(scheduler.job_history("movie_sync", 10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_shutdown_cancels_running_jobs() {
    let (scheduler, _, _) = scheduler().await;
    scheduler
        .register(
            Arc::new(GatedJob {
                gate: Arc::new(Notify::new()),
            }),
            Frequency::Manual,
        )
        .await
        .unwrap();

    let run_id = scheduler.run_job_manually("gated_sync").await.unwrap();
    scheduler.shutdown().await;

    let run = scheduler.get_job_run_by_id(&run_id).await.unwrap();
    assert_eq!(run.status, JobRunStatus::Failed);
    assert!(run.error_message.unwrap().contains("cancelled"));

    assert!(matches!(
        scheduler.run_job_manually("gated_sync").await,
        Err(JobError::Cancelled(_))
    ));
}

#[tokio::test]
async fn test_tick_loop_fires_due_jobs() {
    let config = SchedulerConfig {
        tick_interval: Duration::from_millis(20),
        ..SchedulerConfig::default()
    };
    let (scheduler, _, _) = scheduler_with(config).await;
    let job = CountingJob::new("movie_sync");
    scheduler.register(job.clone(), Frequency::Weekly).await.unwrap();

    scheduler.start();
    scheduler.start();

    for _ in 0..200 {
        if job.runs.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for_idle(&scheduler, "movie_sync").await;
    scheduler.shutdown().await;

    // The clock never moved, so the weekly job fired exactly once
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    let history = scheduler.job_history("movie_sync", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobRunStatus::Completed);
}
