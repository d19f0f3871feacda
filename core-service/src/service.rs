use core_jobs::{
    Frequency, Job, JobError, JobRun, JobRunId, JobSchedule, JobScheduler, SchedulerConfig,
    SqliteJobRepository,
};
use core_library::{
    create_pool, Album, Artist, Collection, DatabaseConfig, Episode, Movie, Playlist, Series,
    Track, UserId, UserRepository,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventFilter, EventStream};
use core_sync::{CatalogSyncJob, ListSyncJob, SyncContext, UserDataKind, UserDataSyncJob, UserScope};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{CoreError, Result};

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Owns the scheduler and the shared sync dependencies.
///
/// Clones share the same scheduler, pool and event bus.
#[derive(Clone)]
pub struct MediaSyncService {
    config: CoreConfig,
    pool: SqlitePool,
    event_bus: EventBus,
    scheduler: JobScheduler,
    sync: SyncContext,
}

impl MediaSyncService {
    /// Open the database at `config.database_path` and assemble the service.
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let pool = create_pool(DatabaseConfig::new(config.database_path.clone())).await?;
        Self::with_pool(config, pool).await
    }

    /// Assemble the service over an existing, migrated pool.
    #[instrument(skip_all, fields(database = %config.database_path.display()))]
    pub async fn with_pool(config: CoreConfig, pool: SqlitePool) -> Result<Self> {
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let scheduler = JobScheduler::new(
            Arc::new(SqliteJobRepository::new(pool.clone())),
            config.clock.clone(),
            event_bus.clone(),
            SchedulerConfig::from(config.scheduler),
        );
        let sync = SyncContext::from_config(pool.clone(), &config, event_bus.clone());

        let service = Self {
            config,
            pool,
            event_bus,
            scheduler,
            sync,
        };

        if service.config.features.register_builtin_jobs {
            service.register_builtin_jobs().await?;
        }
        service.restore_user_jobs().await?;

        info!(
            jobs = service.scheduler.registered_jobs().await.len(),
            "Media sync service ready"
        );
        Ok(service)
    }

    /// Catalog jobs for every item kind, list jobs for every list kind and
    /// the two user-data jobs, all scoped to every user.
    async fn register_builtin_jobs(&self) -> Result<()> {
        let jobs: Vec<Arc<dyn Job>> = vec![
            Arc::new(CatalogSyncJob::<Movie>::new(self.sync.clone())),
            Arc::new(CatalogSyncJob::<Series>::new(self.sync.clone())),
            Arc::new(CatalogSyncJob::<Episode>::new(self.sync.clone())),
            Arc::new(CatalogSyncJob::<Track>::new(self.sync.clone())),
            Arc::new(CatalogSyncJob::<Album>::new(self.sync.clone())),
            Arc::new(CatalogSyncJob::<Artist>::new(self.sync.clone())),
            Arc::new(ListSyncJob::<Playlist>::new(self.sync.clone(), UserScope::All)),
            Arc::new(ListSyncJob::<Collection>::new(self.sync.clone(), UserScope::All)),
            Arc::new(UserDataSyncJob::new(
                self.sync.clone(),
                UserDataKind::Favorites,
                UserScope::All,
            )),
            Arc::new(UserDataSyncJob::new(
                self.sync.clone(),
                UserDataKind::WatchHistory,
                UserScope::All,
            )),
        ];

        for job in jobs {
            self.scheduler.register(job, Frequency::Daily).await?;
        }
        Ok(())
    }

    /// Re-register the per-user jobs whose schedules an earlier process set
    /// up. Their schedule rows are kept as stored.
    async fn restore_user_jobs(&self) -> Result<()> {
        let mut restored = 0;
        for schedule in self.scheduler.schedules().await? {
            let (base, scope) = UserScope::split_job_name(&schedule.name);
            let UserScope::Single(user_id) = scope else {
                continue;
            };
            match self.user_job(base, user_id) {
                Some(job) => {
                    self.scheduler.register(job, schedule.frequency).await?;
                    restored += 1;
                }
                None => warn!(job = %schedule.name, "Schedule names no known per-user job"),
            }
        }

        if restored > 0 {
            info!(restored, "Restored per-user jobs");
        }
        Ok(())
    }

    /// The user-scoped job for `base`, if `base` names a per-user job kind.
    fn user_job(&self, base: &str, user_id: UserId) -> Option<Arc<dyn Job>> {
        let scope = UserScope::Single(user_id);
        let ctx = self.sync.clone();
        let job: Arc<dyn Job> = if base == ListSyncJob::<Playlist>::base_name() {
            Arc::new(ListSyncJob::<Playlist>::new(ctx, scope))
        } else if base == ListSyncJob::<Collection>::base_name() {
            Arc::new(ListSyncJob::<Collection>::new(ctx, scope))
        } else if base == UserDataKind::Favorites.base_job_name() {
            Arc::new(UserDataSyncJob::new(ctx, UserDataKind::Favorites, scope))
        } else if base == UserDataKind::WatchHistory.base_job_name() {
            Arc::new(UserDataSyncJob::new(ctx, UserDataKind::WatchHistory, scope))
        } else {
            return None;
        };
        Some(job)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the background scheduler loop, unless disabled by the feature flags.
    pub fn start(&self) {
        if self.config.features.enable_background_scheduler {
            self.scheduler.start();
        } else {
            info!("Background scheduler disabled; only manual triggers will run");
        }
    }

    /// Stop the scheduler and wait for running jobs to be finalized.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Users, their clients and their list sync settings.
    pub fn users(&self) -> Arc<dyn UserRepository> {
        self.sync.users()
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Trigger `job_name` now; returns the id of the run, which continues in
    /// the background.
    pub async fn run_job_manually(&self, job_name: &str) -> Result<JobRunId> {
        Ok(self.scheduler.run_job_manually(job_name).await?)
    }

    /// Like [`run_job_manually`](Self::run_job_manually), with a stream of the
    /// job's lifecycle events opened before the trigger so none are missed.
    /// Await [`EventStream::until_finished`] for the run's outcome.
    pub async fn run_job_and_watch(&self, job_name: &str) -> Result<(JobRunId, EventStream)> {
        let stream = self.event_bus.stream(EventFilter::Job(job_name.to_string()));
        let run_id = self.run_job_manually(job_name).await?;
        Ok((run_id, stream))
    }

    pub async fn get_job_run_by_id(&self, run_id: &JobRunId) -> Result<JobRun> {
        Ok(self.scheduler.get_job_run_by_id(run_id).await?)
    }

    /// Most recent runs across all jobs, newest first. A `limit` of 0 uses the
    /// configured default.
    pub async fn get_recent_job_runs(&self, limit: u32) -> Result<Vec<JobRun>> {
        Ok(self.scheduler.get_recent_job_runs(limit).await?)
    }

    pub async fn job_history(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>> {
        Ok(self.scheduler.job_history(job_name, limit).await?)
    }

    pub async fn schedules(&self) -> Result<Vec<JobSchedule>> {
        Ok(self.scheduler.schedules().await?)
    }

    // ========================================================================
    // Per-user schedules
    // ========================================================================

    pub async fn setup_playlist_sync_schedule(
        &self,
        user_id: &UserId,
        frequency: Frequency,
    ) -> Result<JobSchedule> {
        self.setup_user_job(&ListSyncJob::<Playlist>::base_name(), user_id, frequency)
            .await
    }

    pub async fn setup_collection_sync_schedule(
        &self,
        user_id: &UserId,
        frequency: Frequency,
    ) -> Result<JobSchedule> {
        self.setup_user_job(&ListSyncJob::<Collection>::base_name(), user_id, frequency)
            .await
    }

    pub async fn setup_favorites_sync_schedule(
        &self,
        user_id: &UserId,
        frequency: Frequency,
    ) -> Result<JobSchedule> {
        self.setup_user_job(&UserDataKind::Favorites.base_job_name(), user_id, frequency)
            .await
    }

    pub async fn setup_watch_history_sync_schedule(
        &self,
        user_id: &UserId,
        frequency: Frequency,
    ) -> Result<JobSchedule> {
        self.setup_user_job(&UserDataKind::WatchHistory.base_job_name(), user_id, frequency)
            .await
    }

    /// Register (or replace) the per-user job and set its schedule, enabled.
    #[instrument(skip(self, frequency), fields(user_id = %user_id))]
    async fn setup_user_job(
        &self,
        base: &str,
        user_id: &UserId,
        frequency: Frequency,
    ) -> Result<JobSchedule> {
        self.ensure_user(user_id).await?;
        let job = self
            .user_job(base, user_id.clone())
            .ok_or_else(|| JobError::JobNotFound(base.to_string()))?;
        let name = job.name().to_string();
        self.scheduler.register(job, frequency).await?;
        Ok(self.scheduler.setup_schedule(&name, frequency, true).await?)
    }

    async fn ensure_user(&self, user_id: &UserId) -> Result<()> {
        match self.users().find_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(CoreError::UserNotFound(user_id.to_string())),
        }
    }
}

impl std::fmt::Debug for MediaSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSyncService")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
