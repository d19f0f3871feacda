//! # Core Configuration Module
//!
//! Provides configuration management for the media sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all dependencies and tunables the sync service needs.
//! It enforces fail-fast validation so a misconfigured host is rejected before
//! any job is scheduled.
//!
//! ## Required Dependencies
//!
//! - `ProviderFactory` - Connects configured media clients
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Clock` - Time source (default: `SystemClock`)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/mediahub/sync.db")
//!     .provider_factory(Arc::new(MyProviderFactory::new()))
//!     .reconcile_batch_size(50)
//!     .job_timeout(Duration::from_secs(15 * 60))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! The builder returns [`Error::CapabilityMissing`] when the provider factory
//! is not injected and [`Error::Config`] for out-of-range tunables.

use crate::error::{Error, Result};
use bridge_traits::{Clock, ProviderFactory, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default number of provider records reconciled per chunk
pub const DEFAULT_RECONCILE_BATCH_SIZE: usize = 100;

/// Default page size requested from catalog providers
pub const DEFAULT_CATALOG_PAGE_SIZE: u32 = 500;

/// Default upper bound on a single job run
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default interval between scheduler due-checks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of runs returned by recent-run queries
pub const DEFAULT_RECENT_RUNS_LIMIT: u32 = 20;

const MAX_RECONCILE_BATCH_SIZE: usize = 10_000;

/// Core configuration for the sync service.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Factory connecting configured media clients (required)
    pub provider_factory: Arc<dyn ProviderFactory>,

    /// Time source for schedules and sync timestamps
    pub clock: Arc<dyn Clock>,

    /// Reconciliation and paging tunables
    pub sync: SyncSettings,

    /// Scheduler tunables
    pub scheduler: SchedulerSettings,

    /// Features flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("provider_factory", &"ProviderFactory { ... }")
            .field("clock", &"Clock { ... }")
            .field("sync", &self.sync)
            .field("scheduler", &self.scheduler)
            .field("features", &self.features)
            .finish()
    }
}

/// Reconciliation tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Records reconciled per chunk before progress is reported
    pub batch_size: usize,
    /// Page size requested from `CatalogProvider::list_items`
    pub catalog_page_size: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_RECONCILE_BATCH_SIZE,
            catalog_page_size: DEFAULT_CATALOG_PAGE_SIZE,
        }
    }
}

/// Scheduler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    /// A run exceeding this is cancelled and marked failed
    pub job_timeout: Duration,
    pub recent_runs_limit: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            recent_runs_limit: DEFAULT_RECENT_RUNS_LIMIT,
        }
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Run the timer-driven scheduler loop. When disabled only manual
    /// triggers execute jobs.
    pub enable_background_scheduler: bool,

    /// Register the built-in catalog, list and user-data jobs on startup
    pub register_builtin_jobs: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_background_scheduler: true,
            register_builtin_jobs: true,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Batch and page sizes are within range
    /// - Timeouts and tick interval are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.sync.batch_size == 0 {
            return Err(Error::Config(
                "Reconcile batch size must be greater than 0".to_string(),
            ));
        }

        if self.sync.batch_size > MAX_RECONCILE_BATCH_SIZE {
            return Err(Error::Config(format!(
                "Reconcile batch size exceeds maximum of {}",
                MAX_RECONCILE_BATCH_SIZE
            )));
        }

        if self.sync.catalog_page_size == 0 {
            return Err(Error::Config(
                "Catalog page size must be greater than 0".to_string(),
            ));
        }

        if self.scheduler.job_timeout.is_zero() {
            return Err(Error::Config("Job timeout must be non-zero".to_string()));
        }

        if self.scheduler.tick_interval < Duration::from_secs(1) {
            return Err(Error::Config(
                "Scheduler tick interval must be at least one second".to_string(),
            ));
        }

        if self.scheduler.recent_runs_limit == 0 {
            return Err(Error::Config(
                "Recent runs limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn provider_factory_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "ProviderFactory".to_string(),
        message: "A ProviderFactory implementation is required to reach media clients. \
                  Inject the host's vendor adapters with .provider_factory()."
            .to_string(),
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    provider_factory: Option<Arc<dyn ProviderFactory>>,
    clock: Option<Arc<dyn Clock>>,
    sync: SyncSettings,
    scheduler: SchedulerSettings,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the provider factory (required).
    pub fn provider_factory(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.provider_factory = Some(factory);
        self
    }

    /// Overrides the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Default: 100
    pub fn reconcile_batch_size(mut self, size: usize) -> Self {
        self.sync.batch_size = size;
        self
    }

    /// Default: 500
    pub fn catalog_page_size(mut self, size: u32) -> Self {
        self.sync.catalog_page_size = size;
        self
    }

    /// Default: 30 minutes
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.scheduler.job_timeout = timeout;
        self
    }

    /// Default: 60 seconds
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.scheduler.tick_interval = interval;
        self
    }

    pub fn recent_runs_limit(mut self, limit: u32) -> Self {
        self.scheduler.recent_runs_limit = limit;
        self
    }

    pub fn enable_background_scheduler(mut self, enabled: bool) -> Self {
        self.features.enable_background_scheduler = enabled;
        self
    }

    pub fn register_builtin_jobs(mut self, enabled: bool) -> Self {
        self.features.register_builtin_jobs = enabled;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - The database path or provider factory is missing
    /// - A tunable is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let provider_factory = self
            .provider_factory
            .ok_or_else(provider_factory_missing_error)?;

        let config = CoreConfig {
            database_path,
            provider_factory,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sync: self.sync,
            scheduler: self.scheduler,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
