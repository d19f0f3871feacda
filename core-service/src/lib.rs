//! # Media Sync Service
//!
//! Caller-facing façade over the sync engine. It wires the database pool, the
//! event bus, the job scheduler and the sync jobs together from a validated
//! [`CoreConfig`].
//!
//! ## Overview
//!
//! - [`MediaSyncService::bootstrap`] opens the database and registers the
//!   built-in jobs (one catalog job per item kind, one list job per list kind,
//!   favorites and watch history)
//! - [`MediaSyncService::start`] starts the timer-driven scheduler loop
//! - Manual triggers and run queries return immediately; jobs run in the
//!   background and callers poll their runs
//! - Per-user schedules register a job named `<kind>_sync:user:<user id>`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_service::MediaSyncService;
//!
//! let service = MediaSyncService::bootstrap(config).await?;
//! service.start();
//!
//! let run_id = service.run_job_manually("movie_sync").await?;
//! let run = service.get_job_run_by_id(&run_id).await?;
//!
//! service
//!     .setup_playlist_sync_schedule(&"alice".into(), Frequency::Daily)
//!     .await?;
//!
//! service.shutdown().await;
//! ```

pub mod error;
mod service;

pub use error::{CoreError, Result};
pub use service::{MediaSyncService, EVENT_BUS_CAPACITY};

pub use core_jobs::{Frequency, JobRun, JobRunId, JobRunStatus, JobSchedule};
pub use core_runtime::config::CoreConfig;
