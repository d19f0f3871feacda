//! # Job Scheduler & Run Tracker
//!
//! Drives the sync jobs on a timer and records every execution.
//!
//! ## Overview
//!
//! This crate manages:
//! - The run state machine (`Running → Completed | Failed`, finalized once)
//! - Schedules with manual/daily/weekly/monthly frequencies
//! - Per-job-name leases so a job never overlaps itself
//! - Bounded execution with a timeout and progress persistence
//!
//! ## Components
//!
//! - **Job Run** (`run`): run entity and validated transitions
//! - **Schedule** (`schedule`): frequencies and due-time evaluation
//! - **Repository** (`repository`): SQLite persistence for runs and schedules
//! - **Progress** (`progress`): progress sinks and sub-range windows
//! - **Job** (`job`): the trait sync jobs implement
//! - **Scheduler** (`scheduler`): registry, tick loop, triggers and queries

pub mod error;
pub mod job;
pub mod progress;
pub mod repository;
pub mod run;
pub mod schedule;
pub mod scheduler;

pub use error::{JobError, Result};
pub use job::{Job, JobContext, JobOutcome};
pub use progress::{NoopProgress, ProgressReporter, ProgressSink, ProgressWindow};
pub use repository::{JobRepository, SqliteJobRepository};
pub use run::{JobRun, JobRunId, JobRunStatus, TriggerKind};
pub use schedule::{Frequency, JobSchedule};
pub use scheduler::{JobScheduler, SchedulerConfig};
