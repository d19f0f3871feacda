//! # Event Bus System
//!
//! Typed broadcast events for job lifecycle and sync outcomes, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The scheduler publishes [`JobEvent`]s as runs start, report progress and
//! finish; the sync jobs publish [`SyncEvent`]s summarising what they
//! changed. Hosts subscribe to surface activity without polling the run
//! tracker, either to everything or through an [`EventStream`] narrowed by
//! an [`EventFilter`] (one job, one run, or one category).
//!
//! ```text
//! ┌───────────────┐  JobEvent   ┌───────────┐  EventFilter  ┌─────────────┐
//! │ JobScheduler  ├────────────>│ EventBus  ├──────────────>│ EventStream │
//! └───────────────┘             │           │               └─────────────┘
//! ┌───────────────┐  SyncEvent  │           │
//! │ Sync jobs     ├────────────>│           │
//! └───────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventFilter, JobEvent};
//!
//! let bus = EventBus::new(16);
//! let mut movies = bus.stream(EventFilter::Job("movie_sync".to_string()));
//!
//! bus.emit(CoreEvent::Job(JobEvent::Started {
//!     run_id: "run-1".to_string(),
//!     job_name: "movie_sync".to_string(),
//!     manual: true,
//! }))
//! .ok();
//! assert!(movies.try_recv().is_some());
//! ```
//!
//! Emitting with no subscribers returns an error; publishers ignore it. A
//! subscriber that falls behind by more than the capacity gets
//! `RecvError::Lagged(n)` and can keep receiving.

use bridge_traits::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Job(JobEvent),
    Sync(SyncEvent),
}

impl CoreEvent {
    /// Level a host should log the event at: failures are errors, partial
    /// results (item errors, list conflicts, skipped records) are warnings.
    pub fn level(&self) -> LogLevel {
        match self {
            CoreEvent::Job(JobEvent::Failed { .. }) => LogLevel::Error,
            CoreEvent::Job(JobEvent::Progress { .. }) => LogLevel::Debug,
            CoreEvent::Job(_) => LogLevel::Info,
            CoreEvent::Sync(SyncEvent::ItemsReconciled { errors, .. }) if *errors > 0 => {
                LogLevel::Warn
            }
            CoreEvent::Sync(SyncEvent::ListsSynced { conflicts, .. }) if *conflicts > 0 => {
                LogLevel::Warn
            }
            CoreEvent::Sync(SyncEvent::UserDataSynced { skipped, .. }) if *skipped > 0 => {
                LogLevel::Warn
            }
            CoreEvent::Sync(_) => LogLevel::Info,
        }
    }
}

/// Run lifecycle, published by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum JobEvent {
    Started {
        run_id: String,
        job_name: String,
        /// Triggered by a caller rather than the due-check
        manual: bool,
    },
    Progress {
        run_id: String,
        job_name: String,
        percent: u8,
        message: String,
    },
    Completed {
        run_id: String,
        job_name: String,
        duration_secs: u64,
    },
    Failed {
        run_id: String,
        job_name: String,
        message: String,
        timed_out: bool,
    },
}

impl JobEvent {
    pub fn run_id(&self) -> &str {
        match self {
            JobEvent::Started { run_id, .. }
            | JobEvent::Progress { run_id, .. }
            | JobEvent::Completed { run_id, .. }
            | JobEvent::Failed { run_id, .. } => run_id,
        }
    }

    pub fn job_name(&self) -> &str {
        match self {
            JobEvent::Started { job_name, .. }
            | JobEvent::Progress { job_name, .. }
            | JobEvent::Completed { job_name, .. }
            | JobEvent::Failed { job_name, .. } => job_name,
        }
    }

    /// `Completed` or `Failed`; nothing follows it for the same run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

/// Outcomes published by the sync jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// One client's catalog of one kind was upserted.
    ItemsReconciled {
        client_id: String,
        media_type: String,
        created: u64,
        updated: u64,
        unchanged: u64,
        errors: u64,
    },
    /// A user's lists of one kind were reconciled across clients.
    ListsSynced {
        user_id: String,
        media_type: String,
        created: u64,
        updated: u64,
        conflicts: u64,
    },
    /// A user's favorites or play state was merged.
    UserDataSynced {
        user_id: String,
        kind: String,
        applied: u64,
        skipped: u64,
    },
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns the number of subscribers reached, or an error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn stream(&self, filter: EventFilter) -> EventStream {
        EventStream::new(self.subscribe(), filter)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Filtered stream
// ============================================================================

/// Which events an [`EventStream`] passes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    /// Every job lifecycle event
    Jobs,
    /// Every sync outcome
    Sync,
    /// Lifecycle events of one job name
    Job(String),
    /// Lifecycle events of one run
    Run(String),
}

impl EventFilter {
    pub fn matches(&self, event: &CoreEvent) -> bool {
        match (self, event) {
            (EventFilter::All, _) => true,
            (EventFilter::Jobs, CoreEvent::Job(_)) => true,
            (EventFilter::Sync, CoreEvent::Sync(_)) => true,
            (EventFilter::Job(name), CoreEvent::Job(job)) => job.job_name() == name,
            (EventFilter::Run(run_id), CoreEvent::Job(job)) => job.run_id() == run_id,
            _ => false,
        }
    }
}

pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: EventFilter,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Next event passing the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every bus handle is dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// `None` when no matching event is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Wait for the terminal event of a run; for streams filtered with
    /// [`EventFilter::Run`].
    pub async fn until_finished(&mut self) -> Result<JobEvent, RecvError> {
        loop {
            if let CoreEvent::Job(job) = self.recv().await? {
                if job.is_terminal() {
                    return Ok(job);
                }
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filter", &self.filter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(run: &str, job: &str) -> CoreEvent {
        CoreEvent::Job(JobEvent::Started {
            run_id: run.to_string(),
            job_name: job.to_string(),
            manual: false,
        })
    }

    fn completed(run: &str, job: &str) -> CoreEvent {
        CoreEvent::Job(JobEvent::Completed {
            run_id: run.to_string(),
            job_name: job.to_string(),
            duration_secs: 3,
        })
    }

    fn lists_synced(conflicts: u64) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::ListsSynced {
            user_id: "u1".to_string(),
            media_type: "playlist".to_string(),
            created: 1,
            updated: 2,
            conflicts,
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(4);
        assert!(bus.emit(started("r1", "movie_sync")).is_err());
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_the_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = started("r1", "movie_sync");
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_stream_filters() {
        let bus = EventBus::new(10);
        let mut sync = bus.stream(EventFilter::Sync);
        let mut playlists = bus.stream(EventFilter::Job("playlist_sync".to_string()));

        bus.emit(started("r1", "movie_sync")).ok();
        bus.emit(started("r2", "playlist_sync")).ok();
        bus.emit(lists_synced(0)).ok();

        assert_eq!(sync.recv().await.unwrap(), lists_synced(0));
        assert!(sync.try_recv().is_none());
        assert_eq!(playlists.recv().await.unwrap(), started("r2", "playlist_sync"));
        assert!(playlists.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_until_finished_skips_other_runs() {
        let bus = EventBus::new(10);
        let mut run = bus.stream(EventFilter::Run("r2".to_string()));

        bus.emit(started("r2", "movie_sync")).ok();
        bus.emit(completed("r1", "movie_sync")).ok();
        bus.emit(completed("r2", "movie_sync")).ok();

        let finished = run.until_finished().await.unwrap();
        assert_eq!(finished.run_id(), "r2");
        assert!(finished.is_terminal());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.emit(started(&format!("r{}", i), "movie_sync")).ok();
        }
        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_levels() {
        let failed = CoreEvent::Job(JobEvent::Failed {
            run_id: "r1".to_string(),
            job_name: "movie_sync".to_string(),
            message: "Job timed out after 1800s".to_string(),
            timed_out: true,
        });
        assert_eq!(failed.level(), LogLevel::Error);
        assert_eq!(lists_synced(2).level(), LogLevel::Warn);
        assert_eq!(lists_synced(0).level(), LogLevel::Info);
        assert_eq!(completed("r1", "movie_sync").level(), LogLevel::Info);
    }

    #[test]
    fn test_event_serialization() {
        let event = completed("run-123", "favorites_sync");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Job\""));
        assert!(json.contains("\"event\":\"Completed\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
