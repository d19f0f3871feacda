//! The unit of scheduled work

use crate::{JobRunId, ProgressSink, Result, TriggerKind};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a job body gets for one run.
#[derive(Clone)]
pub struct JobContext {
    pub run_id: JobRunId,
    pub job_name: String,
    pub trigger: TriggerKind,
    pub progress: Arc<dyn ProgressSink>,
    /// Cancelled when the scheduler shuts down; long loops should check it
    /// between units of work.
    pub cancellation: CancellationToken,
}

impl JobContext {
    pub async fn report(&self, percent: u8, message: &str) {
        self.progress.report(percent, message).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("run_id", &self.run_id)
            .field("job_name", &self.job_name)
            .field("trigger", &self.trigger)
            .finish()
    }
}

/// Final message of a successful run, stored as the run's progress message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub message: Option<String>,
}

impl JobOutcome {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

/// A named job the scheduler can run.
///
/// Returning `Err` marks the run `Failed` with the error's message.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Jobs sharing a lease key never run at the same time. Defaults to the
    /// job name.
    fn lease_key(&self) -> &str {
        self.name()
    }

    async fn run(&self, ctx: JobContext) -> Result<JobOutcome>;
}
