use bridge_traits::error::BridgeError;
use core_jobs::JobError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Provider error: {0}")]
    Provider(#[from] BridgeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("All {attempted} clients failed: {details}")]
    AllClientsFailed { attempted: usize, details: String },

    #[error("Sync failed for all {attempted} users: {details}")]
    AllUsersFailed { attempted: usize, details: String },

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Errors caused by stored configuration rather than by a client or the
    /// store; retrying without a settings change will not help.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_)
                | SyncError::Provider(BridgeError::UnknownClientType(_))
                | SyncError::Provider(BridgeError::CapabilityMissing { .. })
        )
    }
}

impl From<SyncError> for JobError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Config(message) => JobError::Config(message),
            SyncError::Cancelled => JobError::Cancelled("sync interrupted".to_string()),
            other => JobError::Failed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
