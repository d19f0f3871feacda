use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Job error: {0}")]
    Job(#[from] core_jobs::JobError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("User not found: {0}")]
    UserNotFound(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
