use super::models::JobStatus;
use crate::storage::StorageError;
use crate::store::StoreError;
use crate::worker::FetchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Backing store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Corrupt record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("download failed: {0}")]
    FetchFailed(#[from] FetchError),

    #[error("artifact missing after success")]
    ArtifactMissing,

    #[error("Artifact storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, JobError>;
