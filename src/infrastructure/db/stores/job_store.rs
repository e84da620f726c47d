use crate::infrastructure::db::database::DatabaseError;
use crate::infrastructure::db::dto::JobRow;
use async_trait::async_trait;
use time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JobRepositoryError {
    #[error("job not found")]
    NotFound,
    #[error("storage unavailable")]
    StorageUnavailable,
}

impl From<DatabaseError> for JobRepositoryError {
    fn from(_: DatabaseError) -> Self {
        JobRepositoryError::StorageUnavailable
    }
}

/// Error columns written alongside a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub message: String,
    pub backtrace: Option<String>,
}

/// Worker-side writes that resolve a locked job.
///
/// Every write targets a single row by id; the caller holds the job's advisory
/// lock for the duration, so no further row locking is needed.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch a job that is neither finished nor expired.
    async fn get_unfinished(&self, job_id: i64) -> Result<Option<JobRow>, JobRepositoryError>;
    /// Stamp `finished_at`, keeping the row.
    async fn finish(&self, job_id: i64) -> Result<(), JobRepositoryError>;
    /// Delete the row.
    async fn destroy(&self, job_id: i64) -> Result<(), JobRepositoryError>;
    /// Move `run_at` to `now + delay`. A failure also bumps `error_count` and
    /// stores the error columns.
    async fn retry_in(
        &self,
        job_id: i64,
        delay: Duration,
        failure: Option<&FailureRecord>,
    ) -> Result<(), JobRepositoryError>;
    /// Stamp `expired_at`. A failure also bumps `error_count` and stores the
    /// error columns.
    async fn expire(
        &self,
        job_id: i64,
        failure: Option<&FailureRecord>,
    ) -> Result<(), JobRepositoryError>;
}
