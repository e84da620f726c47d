use crate::domain::entities::job::Job;
use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::timestamps::Timestamp;
use time::OffsetDateTime;

/// Column list shared by every query that returns full job rows.
pub const JOB_COLUMNS: &str = "id,
    queue,
    priority,
    run_at,
    job_class,
    args,
    kwargs,
    data,
    error_count,
    last_error_message,
    last_error_backtrace,
    finished_at,
    expired_at,
    job_schema_version";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: i64,
    pub queue: String,
    pub priority: i16,
    pub run_at: OffsetDateTime,
    pub job_class: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub data: serde_json::Value,
    pub error_count: i32,
    pub last_error_message: Option<String>,
    pub last_error_backtrace: Option<String>,
    pub finished_at: Option<OffsetDateTime>,
    pub expired_at: Option<OffsetDateTime>,
    pub job_schema_version: i32,
}

impl JobRow {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.0,
            queue: job.queue.clone(),
            priority: job.priority,
            run_at: job.run_at.as_inner(),
            job_class: job.job_class.clone(),
            args: job.args.clone(),
            kwargs: job.kwargs.clone(),
            data: job.data.clone(),
            error_count: job.error_count,
            last_error_message: job.last_error_message.clone(),
            last_error_backtrace: job.last_error_backtrace.clone(),
            finished_at: job.finished_at.map(|t| t.as_inner()),
            expired_at: job.expired_at.map(|t| t.as_inner()),
            job_schema_version: job.job_schema_version,
        }
    }

    pub fn into_job(self) -> Job {
        Job {
            id: JobId(self.id),
            queue: self.queue,
            priority: self.priority,
            run_at: Timestamp::from(self.run_at),
            job_class: self.job_class,
            args: self.args,
            kwargs: self.kwargs,
            data: self.data,
            error_count: self.error_count,
            last_error_message: self.last_error_message,
            last_error_backtrace: self.last_error_backtrace,
            finished_at: self.finished_at.map(Timestamp::from),
            expired_at: self.expired_at.map(Timestamp::from),
            job_schema_version: self.job_schema_version,
        }
    }
}
