use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::timestamps::Timestamp;
use serde::{Deserialize, Serialize};

/// Version of the job row layout this crate reads and writes.
pub const JOB_SCHEMA_VERSION: i32 = 1;

/// Logical state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Scheduled,
    Ready,
    Locked,
    Finished,
    Expired,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "scheduled",
            JobState::Ready => "ready",
            JobState::Locked => "locked",
            JobState::Finished => "finished",
            JobState::Expired => "expired",
        }
    }
}

/// A full row of the `jobs` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub priority: i16,
    pub run_at: Timestamp,
    pub job_class: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub data: serde_json::Value,
    pub error_count: i32,
    pub last_error_message: Option<String>,
    pub last_error_backtrace: Option<String>,
    pub finished_at: Option<Timestamp>,
    pub expired_at: Option<Timestamp>,
    pub job_schema_version: i32,
}

impl Job {
    /// Build an unsaved job row with default payloads, mostly useful for fixtures.
    pub fn new(id: JobId, queue: &str, priority: i16, run_at: Timestamp, job_class: &str) -> Self {
        Self {
            id,
            queue: queue.to_string(),
            priority,
            run_at,
            job_class: job_class.to_string(),
            args: serde_json::Value::Array(Vec::new()),
            kwargs: serde_json::Value::Object(serde_json::Map::new()),
            data: serde_json::Value::Object(serde_json::Map::new()),
            error_count: 0,
            last_error_message: None,
            last_error_backtrace: None,
            finished_at: None,
            expired_at: None,
            job_schema_version: JOB_SCHEMA_VERSION,
        }
    }

    /// Derive the logical state of the row at `now`; `locked` reports whether some
    /// session currently holds the job's advisory lock.
    pub fn state(&self, now: Timestamp, locked: bool) -> JobState {
        if self.expired_at.is_some() {
            JobState::Expired
        } else if self.finished_at.is_some() {
            JobState::Finished
        } else if locked {
            JobState::Locked
        } else if self.run_at > now {
            JobState::Scheduled
        } else {
            JobState::Ready
        }
    }

    /// Whether a worker may still act on this row.
    pub fn is_workable(&self) -> bool {
        self.finished_at.is_none() && self.expired_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn sample_job(run_at: Timestamp) -> Job {
        Job::new(JobId(1), "default", 100, run_at, "SendEmail")
    }

    #[test]
    fn given_future_run_at_when_state_checked_should_be_scheduled() {
        let now = Timestamp::now_utc();
        let job = sample_job(now.offset_by(Duration::minutes(5)));
        assert_eq!(job.state(now, false), JobState::Scheduled);
    }

    #[test]
    fn given_due_run_at_when_state_checked_should_be_ready_or_locked() {
        let now = Timestamp::now_utc();
        let job = sample_job(now.offset_by(Duration::seconds(-1)));
        assert_eq!(job.state(now, false), JobState::Ready);
        assert_eq!(job.state(now, true), JobState::Locked);
    }

    #[test]
    fn given_terminal_timestamps_when_state_checked_should_prefer_expired() {
        let now = Timestamp::now_utc();
        let mut job = sample_job(now);
        job.finished_at = Some(now);
        assert_eq!(job.state(now, true), JobState::Finished);
        assert!(!job.is_workable());

        job.expired_at = Some(now);
        assert_eq!(job.state(now, false), JobState::Expired);
    }

    #[test]
    fn given_new_job_when_built_should_use_current_schema_and_empty_payloads() {
        let job = sample_job(Timestamp::now_utc());
        assert_eq!(job.job_schema_version, JOB_SCHEMA_VERSION);
        assert_eq!(job.args, serde_json::json!([]));
        assert_eq!(job.kwargs, serde_json::json!({}));
        assert_eq!(job.error_count, 0);
        assert!(job.is_workable());
    }
}
